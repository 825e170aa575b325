//! SQL engine handles used by the broker.
//!
//! Shared engines are opened once at startup and live as long as the broker.
//! Dedicated engines are opened per call and must be closed by the caller.

use crate::catalog::Engine;
use crate::config::AppConfig;
use crate::errors::{BrokerError, Result};
use crate::sqlengine::{ConnectionConfig, SqlEngine, SqlEngineProvider};
use tracing::info;

/// Long-lived engines hosting shared plans, one per dialect
#[derive(Debug, Default)]
pub struct SharedEngines {
    postgres: Option<Box<dyn SqlEngine>>,
    mysql: Option<Box<dyn SqlEngine>>,
}

impl SharedEngines {
    /// Wrap already-open engines
    pub fn new(postgres: Option<Box<dyn SqlEngine>>, mysql: Option<Box<dyn SqlEngine>>) -> Self {
        Self { postgres, mysql }
    }

    /// Open an engine for every shared connection present in `config`
    pub async fn connect(config: &AppConfig, provider: &dyn SqlEngineProvider) -> Result<Self> {
        let mut engines = Self::default();

        for engine in [Engine::Postgres, Engine::MySql] {
            let Some(shared) = config.shared_engine(engine) else {
                continue;
            };

            let mut handle = provider.engine(engine)?;
            handle.open(ConnectionConfig::from(shared)).await?;
            info!(engine = %engine, address = %shared.host, port = shared.port, "Opened shared engine");

            match engine {
                Engine::Postgres => engines.postgres = Some(handle),
                _ => engines.mysql = Some(handle),
            }
        }

        Ok(engines)
    }

    pub fn get(&self, engine: Engine) -> Result<&dyn SqlEngine> {
        let shared = match engine {
            Engine::Postgres => self.postgres.as_deref(),
            Engine::MySql => self.mysql.as_deref(),
            Engine::Aurora | Engine::MariaDb => None,
        };
        shared.ok_or_else(|| {
            BrokerError::config(format!("No shared engine is configured for '{}'", engine))
        })
    }

    /// Close every shared engine; called once at shutdown
    pub async fn close(&mut self) {
        for engine in [self.postgres.as_mut(), self.mysql.as_mut()].into_iter().flatten() {
            engine.close().await;
        }
    }
}

/// An engine borrowed from [`SharedEngines`] or opened for one call
#[derive(Debug)]
pub(crate) enum EngineHandle<'a> {
    Shared(&'a dyn SqlEngine),
    Dedicated(Box<dyn SqlEngine>),
}

impl EngineHandle<'_> {
    pub(crate) fn engine(&self) -> &dyn SqlEngine {
        match self {
            Self::Shared(engine) => *engine,
            Self::Dedicated(engine) => engine.as_ref(),
        }
    }

    /// Close a dedicated engine; shared engines stay open
    pub(crate) async fn release(self) {
        if let Self::Dedicated(mut engine) = self {
            engine.close().await;
        }
    }
}
