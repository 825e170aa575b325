//! # SQL Engines
//!
//! Dialect-specific management of databases, users, privileges and
//! extensions on a PostgreSQL- or MySQL-family server. The broker only talks
//! to servers through [`SqlEngine`]; all statement text and quoting for a
//! dialect stays inside its implementation.
//!
//! Engines start closed. [`SqlEngine::open`] connects with the given
//! credentials and [`SqlEngine::close`] releases the connection; closing an
//! engine that was never opened is a no-op.

pub mod mysql;
pub mod postgres;
pub mod quote;

pub use mysql::MySqlEngine;
pub use postgres::PostgresEngine;

use crate::catalog::Engine;
use crate::config::{SharedDbConfig, SslMode};
use crate::errors::Result;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Upper bound on waiting for a pooled engine connection
pub(crate) const ENGINE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connections per opened engine
pub(crate) const ENGINE_MAX_CONNECTIONS: u32 = 2;

/// Where and as whom an engine connects
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub address: String,
    pub port: u16,
    pub dbname: String,
    pub username: String,
    pub password: String,
    pub ssl_mode: SslMode,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl From<&SharedDbConfig> for ConnectionConfig {
    fn from(config: &SharedDbConfig) -> Self {
        Self {
            address: config.host.clone(),
            port: config.port,
            dbname: config.dbname.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            ssl_mode: config.ssl_mode,
        }
    }
}

/// Database, user and privilege management for one SQL dialect
#[async_trait]
pub trait SqlEngine: Send + Sync + fmt::Debug {
    /// Connect using `config`, replacing any previous connection
    async fn open(&mut self, config: ConnectionConfig) -> Result<()>;

    /// Release the connection; safe to call when not open
    async fn close(&mut self);

    async fn exists_db(&self, dbname: &str) -> Result<bool>;

    /// Create a database unless it already exists
    async fn create_db(&self, dbname: &str) -> Result<()>;

    /// Drop a database if it exists
    async fn drop_db(&self, dbname: &str) -> Result<()>;

    async fn create_user(&self, username: &str, password: &str) -> Result<()>;

    async fn drop_user(&self, username: &str) -> Result<()>;

    async fn grant_privileges(&self, dbname: &str, username: &str) -> Result<()>;

    async fn revoke_privileges(&self, dbname: &str, username: &str) -> Result<()>;

    /// Make the installed extensions match `extensions`; a no-op for
    /// dialects without extensions
    async fn set_extensions(&self, extensions: &[String]) -> Result<()>;

    /// Native connection URI for the open server
    fn uri(&self, dbname: &str, username: &str, password: &str) -> String;

    /// JDBC connection URI for the open server
    fn jdbc_uri(&self, dbname: &str, username: &str, password: &str) -> String;

    /// Username used when the caller does not choose one
    fn create_username(&self, instance_id: &str) -> String;

    /// Whether caller-chosen usernames are honoured on this dialect
    fn accepts_requested_username(&self) -> bool;

    /// Host of the open connection
    fn address(&self) -> &str;

    /// Port of the open connection
    fn port(&self) -> u16;
}

/// Creates closed engines by plan engine name
pub trait SqlEngineProvider: Send + Sync + fmt::Debug {
    fn engine(&self, engine: Engine) -> Result<Box<dyn SqlEngine>>;
}

/// Provider backed by the real PostgreSQL and MySQL engines.
///
/// Aurora and MariaDB speak the MySQL protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSqlEngineProvider;

impl SqlEngineProvider for DefaultSqlEngineProvider {
    fn engine(&self, engine: Engine) -> Result<Box<dyn SqlEngine>> {
        match engine {
            Engine::Postgres => Ok(Box::new(PostgresEngine::new())),
            Engine::MySql | Engine::MariaDb | Engine::Aurora => Ok(Box::new(MySqlEngine::new())),
        }
    }
}

/// `{scheme}://{user}:{password}@{host}:{port}/{db}?reconnect=true`
pub(crate) fn native_uri(
    scheme: &str,
    host: &str,
    port: u16,
    dbname: &str,
    username: &str,
    password: &str,
) -> String {
    let plain = || {
        format!("{}://{}:{}@{}:{}/{}?reconnect=true", scheme, username, password, host, port, dbname)
    };

    let Ok(mut url) = url::Url::parse(&format!("{}://{}:{}", scheme, host, port)) else {
        return plain();
    };
    if url.set_username(username).is_err() || url.set_password(Some(password)).is_err() {
        return plain();
    }
    url.set_path(&format!("/{}", dbname));
    url.query_pairs_mut().append_pair("reconnect", "true");
    url.to_string()
}

/// `jdbc:{scheme}://{host}:{port}/{db}?user={user}&password={password}`
pub(crate) fn jdbc_uri(
    scheme: &str,
    host: &str,
    port: u16,
    dbname: &str,
    username: &str,
    password: &str,
) -> String {
    let Ok(mut url) = url::Url::parse(&format!("{}://{}:{}", scheme, host, port)) else {
        return format!(
            "jdbc:{}://{}:{}/{}?user={}&password={}",
            scheme, host, port, dbname, username, password
        );
    };
    url.set_path(&format!("/{}", dbname));
    url.query_pairs_mut().append_pair("user", username).append_pair("password", password);
    format!("jdbc:{}", url)
}
