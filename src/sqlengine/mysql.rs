//! MySQL-family engine (MySQL, MariaDB and MySQL-compatible Aurora).
//!
//! Users are created on the `%` host. MySQL has no extensions.

use super::quote::{mysql_identifier, mysql_literal, redact};
use super::{ConnectionConfig, SqlEngine, ENGINE_ACQUIRE_TIMEOUT, ENGINE_MAX_CONNECTIONS};
use crate::config::SslMode;
use crate::crypto::random_username;
use crate::errors::{BrokerError, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sqlx::MySqlPool;
use tracing::{debug, error, instrument};

#[derive(Debug, Default)]
pub struct MySqlEngine {
    pool: Option<MySqlPool>,
    address: String,
    port: u16,
}

impl MySqlEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&MySqlPool> {
        self.pool.as_ref().ok_or_else(|| BrokerError::internal("MySQL engine is not open"))
    }

    async fn execute(&self, statement: &str, log_statement: &str) -> Result<()> {
        debug!(statement = %log_statement, "Executing MySQL statement");
        sqlx::raw_sql(statement).execute(self.pool()?).await.map_err(|e| {
            error!(error = %e, statement = %log_statement, "MySQL statement failed");
            BrokerError::database(e, format!("MySQL statement failed: {}", log_statement))
        })?;
        Ok(())
    }
}

fn ssl_mode(mode: SslMode) -> MySqlSslMode {
    match mode {
        SslMode::Disable => MySqlSslMode::Disabled,
        SslMode::Require => MySqlSslMode::Required,
        SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
    }
}

fn account(username: &str) -> String {
    format!("{}@'%'", mysql_literal(username))
}

fn create_user_statement(username: &str, password: &str) -> String {
    format!("CREATE USER {} IDENTIFIED BY {}", account(username), mysql_literal(password))
}

fn drop_user_statement(username: &str) -> String {
    format!("DROP USER {}", account(username))
}

fn grant_statement(dbname: &str, username: &str) -> String {
    format!("GRANT ALL PRIVILEGES ON {}.* TO {}", mysql_identifier(dbname), account(username))
}

fn revoke_statement(dbname: &str, username: &str) -> String {
    format!("REVOKE ALL PRIVILEGES ON {}.* FROM {}", mysql_identifier(dbname), account(username))
}

#[async_trait]
impl SqlEngine for MySqlEngine {
    #[instrument(skip(self, config), fields(address = %config.address, port = config.port, dbname = %config.dbname))]
    async fn open(&mut self, config: ConnectionConfig) -> Result<()> {
        let options = MySqlConnectOptions::new()
            .host(&config.address)
            .port(config.port)
            .database(&config.dbname)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(ssl_mode(config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(ENGINE_MAX_CONNECTIONS)
            .acquire_timeout(ENGINE_ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(error = %e, address = %config.address, "Failed to connect to MySQL");
                BrokerError::database(
                    e,
                    format!("Failed to connect to MySQL at {}:{}", config.address, config.port),
                )
            })?;

        self.close().await;
        self.pool = Some(pool);
        self.address = config.address;
        self.port = config.port;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
    }

    async fn exists_db(&self, dbname: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, String>(
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?",
        )
        .bind(dbname)
        .fetch_optional(self.pool()?)
        .await
        .map_err(|e| BrokerError::database(e, format!("Failed to look up database '{}'", dbname)))?;
        Ok(found.is_some())
    }

    #[instrument(skip(self))]
    async fn create_db(&self, dbname: &str) -> Result<()> {
        if self.exists_db(dbname).await? {
            debug!(dbname = %dbname, "Database already exists");
            return Ok(());
        }
        let statement = format!("CREATE DATABASE IF NOT EXISTS {}", mysql_identifier(dbname));
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self))]
    async fn drop_db(&self, dbname: &str) -> Result<()> {
        let statement = format!("DROP DATABASE IF EXISTS {}", mysql_identifier(dbname));
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self, password))]
    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let statement = create_user_statement(username, password);
        self.execute(&statement, &redact(&statement, &mysql_literal(password))).await
    }

    #[instrument(skip(self))]
    async fn drop_user(&self, username: &str) -> Result<()> {
        let statement = drop_user_statement(username);
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self))]
    async fn grant_privileges(&self, dbname: &str, username: &str) -> Result<()> {
        let statement = grant_statement(dbname, username);
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self))]
    async fn revoke_privileges(&self, dbname: &str, username: &str) -> Result<()> {
        let statement = revoke_statement(dbname, username);
        self.execute(&statement, &statement).await
    }

    async fn set_extensions(&self, _extensions: &[String]) -> Result<()> {
        Ok(())
    }

    fn uri(&self, dbname: &str, username: &str, password: &str) -> String {
        super::native_uri("mysql", &self.address, self.port, dbname, username, password)
    }

    fn jdbc_uri(&self, dbname: &str, username: &str, password: &str) -> String {
        super::jdbc_uri("mysql", &self.address, self.port, dbname, username, password)
    }

    fn create_username(&self, _instance_id: &str) -> String {
        random_username()
    }

    fn accepts_requested_username(&self) -> bool {
        false
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn port(&self) -> u16 {
        self.port
    }
}
