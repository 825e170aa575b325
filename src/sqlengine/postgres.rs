//! PostgreSQL-family engine.
//!
//! Roles are never dropped because they may still own objects; dropping a
//! user disables its login instead, and creating a user that still exists
//! re-enables login with the new password.

use super::quote::{pg_identifier, pg_literal, redact};
use super::{ConnectionConfig, SqlEngine, ENGINE_ACQUIRE_TIMEOUT, ENGINE_MAX_CONNECTIONS};
use crate::config::SslMode;
use crate::crypto::{is_valid_extension_name, random_username};
use crate::errors::{BrokerError, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::PgPool;
use tracing::{debug, error, instrument};

/// Extension that is always installed and never managed
const BASE_EXTENSION: &str = "plpgsql";

#[derive(Debug, Default)]
pub struct PostgresEngine {
    pool: Option<PgPool>,
    address: String,
    port: u16,
}

impl PostgresEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or_else(|| BrokerError::internal("PostgreSQL engine is not open"))
    }

    async fn execute(&self, statement: &str, log_statement: &str) -> Result<()> {
        debug!(statement = %log_statement, "Executing PostgreSQL statement");
        sqlx::raw_sql(statement).execute(self.pool()?).await.map_err(|e| {
            error!(error = %e, statement = %log_statement, "PostgreSQL statement failed");
            BrokerError::database(e, format!("PostgreSQL statement failed: {}", log_statement))
        })?;
        Ok(())
    }

    /// `None` when no role has this name, otherwise whether it may log in
    async fn role_can_login(&self, username: &str) -> Result<Option<bool>> {
        sqlx::query_scalar::<_, bool>("SELECT rolcanlogin FROM pg_roles WHERE rolname = $1")
            .bind(username)
            .fetch_optional(self.pool()?)
            .await
            .map_err(|e| BrokerError::database(e, format!("Failed to look up role '{}'", username)))
    }

    async fn terminate_connections(&self, dbname: &str) -> Result<()> {
        debug!(dbname = %dbname, "Terminating connections to database");
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(dbname)
        .execute(self.pool()?)
        .await
        .map_err(|e| {
            BrokerError::database(e, format!("Failed to terminate connections to '{}'", dbname))
        })?;
        Ok(())
    }

    async fn installed_extensions(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>("SELECT extname FROM pg_extension WHERE extname != $1")
            .bind(BASE_EXTENSION)
            .fetch_all(self.pool()?)
            .await
            .map_err(|e| BrokerError::database(e, "Failed to list installed extensions"))
    }
}

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn create_user_statement(username: &str, password: &str) -> String {
    format!("CREATE USER {} WITH PASSWORD {}", pg_identifier(username), pg_literal(password))
}

fn enable_login_statement(username: &str, password: &str) -> String {
    format!("ALTER ROLE {} WITH LOGIN PASSWORD {}", pg_identifier(username), pg_literal(password))
}

/// Roles are server-wide, so an active role may belong to another instance.
fn active_role_conflict(username: &str) -> BrokerError {
    BrokerError::conflict(format!("Database user '{}' is already in use", username), "user")
}

fn disable_login_statement(username: &str) -> String {
    format!("ALTER ROLE {} WITH NOLOGIN", pg_identifier(username))
}

fn grant_statement(dbname: &str, username: &str) -> String {
    format!("GRANT ALL PRIVILEGES ON DATABASE {} TO {}", pg_identifier(dbname), pg_identifier(username))
}

fn revoke_statement(dbname: &str, username: &str) -> String {
    format!(
        "REVOKE ALL PRIVILEGES ON DATABASE {} FROM {}",
        pg_identifier(dbname),
        pg_identifier(username)
    )
}

/// Extensions to drop and to create so that `current` becomes `desired`.
///
/// The base procedural language is neither dropped nor created.
pub(crate) fn extension_changes(current: &[String], desired: &[String]) -> (Vec<String>, Vec<String>) {
    let to_drop = current
        .iter()
        .filter(|name| name.as_str() != BASE_EXTENSION && !desired.contains(name))
        .cloned()
        .collect();
    let to_create = desired
        .iter()
        .filter(|name| name.as_str() != BASE_EXTENSION && !current.contains(name))
        .cloned()
        .collect();
    (to_drop, to_create)
}

#[async_trait]
impl SqlEngine for PostgresEngine {
    #[instrument(skip(self, config), fields(address = %config.address, port = config.port, dbname = %config.dbname))]
    async fn open(&mut self, config: ConnectionConfig) -> Result<()> {
        let options = PgConnectOptions::new()
            .host(&config.address)
            .port(config.port)
            .database(&config.dbname)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(ssl_mode(config.ssl_mode));

        let pool = PgPoolOptions::new()
            .max_connections(ENGINE_MAX_CONNECTIONS)
            .acquire_timeout(ENGINE_ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| {
                error!(error = %e, address = %config.address, "Failed to connect to PostgreSQL");
                BrokerError::database(
                    e,
                    format!("Failed to connect to PostgreSQL at {}:{}", config.address, config.port),
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
        let found = sqlx::query_scalar::<_, String>("SELECT datname FROM pg_database WHERE datname = $1")
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
        let statement = format!("CREATE DATABASE {}", pg_identifier(dbname));
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self))]
    async fn drop_db(&self, dbname: &str) -> Result<()> {
        self.terminate_connections(dbname).await?;
        let statement = format!("DROP DATABASE IF EXISTS {}", pg_identifier(dbname));
        self.execute(&statement, &statement).await
    }

    #[instrument(skip(self, password))]
    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let statement = match self.role_can_login(username).await? {
            None => create_user_statement(username, password),
            Some(false) => enable_login_statement(username, password),
            Some(true) => return Err(active_role_conflict(username)),
        };
        self.execute(&statement, &redact(&statement, &pg_literal(password))).await
    }

    #[instrument(skip(self))]
    async fn drop_user(&self, username: &str) -> Result<()> {
        let statement = disable_login_statement(username);
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

    #[instrument(skip(self))]
    async fn set_extensions(&self, extensions: &[String]) -> Result<()> {
        if let Some(invalid) = extensions.iter().find(|name| !is_valid_extension_name(name)) {
            return Err(BrokerError::validation_field(
                format!("Invalid extension name '{}'", invalid),
                "extensions",
            ));
        }

        let current = self.installed_extensions().await?;
        let (to_drop, to_create) = extension_changes(&current, extensions);

        for name in to_drop {
            let statement = format!("DROP EXTENSION {}", pg_identifier(&name));
            self.execute(&statement, &statement).await?;
        }
        for name in to_create {
            let statement = format!("CREATE EXTENSION {}", pg_identifier(&name));
            self.execute(&statement, &statement).await?;
        }
        Ok(())
    }

    fn uri(&self, dbname: &str, username: &str, password: &str) -> String {
        super::native_uri("postgres", &self.address, self.port, dbname, username, password)
    }

    fn jdbc_uri(&self, dbname: &str, username: &str, password: &str) -> String {
        super::jdbc_uri("postgresql", &self.address, self.port, dbname, username, password)
    }

    fn create_username(&self, _instance_id: &str) -> String {
        random_username()
    }

    fn accepts_requested_username(&self) -> bool {
        true
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn port(&self) -> u16 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_user_statements_quote_inputs() {
        assert_eq!(
            create_user_statement("alice", "it's"),
            "CREATE USER \"alice\" WITH PASSWORD 'it''s'"
        );
        assert_eq!(
            enable_login_statement("alice", "pw"),
            "ALTER ROLE \"alice\" WITH LOGIN PASSWORD 'pw'"
        );
        assert_eq!(disable_login_statement("alice"), "ALTER ROLE \"alice\" WITH NOLOGIN");
    }

    #[test]
    fn test_active_role_conflict() {
        let err = active_role_conflict("uapp_1");
        assert!(matches!(err, BrokerError::Conflict { ref resource_type, .. } if resource_type == "user"));
        assert!(err.to_string().contains("'uapp_1' is already in use"));
    }

    #[test]
    fn test_privilege_statements() {
        assert_eq!(
            grant_statement("cf_db", "alice"),
            "GRANT ALL PRIVILEGES ON DATABASE \"cf_db\" TO \"alice\""
        );
        assert_eq!(
            revoke_statement("cf_db", "alice"),
            "REVOKE ALL PRIVILEGES ON DATABASE \"cf_db\" FROM \"alice\""
        );
    }

    #[test]
    fn test_extension_changes() {
        let (to_drop, to_create) =
            extension_changes(&names(&["hstore", "postgis"]), &names(&["postgis", "uuid-ossp"]));
        assert_eq!(to_drop, names(&["hstore"]));
        assert_eq!(to_create, names(&["uuid-ossp"]));
    }

    #[test]
    fn test_extension_changes_never_touch_base_extension() {
        let (to_drop, to_create) =
            extension_changes(&names(&["plpgsql"]), &names(&["plpgsql", "pg_trgm"]));
        assert!(to_drop.is_empty());
        assert_eq!(to_create, names(&["pg_trgm"]));

        let (to_drop, _) = extension_changes(&names(&["plpgsql", "hstore"]), &[]);
        assert_eq!(to_drop, names(&["hstore"]));
    }

    #[tokio::test]
    async fn test_close_without_open_is_safe() {
        let mut engine = PostgresEngine::new();
        engine.close().await;
        engine.close().await;
    }

    #[tokio::test]
    async fn test_operations_require_open_engine() {
        let engine = PostgresEngine::new();
        assert!(engine.exists_db("db").await.is_err());
        assert!(engine.create_user("alice", "pw").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_extension_name_is_rejected_before_connecting() {
        let engine = PostgresEngine::new();
        let err = engine.set_extensions(&names(&["postgis; DROP"])).await.unwrap_err();
        assert!(matches!(err, BrokerError::Validation { .. }));
    }

    #[test]
    fn test_requested_usernames_are_accepted() {
        let engine = PostgresEngine::new();
        assert!(engine.accepts_requested_username());
        assert_eq!(engine.create_username("instance").len(), crate::crypto::credentials::USERNAME_LENGTH);
    }
}
