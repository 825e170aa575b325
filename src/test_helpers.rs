//! Test utilities for in-library tests.
//!
//! `TestDatabase` gives every test its own SQLite registry file in a
//! temporary directory. The recording fakes stand in for SQL engines and the
//! cloud provider and keep a shared call log tests can assert on.
//!
//! This module is only available in test builds (`#[cfg(test)]`).

use crate::cloud::{
    self, DbClusterDescription, DbClusterDetails, DbClusterProvider, DbInstanceDescription,
    DbInstanceDetails, DbInstanceProvider, ProviderError,
};
use crate::config::DatabaseConfig;
use crate::crypto::EncryptionKey;
use crate::errors::{BrokerError, Result};
use crate::sqlengine::{ConnectionConfig, SqlEngine, SqlEngineProvider};
use crate::storage::{create_pool, DbPool};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A registry database in a temporary directory, removed on drop.
pub struct TestDatabase {
    pub pool: DbPool,
    _dir: TempDir,
}

impl TestDatabase {
    /// Fresh registry database with all migrations applied
    pub async fn new() -> Self {
        Self::create(true).await
    }

    /// Fresh registry database without any tables
    pub async fn unmigrated() -> Self {
        Self::create(false).await
    }

    async fn create(auto_migrate: bool) -> Self {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("Failed to create temp dir: {}", e));
        let config = DatabaseConfig {
            url: format!("sqlite://{}", dir.path().join("registry.db").display()),
            auto_migrate,
            max_connections: 5,
            min_connections: 1,
            ..Default::default()
        };

        let pool = create_pool(&config)
            .await
            .unwrap_or_else(|e| panic!("Failed to create test pool: {}", e));

        Self { pool, _dir: dir }
    }
}

/// Fixed key used to encrypt test passwords
pub fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(&[0x17; 32]).unwrap_or_else(|e| panic!("Invalid test key: {}", e))
}

/// Ordered log of calls made against the fakes
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of calls whose entry starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn contains(&self, call: &str) -> bool {
        self.calls().iter().any(|c| c == call)
    }
}

/// Server-side roles keyed by name; the flag is whether the role may log in
#[derive(Debug, Clone, Default)]
pub struct FakeRoles(Arc<Mutex<HashMap<String, bool>>>);

impl FakeRoles {
    pub fn can_login(&self, username: &str) -> Option<bool> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).get(username).copied()
    }

    fn set(&self, username: &str, login: bool) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).insert(username.to_string(), login);
    }
}

/// SQL engine that records every statement-level operation.
#[derive(Debug)]
pub struct FakeSqlEngine {
    log: CallLog,
    pub roles: FakeRoles,
    accepts_requested_username: bool,
    address: String,
    port: u16,
    /// Operation name (e.g. `"create_user"`) that fails when invoked
    pub fail_on: Option<&'static str>,
}

impl FakeSqlEngine {
    pub fn new(log: CallLog, accepts_requested_username: bool) -> Self {
        Self {
            log,
            roles: FakeRoles::default(),
            accepts_requested_username,
            address: String::new(),
            port: 0,
            fail_on: None,
        }
    }

    /// An engine that is already open, as shared engines are
    pub fn opened(log: CallLog, accepts_requested_username: bool, address: &str, port: u16) -> Self {
        Self { address: address.to_string(), port, ..Self::new(log, accepts_requested_username) }
    }

    fn record(&self, operation: &'static str, call: String) -> Result<()> {
        self.log.push(call);
        if self.fail_on == Some(operation) {
            return Err(BrokerError::internal(format!("{} failed", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl SqlEngine for FakeSqlEngine {
    async fn open(&mut self, config: ConnectionConfig) -> Result<()> {
        self.record(
            "open",
            format!("open:{}:{}:{}:{}", config.address, config.port, config.dbname, config.username),
        )?;
        self.address = config.address;
        self.port = config.port;
        Ok(())
    }

    async fn close(&mut self) {
        self.log.push("close");
    }

    async fn exists_db(&self, dbname: &str) -> Result<bool> {
        self.record("exists_db", format!("exists_db:{}", dbname))?;
        Ok(false)
    }

    async fn create_db(&self, dbname: &str) -> Result<()> {
        self.record("create_db", format!("create_db:{}", dbname))
    }

    async fn drop_db(&self, dbname: &str) -> Result<()> {
        self.record("drop_db", format!("drop_db:{}", dbname))
    }

    async fn create_user(&self, username: &str, _password: &str) -> Result<()> {
        self.record("create_user", format!("create_user:{}", username))?;
        if self.roles.can_login(username) == Some(true) {
            return Err(BrokerError::conflict(
                format!("Database user '{}' is already in use", username),
                "user",
            ));
        }
        self.roles.set(username, true);
        Ok(())
    }

    async fn drop_user(&self, username: &str) -> Result<()> {
        self.record("drop_user", format!("drop_user:{}", username))?;
        self.roles.set(username, false);
        Ok(())
    }

    async fn grant_privileges(&self, dbname: &str, username: &str) -> Result<()> {
        self.record("grant_privileges", format!("grant:{}:{}", dbname, username))
    }

    async fn revoke_privileges(&self, dbname: &str, username: &str) -> Result<()> {
        self.record("revoke_privileges", format!("revoke:{}:{}", dbname, username))
    }

    async fn set_extensions(&self, extensions: &[String]) -> Result<()> {
        self.record("set_extensions", format!("set_extensions:{}", extensions.join(",")))
    }

    fn uri(&self, dbname: &str, username: &str, password: &str) -> String {
        crate::sqlengine::native_uri("postgres", &self.address, self.port, dbname, username, password)
    }

    fn jdbc_uri(&self, dbname: &str, username: &str, password: &str) -> String {
        crate::sqlengine::jdbc_uri("postgresql", &self.address, self.port, dbname, username, password)
    }

    fn create_username(&self, instance_id: &str) -> String {
        format!("gen_{}", instance_id.replace('-', "_"))
    }

    fn accepts_requested_username(&self) -> bool {
        self.accepts_requested_username
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Hands out [`FakeSqlEngine`]s that share one call log
#[derive(Debug, Clone, Default)]
pub struct FakeSqlEngineProvider {
    pub log: CallLog,
    pub roles: FakeRoles,
    pub accepts_requested_username: bool,
    pub fail_on: Option<&'static str>,
}

impl SqlEngineProvider for FakeSqlEngineProvider {
    fn engine(&self, _engine: crate::catalog::Engine) -> Result<Box<dyn SqlEngine>> {
        let mut engine = FakeSqlEngine::new(self.log.clone(), self.accepts_requested_username);
        engine.fail_on = self.fail_on;
        engine.roles = self.roles.clone();
        Ok(Box::new(engine))
    }
}

/// Cloud instance provider with a scripted `describe` result.
#[derive(Debug, Default)]
pub struct FakeInstanceProvider {
    pub log: CallLog,
    /// `None` makes `describe` report the instance as gone
    pub description: Mutex<Option<DbInstanceDescription>>,
    pub fail_create: bool,
}

impl FakeInstanceProvider {
    pub fn describing(description: DbInstanceDescription) -> Self {
        Self { description: Mutex::new(Some(description)), ..Default::default() }
    }

    pub fn set_description(&self, description: Option<DbInstanceDescription>) {
        *self.description.lock().unwrap_or_else(|e| e.into_inner()) = description;
    }
}

#[async_trait]
impl DbInstanceProvider for FakeInstanceProvider {
    async fn create(&self, identifier: &str, _details: &DbInstanceDetails) -> cloud::Result<()> {
        self.log.push(format!("instance.create:{}", identifier));
        if self.fail_create {
            return Err(ProviderError::api("InsufficientDBInstanceCapacity"));
        }
        Ok(())
    }

    async fn modify(
        &self,
        identifier: &str,
        _details: &DbInstanceDetails,
        apply_immediately: bool,
    ) -> cloud::Result<()> {
        self.log.push(format!("instance.modify:{}:{}", identifier, apply_immediately));
        Ok(())
    }

    async fn delete(&self, identifier: &str, skip_final_snapshot: bool) -> cloud::Result<()> {
        self.log.push(format!("instance.delete:{}:{}", identifier, skip_final_snapshot));
        Ok(())
    }

    async fn describe(&self, identifier: &str) -> cloud::Result<DbInstanceDescription> {
        self.log.push(format!("instance.describe:{}", identifier));
        self.description
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| ProviderError::does_not_exist(identifier))
    }
}

/// Cloud cluster provider that records calls
#[derive(Debug, Default)]
pub struct FakeClusterProvider {
    pub log: CallLog,
    pub description: Option<DbClusterDescription>,
}

#[async_trait]
impl DbClusterProvider for FakeClusterProvider {
    async fn create(&self, identifier: &str, _details: &DbClusterDetails) -> cloud::Result<()> {
        self.log.push(format!("cluster.create:{}", identifier));
        Ok(())
    }

    async fn modify(
        &self,
        identifier: &str,
        _details: &DbClusterDetails,
        apply_immediately: bool,
    ) -> cloud::Result<()> {
        self.log.push(format!("cluster.modify:{}:{}", identifier, apply_immediately));
        Ok(())
    }

    async fn delete(&self, identifier: &str, skip_final_snapshot: bool) -> cloud::Result<()> {
        self.log.push(format!("cluster.delete:{}:{}", identifier, skip_final_snapshot));
        Ok(())
    }

    async fn describe(&self, identifier: &str) -> cloud::Result<DbClusterDescription> {
        self.log.push(format!("cluster.describe:{}", identifier));
        self.description.clone().ok_or_else(|| ProviderError::does_not_exist(identifier))
    }
}
