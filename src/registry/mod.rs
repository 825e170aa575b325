//! # Encrypted Registry
//!
//! Authoritative record of provisioned instances, their database users and
//! the bindings that reference those users. Passwords are only ever stored
//! AES-256-GCM encrypted; callers supply the key on every operation that
//! creates or reads a password.
//!
//! Every lookup reloads the full instance graph from storage. Nothing is
//! cached between calls.

mod rotation;

use crate::crypto::EncryptionKey;
use crate::domain::{Binding, Instance, User, UserType};
use crate::errors::{BrokerError, Result};
use crate::storage::{BindingRepository, DbPool, InstanceRepository, UserRepository};
use tracing::{info, instrument};

/// Registry facade over the instance, user and binding repositories
#[derive(Debug, Clone)]
pub struct Registry {
    instances: InstanceRepository,
    users: UserRepository,
    bindings: BindingRepository,
}

impl Registry {
    pub fn new(pool: DbPool) -> Self {
        Self {
            instances: InstanceRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            bindings: BindingRepository::new(pool),
        }
    }

    /// Build an unsaved instance with its master user.
    ///
    /// See [`Instance::new`]. Nothing is written until [`Registry::save_instance`].
    pub fn new_instance(
        service_id: &str,
        plan_id: &str,
        instance_id: &str,
        db_prefix: &str,
        key: &EncryptionKey,
    ) -> Result<Instance> {
        Instance::new(service_id, plan_id, instance_id, db_prefix, key)
    }

    pub async fn exists(&self, instance_id: &str) -> Result<bool> {
        self.instances.exists(instance_id).await
    }

    /// Load an instance with its users and bindings, `None` when unknown
    pub async fn find_instance(&self, instance_id: &str) -> Result<Option<Instance>> {
        self.instances.find(instance_id).await
    }

    /// Like [`Registry::find_instance`] but unknown IDs are `NotFound`
    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        self.find_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::not_found("instance", instance_id))
    }

    /// Persist an instance and everything it owns
    pub async fn save_instance(&self, instance: &Instance) -> Result<()> {
        self.instances.save(instance).await
    }

    /// Record a binding for `username` on an instance.
    ///
    /// An existing user with that name is reused as-is (the returned flag is
    /// `false`) so a repeated bind hands out the same password. Otherwise a new
    /// user with a random password is created and the flag is `true`.
    #[instrument(skip(self, key), fields(instance_id = %instance_id, binding_id = %binding_id, username = %username))]
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        username: &str,
        user_type: UserType,
        key: &EncryptionKey,
    ) -> Result<(User, bool)> {
        let instance = self.get_instance(instance_id).await?;

        if self.bindings.find_by_binding_id(binding_id).await?.is_some() {
            return Err(BrokerError::conflict(
                format!("Binding '{}' already exists", binding_id),
                "binding",
            ));
        }

        match instance.user(username) {
            Some(existing) if existing.user_type == UserType::Master => Err(BrokerError::conflict(
                format!("Username '{}' is reserved on instance '{}'", username, instance_id),
                "user",
            )),
            Some(existing) => {
                let mut user = existing.clone();
                let binding = Binding::new(&user.id, binding_id);
                self.bindings.insert(&binding).await?;
                user.bindings.push(binding);

                info!(user_id = %user.id, bindings = user.bindings.len(), "Added binding to existing user");
                Ok((user, false))
            }
            None => {
                let mut user = User::new(instance_id, username.to_string(), user_type, key)?;
                user.bindings.push(Binding::new(&user.id, binding_id));
                self.users.save(&user).await?;

                info!(user_id = %user.id, user_type = %user_type, "Created user for binding");
                Ok((user, true))
            }
        }
    }

    /// Remove a binding.
    ///
    /// Returns the user that held it and whether that was the user's last
    /// binding. The user row itself is left in place so the caller can revoke
    /// database-side access first and then call [`Registry::delete_user`].
    #[instrument(skip(self), fields(instance_id = %instance_id, binding_id = %binding_id))]
    pub async fn unbind(&self, instance_id: &str, binding_id: &str) -> Result<(User, bool)> {
        let instance = self.get_instance(instance_id).await?;

        let (user, binding) = instance
            .binding_user(binding_id)
            .ok_or_else(|| BrokerError::not_found("binding", binding_id))?;

        let should_delete = user.bindings.len() == 1;
        self.bindings.delete(&binding.id).await?;

        let mut user = user.clone();
        user.bindings.retain(|b| b.binding_id != binding_id);

        info!(user_id = %user.id, should_delete_user = should_delete, "Removed binding");
        Ok((user, should_delete))
    }

    /// Delete a user and its bindings
    pub async fn delete_user(&self, user: &User) -> Result<bool> {
        self.users.delete(&user.id).await
    }

    /// Delete an instance with all users and bindings
    #[instrument(skip(self))]
    pub async fn delete_instance(&self, instance_id: &str) -> Result<bool> {
        let deleted = self.instances.delete(instance_id).await?;
        info!(instance_id = %instance_id, deleted, "Deleted instance from registry");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{test_key, TestDatabase};

    async fn registry_with_instance(db: &TestDatabase) -> (Registry, Instance) {
        let registry = Registry::new(db.pool.clone());
        let instance =
            Registry::new_instance("service-1", "plan-1", "instance-1", "cf", &test_key()).unwrap();
        registry.save_instance(&instance).await.unwrap();
        (registry, instance)
    }

    #[tokio::test]
    async fn test_find_instance_round_trip() {
        let db = TestDatabase::new().await;
        let (registry, instance) = registry_with_instance(&db).await;

        let found = registry.find_instance("instance-1").await.unwrap().unwrap();
        assert_eq!(found.db_name, "cf_instance_1");
        assert_eq!(found.service_id, "service-1");
        assert_eq!(found.plan_id, "plan-1");
        assert_eq!(found.users.len(), 1);

        let master = found.master_user().unwrap();
        assert_eq!(master.username, instance.users[0].username);
        assert_eq!(
            master.password(&test_key()).unwrap(),
            instance.users[0].password(&test_key()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_find_unknown_instance() {
        let db = TestDatabase::new().await;
        let registry = Registry::new(db.pool.clone());

        assert!(registry.find_instance("missing").await.unwrap().is_none());
        assert!(!registry.exists("missing").await.unwrap());
        assert!(matches!(
            registry.get_instance("missing").await,
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_save_instance_updates_plan() {
        let db = TestDatabase::new().await;
        let (registry, mut instance) = registry_with_instance(&db).await;

        instance.plan_id = "plan-2".to_string();
        registry.save_instance(&instance).await.unwrap();

        let found = registry.get_instance("instance-1").await.unwrap();
        assert_eq!(found.plan_id, "plan-2");
        assert_eq!(found.users.len(), 1);
    }

    #[tokio::test]
    async fn test_bind_same_username_twice_reuses_user() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;

        let (first, first_new) = registry
            .bind("instance-1", "binding-1", "alice", UserType::Standard, &test_key())
            .await
            .unwrap();
        let (second, second_new) = registry
            .bind("instance-1", "binding-2", "alice", UserType::Standard, &test_key())
            .await
            .unwrap();

        assert!(first_new);
        assert!(!second_new);
        assert_eq!(first.id, second.id);
        assert_eq!(first.password(&test_key()).unwrap(), second.password(&test_key()).unwrap());
        assert_eq!(first.encrypted_password, second.encrypted_password);

        let instance = registry.get_instance("instance-1").await.unwrap();
        assert_eq!(instance.users.len(), 2);
        let alice = instance.user("alice").unwrap();
        assert_eq!(alice.bindings.len(), 2);
        assert_eq!(instance.binding_count(), 2);
    }

    #[tokio::test]
    async fn test_bind_duplicate_binding_id_conflicts() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;

        registry.bind("instance-1", "binding-1", "alice", UserType::Standard, &test_key()).await.unwrap();
        let err = registry
            .bind("instance-1", "binding-1", "bob", UserType::Standard, &test_key())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_bind_rejects_master_username() {
        let db = TestDatabase::new().await;
        let (registry, instance) = registry_with_instance(&db).await;
        let master = instance.master_user().unwrap().username.clone();

        let err = registry
            .bind("instance-1", "binding-1", &master, UserType::Standard, &test_key())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_bind_unknown_instance() {
        let db = TestDatabase::new().await;
        let registry = Registry::new(db.pool.clone());

        let err = registry
            .bind("missing", "binding-1", "alice", UserType::Standard, &test_key())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unbind_last_binding_reports_delete() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;

        registry.bind("instance-1", "binding-1", "alice", UserType::Standard, &test_key()).await.unwrap();
        let (user, should_delete) = registry.unbind("instance-1", "binding-1").await.unwrap();

        assert!(should_delete);
        assert_eq!(user.username, "alice");
        assert!(user.bindings.is_empty());

        assert!(registry.delete_user(&user).await.unwrap());
        let instance = registry.get_instance("instance-1").await.unwrap();
        assert!(instance.user("alice").is_none());
        assert_eq!(instance.users.len(), 1);
    }

    #[tokio::test]
    async fn test_unbind_one_of_several_bindings_keeps_user() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;

        registry.bind("instance-1", "binding-1", "alice", UserType::Standard, &test_key()).await.unwrap();
        registry.bind("instance-1", "binding-2", "alice", UserType::Standard, &test_key()).await.unwrap();

        let (_, should_delete) = registry.unbind("instance-1", "binding-1").await.unwrap();
        assert!(!should_delete);

        let instance = registry.get_instance("instance-1").await.unwrap();
        let alice = instance.user("alice").unwrap();
        assert_eq!(alice.bindings.len(), 1);
        assert_eq!(alice.bindings[0].binding_id, "binding-2");
    }

    #[tokio::test]
    async fn test_unbind_unknown_binding() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;

        let err = registry.unbind("instance-1", "binding-9").await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_instance_cascades() {
        let db = TestDatabase::new().await;
        let (registry, _) = registry_with_instance(&db).await;
        registry.bind("instance-1", "binding-1", "alice", UserType::Standard, &test_key()).await.unwrap();

        assert!(registry.delete_instance("instance-1").await.unwrap());
        assert!(registry.find_instance("instance-1").await.unwrap().is_none());

        let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        let bindings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bindings")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(users, 0);
        assert_eq!(bindings, 0);

        assert!(!registry.delete_instance("instance-1").await.unwrap());
    }
}
