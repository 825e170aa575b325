//! Integration tests for the encrypted registry on a SQLite file

use rds_broker::config::DatabaseConfig;
use rds_broker::crypto::EncryptionKey;
use rds_broker::domain::UserType;
use rds_broker::registry::Registry;
use rds_broker::storage::{create_pool, validate_migrations};
use rds_broker::BrokerError;
use tempfile::TempDir;

fn database_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("registry.db").display()),
        max_connections: 2,
        ..Default::default()
    }
}

fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::from_bytes(&[byte; 32]).unwrap()
}

#[tokio::test]
async fn test_registry_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = database_config(&dir);
    let key = key(1);

    {
        let pool = create_pool(&config).await.unwrap();
        assert!(validate_migrations(&pool).await.unwrap());

        let registry = Registry::new(pool.clone());
        let instance = Registry::new_instance("svc", "plan", "instance-1", "cf", &key).unwrap();
        registry.save_instance(&instance).await.unwrap();
        registry.bind("instance-1", "binding-1", "reporting", UserType::Standard, &key).await.unwrap();
        pool.close().await;
    }

    let registry = Registry::new(create_pool(&config).await.unwrap());
    let instance = registry.get_instance("instance-1").await.unwrap();

    assert_eq!(instance.db_name, "cf_instance_1");
    assert_eq!(instance.users.len(), 2);
    let user = instance.user("reporting").unwrap();
    assert_eq!(user.bindings.len(), 1);
    assert_eq!(user.password(&key).unwrap().len(), 24);
    assert!(instance.master_user().unwrap().password(&key).is_ok());
}

#[tokio::test]
async fn test_key_rotation_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let registry = Registry::new(create_pool(&database_config(&dir)).await.unwrap());
    let (old_key, new_key) = (key(1), key(2));

    for id in ["instance-1", "instance-2"] {
        let instance = Registry::new_instance("svc", "plan", id, "cf", &old_key).unwrap();
        registry.save_instance(&instance).await.unwrap();
    }
    let before = registry.get_instance("instance-1").await.unwrap();
    let master_password = before.master_user().unwrap().password(&old_key).unwrap();

    assert_eq!(registry.rotate_key(&old_key, &new_key, false).await.unwrap(), 2);

    let after = registry.get_instance("instance-1").await.unwrap();
    let master = after.master_user().unwrap();
    assert_eq!(master.password(&new_key).unwrap(), master_password);
    assert!(master.password(&old_key).is_err());

    let err = registry.rotate_key(&old_key, &new_key, false).await.unwrap_err();
    assert!(matches!(err, BrokerError::KeyRotation { failures: 2 }));
    assert!(err.to_string().contains("2 errors"));
}
