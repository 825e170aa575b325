//! Database user rows and their encrypted passwords

use super::binding;
use crate::domain::{User, UserType};
use crate::errors::{BrokerError, Result};
use crate::storage::DbPool;
use sqlx::{FromRow, SqliteConnection};
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct UserRow {
    pub id: String,
    pub instance_id: String,
    pub username: String,
    pub encrypted_password: Vec<u8>,
    pub iv: Vec<u8>,
    pub user_type: String,
}

impl TryFrom<UserRow> for User {
    type Error = BrokerError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id,
            instance_id: row.instance_id,
            username: row.username,
            encrypted_password: row.encrypted_password,
            iv: row.iv,
            user_type: row.user_type.parse::<UserType>()?,
            bindings: Vec::new(),
        })
    }
}

/// Repository for database user rows
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Users of an instance without their bindings
    #[instrument(skip(self), name = "db_list_users_for_instance")]
    pub async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, instance_id, username, encrypted_password, iv, user_type \
             FROM users WHERE instance_id = ? ORDER BY created_at, rowid",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, instance_id = %instance_id, "Failed to list users");
            BrokerError::database(e, format!("Failed to list users for instance '{}'", instance_id))
        })?;

        rows.into_iter().map(User::try_from).collect()
    }

    /// Insert or update a user together with any bindings not yet stored
    #[instrument(skip(self, user), fields(user_id = %user.id), name = "db_save_user")]
    pub async fn save(&self, user: &User) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to begin user transaction"))?;

        upsert(&mut tx, user).await?;
        for binding in &user.bindings {
            binding::insert_if_absent(&mut tx, binding).await?;
        }

        tx.commit()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to commit user transaction"))?;

        Ok(())
    }

    /// Replace the stored ciphertext and nonce of a user
    #[instrument(skip(self, user), fields(user_id = %user.id), name = "db_update_user_password")]
    pub async fn update_password(&self, user: &User) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET encrypted_password = ?, iv = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&user.encrypted_password)
        .bind(&user.iv)
        .bind(chrono::Utc::now())
        .bind(&user.id)
        .execute(&self.pool)
        .await
        .map_err(|e| BrokerError::database(e, format!("Failed to update password of user '{}'", user.id)))?;

        if result.rows_affected() == 0 {
            return Err(BrokerError::not_found("user", user.id.clone()));
        }

        Ok(())
    }

    /// Delete a user and its bindings, returning whether the user row existed
    #[instrument(skip(self), name = "db_delete_user")]
    pub async fn delete(&self, user_id: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to begin user transaction"))?;

        let deleted = delete(&mut tx, user_id).await?;

        tx.commit()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to commit user transaction"))?;

        Ok(deleted)
    }
}

pub(crate) async fn upsert(conn: &mut SqliteConnection, user: &User) -> Result<()> {
    let now = chrono::Utc::now();

    sqlx::query(
        "INSERT INTO users (id, instance_id, username, encrypted_password, iv, user_type, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET encrypted_password = excluded.encrypted_password, \
         iv = excluded.iv, updated_at = excluded.updated_at",
    )
    .bind(&user.id)
    .bind(&user.instance_id)
    .bind(&user.username)
    .bind(&user.encrypted_password)
    .bind(&user.iv)
    .bind(user.user_type.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => BrokerError::conflict(
            format!(
                "User '{}' already exists on instance '{}'",
                user.username, user.instance_id
            ),
            "user",
        ),
        e => BrokerError::database(e, format!("Failed to save user '{}'", user.id)),
    })?;

    Ok(())
}

pub(crate) async fn delete(conn: &mut SqliteConnection, user_id: &str) -> Result<bool> {
    sqlx::query("DELETE FROM bindings WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| BrokerError::database(e, format!("Failed to delete bindings of user '{}'", user_id)))?;

    let result = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| BrokerError::database(e, format!("Failed to delete user '{}'", user_id)))?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Binding, Instance};
    use crate::storage::InstanceRepository;
    use crate::test_helpers::{test_key, TestDatabase};

    async fn saved_instance(db: &TestDatabase) -> Instance {
        let instance = Instance::new("svc", "plan", "instance-1", "cf", &test_key()).unwrap();
        InstanceRepository::new(db.pool.clone()).save(&instance).await.unwrap();
        instance
    }

    #[tokio::test]
    async fn test_save_and_list_with_bindings() {
        let db = TestDatabase::new().await;
        saved_instance(&db).await;
        let repo = UserRepository::new(db.pool.clone());

        let mut user = User::new("instance-1", "reporting".to_string(), UserType::Standard, &test_key()).unwrap();
        user.bindings.push(Binding::new(&user.id, "binding-1"));
        repo.save(&user).await.unwrap();
        // Saving again leaves the stored binding alone
        repo.save(&user).await.unwrap();

        let users = repo.list_for_instance("instance-1").await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].username, "reporting");
        assert_eq!(users[1].user_type, UserType::Standard);
        assert_eq!(users[1].password(&test_key()).unwrap(), user.password(&test_key()).unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let db = TestDatabase::new().await;
        saved_instance(&db).await;
        let repo = UserRepository::new(db.pool.clone());

        let first = User::new("instance-1", "reporting".to_string(), UserType::Standard, &test_key()).unwrap();
        let second = User::new("instance-1", "reporting".to_string(), UserType::Standard, &test_key()).unwrap();
        repo.save(&first).await.unwrap();

        let err = repo.save(&second).await.unwrap_err();
        assert!(matches!(err, BrokerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_password_of_missing_user() {
        let db = TestDatabase::new().await;
        saved_instance(&db).await;
        let repo = UserRepository::new(db.pool.clone());

        let ghost = User::new("instance-1", "ghost".to_string(), UserType::Standard, &test_key()).unwrap();
        let err = repo.update_password(&ghost).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_removes_bindings() {
        let db = TestDatabase::new().await;
        saved_instance(&db).await;
        let repo = UserRepository::new(db.pool.clone());

        let mut user = User::new("instance-1", "reporting".to_string(), UserType::Standard, &test_key()).unwrap();
        user.bindings.push(Binding::new(&user.id, "binding-1"));
        repo.save(&user).await.unwrap();

        assert!(repo.delete(&user.id).await.unwrap());
        assert!(!repo.delete(&user.id).await.unwrap());

        let bindings = crate::storage::BindingRepository::new(db.pool.clone());
        assert!(bindings.find_by_binding_id("binding-1").await.unwrap().is_none());
    }
}
