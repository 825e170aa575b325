//! Instance rows, eagerly joined with their users and bindings

use super::{binding, user, BindingRepository, UserRepository};
use crate::domain::Instance;
use crate::errors::{BrokerError, Result};
use crate::storage::DbPool;
use sqlx::FromRow;
use std::collections::HashMap;
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct InstanceRow {
    pub instance_id: String,
    pub service_id: String,
    pub plan_id: String,
    pub db_name: String,
}

/// Repository for instance rows
#[derive(Debug, Clone)]
pub struct InstanceRepository {
    pool: DbPool,
    users: UserRepository,
    bindings: BindingRepository,
}

impl InstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            bindings: BindingRepository::new(pool.clone()),
            pool,
        }
    }

    #[instrument(skip(self), name = "db_instance_exists")]
    pub async fn exists(&self, instance_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                BrokerError::database(e, format!("Failed to check instance '{}'", instance_id))
            })?;

        Ok(count > 0)
    }

    /// Load an instance with all users and their bindings
    #[instrument(skip(self), name = "db_find_instance")]
    pub async fn find(&self, instance_id: &str) -> Result<Option<Instance>> {
        let row = sqlx::query_as::<_, InstanceRow>(
            "SELECT instance_id, service_id, plan_id, db_name FROM instances WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, instance_id = %instance_id, "Failed to get instance");
            BrokerError::database(e, format!("Failed to get instance '{}'", instance_id))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut users = self.users.list_for_instance(instance_id).await?;
        let mut bindings_by_user: HashMap<String, Vec<_>> = HashMap::new();
        for binding in self.bindings.list_for_instance(instance_id).await? {
            bindings_by_user.entry(binding.user_id.clone()).or_default().push(binding);
        }
        for user in &mut users {
            user.bindings = bindings_by_user.remove(&user.id).unwrap_or_default();
        }

        Ok(Some(Instance {
            instance_id: row.instance_id,
            service_id: row.service_id,
            plan_id: row.plan_id,
            db_name: row.db_name,
            users,
        }))
    }

    /// IDs of every registered instance
    #[instrument(skip(self), name = "db_list_instance_ids")]
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT instance_id FROM instances ORDER BY created_at, instance_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BrokerError::database(e, "Failed to list instances"))
    }

    /// Insert or update an instance, its users and any bindings not yet stored
    #[instrument(skip(self, instance), fields(instance_id = %instance.instance_id), name = "db_save_instance")]
    pub async fn save(&self, instance: &Instance) -> Result<()> {
        let now = chrono::Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to begin instance transaction"))?;

        sqlx::query(
            "INSERT INTO instances (instance_id, service_id, plan_id, db_name, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(instance_id) DO UPDATE SET service_id = excluded.service_id, \
             plan_id = excluded.plan_id, db_name = excluded.db_name, updated_at = excluded.updated_at",
        )
        .bind(&instance.instance_id)
        .bind(&instance.service_id)
        .bind(&instance.plan_id)
        .bind(&instance.db_name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, instance_id = %instance.instance_id, "Failed to save instance");
            BrokerError::database(e, format!("Failed to save instance '{}'", instance.instance_id))
        })?;

        for db_user in &instance.users {
            user::upsert(&mut tx, db_user).await?;
            for db_binding in &db_user.bindings {
                binding::insert_if_absent(&mut tx, db_binding).await?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to commit instance transaction"))?;

        tracing::debug!(
            instance_id = %instance.instance_id,
            users = instance.users.len(),
            "Saved instance"
        );

        Ok(())
    }

    /// Delete an instance with its users and bindings
    #[instrument(skip(self), name = "db_delete_instance")]
    pub async fn delete(&self, instance_id: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to begin instance transaction"))?;

        let user_ids: Vec<String> = sqlx::query_scalar("SELECT id FROM users WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| {
                BrokerError::database(e, format!("Failed to list users of instance '{}'", instance_id))
            })?;

        for user_id in &user_ids {
            user::delete(&mut tx, user_id).await?;
        }

        let result = sqlx::query("DELETE FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                BrokerError::database(e, format!("Failed to delete instance '{}'", instance_id))
            })?;

        tx.commit()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to commit instance transaction"))?;

        Ok(result.rows_affected() > 0)
    }
}
