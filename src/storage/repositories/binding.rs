//! Binding rows

use crate::domain::Binding;
use crate::errors::{BrokerError, Result};
use crate::storage::DbPool;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqliteConnection};
use tracing::instrument;

#[derive(Debug, Clone, FromRow)]
struct BindingRow {
    pub id: String,
    pub user_id: String,
    pub binding_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<BindingRow> for Binding {
    fn from(row: BindingRow) -> Self {
        Binding {
            id: row.id,
            binding_id: row.binding_id,
            user_id: row.user_id,
            created_at: row.created_at,
        }
    }
}

/// Repository for binding rows
#[derive(Debug, Clone)]
pub struct BindingRepository {
    pool: DbPool,
}

impl BindingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All bindings held by users of `instance_id`
    #[instrument(skip(self), name = "db_list_bindings_for_instance")]
    pub async fn list_for_instance(&self, instance_id: &str) -> Result<Vec<Binding>> {
        let rows = sqlx::query_as::<_, BindingRow>(
            "SELECT b.id, b.user_id, b.binding_id, b.created_at \
             FROM bindings b JOIN users u ON b.user_id = u.id \
             WHERE u.instance_id = ? ORDER BY b.created_at",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, instance_id = %instance_id, "Failed to list bindings");
            BrokerError::database(e, format!("Failed to list bindings for instance '{}'", instance_id))
        })?;

        Ok(rows.into_iter().map(Binding::from).collect())
    }

    #[instrument(skip(self), name = "db_find_binding")]
    pub async fn find_by_binding_id(&self, binding_id: &str) -> Result<Option<Binding>> {
        let row = sqlx::query_as::<_, BindingRow>(
            "SELECT id, user_id, binding_id, created_at FROM bindings WHERE binding_id = ?",
        )
        .bind(binding_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BrokerError::database(e, format!("Failed to get binding '{}'", binding_id)))?;

        Ok(row.map(Binding::from))
    }

    /// Insert a new binding; a duplicate binding ID is a conflict
    #[instrument(skip(self, binding), fields(binding_id = %binding.binding_id), name = "db_insert_binding")]
    pub async fn insert(&self, binding: &Binding) -> Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| BrokerError::database(e, "Failed to acquire registry connection"))?;
        insert(&mut conn, binding).await
    }

    /// Delete a binding by row ID, returning whether a row was removed
    #[instrument(skip(self), name = "db_delete_binding")]
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bindings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| BrokerError::database(e, format!("Failed to delete binding '{}'", id)))?;

        Ok(result.rows_affected() > 0)
    }
}

pub(crate) async fn insert(conn: &mut SqliteConnection, binding: &Binding) -> Result<()> {
    sqlx::query("INSERT INTO bindings (id, user_id, binding_id, created_at) VALUES (?, ?, ?, ?)")
        .bind(&binding.id)
        .bind(&binding.user_id)
        .bind(&binding.binding_id)
        .bind(binding.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                BrokerError::conflict(
                    format!("Binding '{}' already exists", binding.binding_id),
                    "binding",
                )
            }
            e => BrokerError::database(
                e,
                format!("Failed to create binding '{}'", binding.binding_id),
            ),
        })?;

    Ok(())
}

/// Insert unless a row with the same row ID is already stored
pub(crate) async fn insert_if_absent(conn: &mut SqliteConnection, binding: &Binding) -> Result<()> {
    sqlx::query(
        "INSERT INTO bindings (id, user_id, binding_id, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&binding.id)
    .bind(&binding.user_id)
    .bind(&binding.binding_id)
    .bind(binding.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        BrokerError::database(e, format!("Failed to save binding '{}'", binding.binding_id))
    })?;

    Ok(())
}
