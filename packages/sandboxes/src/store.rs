// ABOUTME: Durable key/value store for serialized sandbox records
// ABOUTME: SQLite-backed get/set/delete/list with the id column as the known-ID index

use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::error::Result;
use crate::types::SandboxRecord;

/// Key/value storage for sandbox records.
///
/// Records are stored as serialized JSON addressed by sandbox ID. The id
/// column doubles as the set of known sandbox IDs for listing. No logic
/// beyond get/set/delete/list lives here; read-modify-write discipline is
/// the registries' responsibility.
pub struct SandboxStore {
    pool: SqlitePool,
}

impl SandboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the backing table if it does not exist yet
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sandboxes (
                id TEXT PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace the record for a sandbox
    pub async fn put(&self, sandbox_id: &str, record: &SandboxRecord) -> Result<()> {
        let body = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO sandboxes (id, record, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sandbox_id)
        .bind(&body)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, sandbox_id: &str) -> Result<Option<SandboxRecord>> {
        let row = sqlx::query("SELECT record FROM sandboxes WHERE id = ?1")
            .bind(sandbox_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("record");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    /// Delete a record; returns whether a record existed
    pub async fn delete(&self, sandbox_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sandboxes WHERE id = ?1")
            .bind(sandbox_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All known sandbox IDs
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM sandboxes")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// All records, keyed by sandbox ID
    pub async fn list_all(&self) -> Result<HashMap<String, SandboxRecord>> {
        let rows = sqlx::query("SELECT id, record FROM sandboxes")
            .fetch_all(&self.pool)
            .await?;

        let mut result = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let body: String = row.get("record");
            result.insert(id, serde_json::from_str(&body)?);
        }

        Ok(result)
    }
}
