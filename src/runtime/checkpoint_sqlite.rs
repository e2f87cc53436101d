//! SQLite-backed checkpointer.
//!
//! Each step row carries the full serialized checkpoint; atomicity comes
//! from writing the run row and the step row in one transaction. Pure
//! serialization lives in [`super::persistence`]; this module is database
//! I/O only.
//!
//! When the `sqlite-migrations` feature is enabled (default), embedded
//! migrations run on connect; disabling it assumes external schema
//! management.

use std::sync::Arc;

use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::checkpoint::{CheckpointError, CheckpointRecord, Checkpointer, Result};
use super::config::resolve_sqlite_db_name;
use super::persistence::PersistedCheckpoint;

/// Durable checkpointer over a SQLite connection pool.
///
/// Storage grows with `runs x steps_per_run x state_size`; long-lived
/// deployments should prune old runs with plain SQL on the `checkpoints`
/// table.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connect (or create) a SQLite database at `database_url`, e.g.
    /// `sqlite://delver.db?mode=rwc`.
    #[must_use = "checkpointer must be used to persist state"]
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("connect error: {e}"),
            })?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(CheckpointError::Backend {
                    message: format!("migration failure: {e}"),
                });
            }
        }
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Connect using the database name resolved from the environment.
    pub async fn connect_default() -> Result<Self> {
        let name = resolve_sqlite_db_name();
        Self::connect(&format!("sqlite://{name}?mode=rwc")).await
    }

    fn row_to_record(row: &SqliteRow) -> Result<CheckpointRecord> {
        let state_json: String = row.get("state_json");
        let persisted =
            PersistedCheckpoint::from_json(&state_json).map_err(|e| CheckpointError::Serde {
                message: e.to_string(),
            })?;
        Ok(CheckpointRecord::from(persisted))
    }
}

#[async_trait::async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, record), fields(run = %record.run_id, step = record.step), err)]
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let persisted = PersistedCheckpoint::from(&record);
        let state_json = persisted.to_json().map_err(|e| CheckpointError::Serde {
            message: e.to_string(),
        })?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CheckpointError::Backend {
                message: format!("tx begin: {e}"),
            })?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO runs (id, topic)
            VALUES (?1, ?2)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.state.topic.title())
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("insert run: {e}"),
        })?;

        // History is append-only; a duplicate step is a protocol violation.
        sqlx::query(
            r#"
            INSERT INTO checkpoints (run_id, step, phase, next_stage, state_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&record.run_id)
        .bind(record.step as i64)
        .bind(&record.phase)
        .bind(record.next_stage.encode())
        .bind(&state_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        tx.commit().await.map_err(|e| CheckpointError::Backend {
            message: format!("tx commit: {e}"),
        })?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn load_latest(&self, run_id: &str) -> Result<Option<CheckpointRecord>> {
        let row: Option<SqliteRow> = sqlx::query(
            r#"
            SELECT state_json FROM checkpoints
            WHERE run_id = ?1
            ORDER BY step DESC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("select latest: {e}"),
        })?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    #[instrument(skip(self), err)]
    async fn history(&self, run_id: &str) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT state_json FROM checkpoints
            WHERE run_id = ?1
            ORDER BY step ASC
            "#,
        )
        .bind(run_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("select history: {e}"),
        })?;

        rows.iter().map(Self::row_to_record).collect()
    }

    #[instrument(skip(self), err)]
    async fn list_runs(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM runs ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| CheckpointError::Backend {
            message: format!("list runs: {e}"),
        })?;

        Ok(rows.into_iter().map(|r| r.get::<String, _>("id")).collect())
    }
}
