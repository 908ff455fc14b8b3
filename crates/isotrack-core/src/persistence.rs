//! SQLite-based persistence for release state
//!
//! One row per release family, replaced inside a transaction.

use crate::error::IsotrackError;
use crate::storage::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use isotrack_types::{PersistedState, ReleaseDescriptor};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// State store backed by a SQLite database
#[derive(Clone, Debug)]
pub struct SqliteStateStore {
    pool: SqlitePool,
    /// Release family this store reads and writes
    key: String,
}

impl SqliteStateStore {
    /// Open (or create) the database at `db_path`
    pub async fn new<P: AsRef<Path>>(db_path: P, key: String) -> Result<Self, IsotrackError> {
        let path = db_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS release_state (
                release_key TEXT PRIMARY KEY,
                descriptor TEXT NOT NULL,
                verified_at TEXT NOT NULL,
                download_dir TEXT
            );
            "#,
        )
        .execute(&pool)
        .await?;

        // Databases written before the directory was recorded lack the column
        let has_dir: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('release_state') WHERE name = 'download_dir'",
        )
        .fetch_one(&pool)
        .await?;
        if has_dir == 0 {
            debug!(path = %path.display(), "adding download_dir column");
            sqlx::query("ALTER TABLE release_state ADD COLUMN download_dir TEXT")
                .execute(&pool)
                .await?;
        }

        Ok(Self { pool, key })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load_state(&self) -> Result<Option<PersistedState>, IsotrackError> {
        let row = sqlx::query(
            "SELECT descriptor, verified_at, download_dir FROM release_state WHERE release_key = ?",
        )
        .bind(&self.key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        // A row that does not decode counts as no record, like an
        // unreadable JSON state file; the next verified run replaces it.
        let descriptor = match serde_json::from_str::<ReleaseDescriptor>(
            row.get::<String, _>("descriptor").as_str(),
        ) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(key = %self.key, error = %e, "ignoring unreadable release record");
                return Ok(None);
            }
        };
        let verified_at =
            match DateTime::parse_from_rfc3339(row.get::<String, _>("verified_at").as_str()) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "ignoring record with bad verification time");
                    return Ok(None);
                }
            };
        let download_dir = row
            .get::<Option<String>, _>("download_dir")
            .map(PathBuf::from);

        Ok(Some(PersistedState {
            descriptor,
            verified_at,
            download_dir,
        }))
    }

    async fn save_state(&self, state: &PersistedState) -> Result<(), IsotrackError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO release_state (release_key, descriptor, verified_at, download_dir)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(release_key) DO UPDATE SET
                descriptor = excluded.descriptor,
                verified_at = excluded.verified_at,
                download_dir = excluded.download_dir
            "#,
        )
        .bind(&self.key)
        .bind(serde_json::to_string(&state.descriptor)?)
        .bind(state.verified_at.to_rfc3339())
        .bind(
            state
                .download_dir
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned()),
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(key = %self.key, file = %state.descriptor.file_name, "state saved");
        Ok(())
    }
}
