use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::fs;
use std::str::FromStr;

use crate::config::HistoryConfig;
use crate::errors::{HistoryError, HistoryResult};
use crate::history::index;

pub struct DatabaseManager {
    pub pool: Pool<Sqlite>,
}

impl DatabaseManager {
    /// Open (or create) the history database described by `config` and
    /// bring the schema and indexes up to date.
    ///
    /// Every failure here is reported as `StorageUnavailable`; calling `open`
    /// again later is a valid retry.
    pub async fn open(config: &HistoryConfig) -> HistoryResult<Self> {
        let pool = if config.in_memory {
            log::info!("Opening in-memory history database");

            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| HistoryError::StorageUnavailable(e.to_string()))?;

            // Every connection to `sqlite::memory:` is its own database, so the
            // pool must hold exactly one connection and never recycle it.
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
                .map_err(|e| {
                    HistoryError::StorageUnavailable(format!("Failed to open database: {}", e))
                })?
        } else {
            let db_path = &config.database_path;

            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .map_err(|e| HistoryError::StorageUnavailable(e.to_string()))?;
                }
            }

            log::info!("Connecting to history database at: {:?}", db_path);

            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(
                    SqliteConnectOptions::new()
                        .filename(db_path)
                        .create_if_missing(true),
                )
                .await
                .map_err(|e| {
                    HistoryError::StorageUnavailable(format!("Failed to connect to database: {}", e))
                })?
        };

        Self::apply_schema(&pool).await?;
        index::ensure_indexes(&pool)
            .await
            .map_err(|e| HistoryError::StorageUnavailable(format!("Failed to create indexes: {}", e)))?;

        Ok(Self { pool })
    }

    async fn apply_schema(pool: &Pool<Sqlite>) -> HistoryResult<()> {
        let schema = include_str!("schema.sql");

        for statement in schema.split(';') {
            let stmt = statement.trim();
            if !stmt.is_empty() {
                sqlx::query(stmt).execute(pool).await.map_err(|e| {
                    HistoryError::StorageUnavailable(format!(
                        "Failed to execute schema statement '{}': {}",
                        stmt, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
