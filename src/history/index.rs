//! Secondary indexes over `listen_records`.
//!
//! - `idx_listen_records_canonical_uri`: UNIQUE, `canonical_uri -> id`. Backs
//!   the upsert lookup and enforces one row per logical item at write time.
//! - `idx_listen_records_last_listen`: non-unique, `last_listen_timestamp -> id`.
//!   Backs recency and range queries.
//!
//! Unique violations raised by SQLite are mapped to `HistoryError::Conflict`
//! by [`classify`] so callers can tell them apart from storage failures.

use sqlx::{Pool, Sqlite, SqliteConnection};

use crate::errors::{ConflictKey, HistoryError};
use crate::history::models::{ListenRecord, ListenRow};
use crate::history::SELECT_COLUMNS;

const INDEX_STATEMENTS: [&str; 2] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_listen_records_canonical_uri ON listen_records(canonical_uri)",
    "CREATE INDEX IF NOT EXISTS idx_listen_records_last_listen ON listen_records(last_listen_timestamp)",
];

pub async fn ensure_indexes(pool: &Pool<Sqlite>) -> Result<(), sqlx::Error> {
    for stmt in INDEX_STATEMENTS {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

/// Unique-index lookup used by upsert.
pub async fn find_id_by_canonical_uri(
    conn: &mut SqliteConnection,
    canonical_uri: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>("SELECT id FROM listen_records WHERE canonical_uri = ?")
        .bind(canonical_uri)
        .fetch_optional(&mut *conn)
        .await
}

/// Rows whose `last_listen_timestamp` falls in `[from_ms, to_ms]`, oldest
/// first, read in one statement over the ordering index.
pub async fn rows_in_range(
    conn: &mut SqliteConnection,
    from_ms: i64,
    to_ms: i64,
) -> Result<Vec<ListenRow>, sqlx::Error> {
    sqlx::query_as::<_, ListenRow>(&format!(
        "{} WHERE last_listen_timestamp BETWEEN ? AND ? ORDER BY last_listen_timestamp ASC",
        SELECT_COLUMNS
    ))
    .bind(from_ms)
    .bind(to_ms)
    .fetch_all(&mut *conn)
    .await
}

/// Which unique key a constraint failure refers to, if it is one.
pub fn conflict_key(err: &sqlx::Error) -> Option<ConflictKey> {
    let db_err = match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => db_err,
        _ => return None,
    };

    // SQLite: "UNIQUE constraint failed: listen_records.canonical_uri"
    let message = db_err.message();
    if message.contains("canonical_uri") {
        Some(ConflictKey::CanonicalUri)
    } else {
        Some(ConflictKey::Id)
    }
}

/// Map an insert error for `record` to a `Conflict` when it is a unique
/// violation, or a storage failure otherwise.
pub fn classify(err: sqlx::Error, record: &ListenRecord) -> HistoryError {
    match conflict_key(&err) {
        Some(ConflictKey::CanonicalUri) => HistoryError::Conflict {
            key: ConflictKey::CanonicalUri,
            value: record.canonical_uri.clone(),
        },
        Some(ConflictKey::Id) => HistoryError::Conflict {
            key: ConflictKey::Id,
            value: record.id.clone(),
        },
        None => HistoryError::from(err),
    }
}
