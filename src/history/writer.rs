//! Single writer for `listen_records`.
//!
//! Every mutation is sent as a [`WriteCommand`] to one task that owns the
//! write side of the pool and applies commands in arrival order. The task
//! outlives the caller's future: a caller that stops awaiting the reply does
//! not cancel the write.

use sqlx::{Pool, Sqlite, SqliteConnection};
use tokio::sync::{mpsc, oneshot};

use super::index;
use super::models::{ListenRecord, ListenRow, UpsertOutcome};
use crate::errors::{ConflictKey, HistoryResult};

const INSERT_RECORD: &str = r#"
    INSERT INTO listen_records (
        id, canonical_uri, title, duration_ms, album_name, album_uri,
        artists_json, images_json, metadata_json, last_listen_timestamp
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

/// Per-record result of a bulk insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkInsert {
    Inserted,
    Conflict(ConflictKey),
}

pub type Reply<T> = oneshot::Sender<HistoryResult<T>>;

pub enum WriteCommand {
    Upsert(ListenRecord, Reply<UpsertOutcome>),
    Insert(ListenRecord, Reply<()>),
    InsertMany(Vec<ListenRecord>, Reply<Vec<BulkInsert>>),
    Delete(String, Reply<bool>),
    Clear(Reply<u64>),
}

pub fn spawn_writer(pool: Pool<Sqlite>) -> mpsc::UnboundedSender<WriteCommand> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WriteCommand>();

    tokio::spawn(async move {
        log::debug!("[HistoryWriter] Writer started");

        while let Some(command) = rx.recv().await {
            // A dropped receiver only means the caller stopped waiting.
            match command {
                WriteCommand::Upsert(record, reply) => {
                    let _ = reply.send(upsert(&pool, &record).await);
                }
                WriteCommand::Insert(record, reply) => {
                    let _ = reply.send(insert(&pool, &record).await);
                }
                WriteCommand::InsertMany(records, reply) => {
                    let _ = reply.send(insert_many(&pool, &records).await);
                }
                WriteCommand::Delete(id, reply) => {
                    let _ = reply.send(delete_by_id(&pool, &id).await);
                }
                WriteCommand::Clear(reply) => {
                    let _ = reply.send(clear(&pool).await);
                }
            }
        }

        log::debug!("[HistoryWriter] Writer stopped");
    });

    tx
}

async fn upsert(pool: &Pool<Sqlite>, record: &ListenRecord) -> HistoryResult<UpsertOutcome> {
    let row = ListenRow::from_record(record)?;
    let mut tx = pool.begin().await?;

    let outcome = match index::find_id_by_canonical_uri(&mut tx, &record.canonical_uri).await? {
        Some(existing_id) => {
            update_timestamp(&mut tx, &existing_id, record.last_listen_timestamp).await?;
            UpsertOutcome::Updated
        }
        None => match insert_row(&mut tx, &row).await {
            Ok(()) => UpsertOutcome::Inserted,
            // Another process writing the same database file got there first:
            // fall back to the update path.
            Err(e) if index::conflict_key(&e) == Some(ConflictKey::CanonicalUri) => {
                let existing_id = index::find_id_by_canonical_uri(&mut tx, &record.canonical_uri)
                    .await?
                    .ok_or_else(|| index::classify(e, record))?;
                update_timestamp(&mut tx, &existing_id, record.last_listen_timestamp).await?;
                UpsertOutcome::Updated
            }
            Err(e) => return Err(index::classify(e, record)),
        },
    };

    tx.commit().await?;

    log::debug!(
        "Upserted listen record {} ({}): {:?}",
        record.id,
        record.canonical_uri,
        outcome
    );
    Ok(outcome)
}

async fn insert(pool: &Pool<Sqlite>, record: &ListenRecord) -> HistoryResult<()> {
    let row = ListenRow::from_record(record)?;
    let mut conn = pool.acquire().await?;
    insert_row(&mut conn, &row)
        .await
        .map_err(|e| index::classify(e, record))
}

async fn insert_many(pool: &Pool<Sqlite>, records: &[ListenRecord]) -> HistoryResult<Vec<BulkInsert>> {
    let rows = records
        .iter()
        .map(ListenRow::from_record)
        .collect::<HistoryResult<Vec<_>>>()?;

    let mut tx = pool.begin().await?;
    let mut results = Vec::with_capacity(rows.len());

    for (row, record) in rows.iter().zip(records) {
        // A failed statement only rolls back itself, the transaction stays open.
        match insert_row(&mut tx, row).await {
            Ok(()) => results.push(BulkInsert::Inserted),
            Err(e) => match index::conflict_key(&e) {
                Some(key) => results.push(BulkInsert::Conflict(key)),
                None => return Err(index::classify(e, record)),
            },
        }
    }

    tx.commit().await?;
    Ok(results)
}

async fn delete_by_id(pool: &Pool<Sqlite>, id: &str) -> HistoryResult<bool> {
    let result = sqlx::query("DELETE FROM listen_records WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    let removed = result.rows_affected() > 0;
    if !removed {
        log::debug!("Delete of unknown listen record {} ignored", id);
    }
    Ok(removed)
}

async fn clear(pool: &Pool<Sqlite>) -> HistoryResult<u64> {
    let result = sqlx::query("DELETE FROM listen_records").execute(pool).await?;

    let count = result.rows_affected();
    log::info!("Listen history cleared ({} records)", count);
    Ok(count)
}

async fn insert_row(conn: &mut SqliteConnection, row: &ListenRow) -> Result<(), sqlx::Error> {
    sqlx::query(INSERT_RECORD)
        .bind(&row.id)
        .bind(&row.canonical_uri)
        .bind(&row.title)
        .bind(row.duration_ms)
        .bind(&row.album_name)
        .bind(&row.album_uri)
        .bind(&row.artists_json)
        .bind(&row.images_json)
        .bind(&row.metadata_json)
        .bind(row.last_listen_timestamp)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn update_timestamp(conn: &mut SqliteConnection, id: &str, timestamp: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE listen_records SET last_listen_timestamp = ? WHERE id = ?")
        .bind(timestamp)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
