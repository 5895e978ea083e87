pub mod index;
pub mod models;
pub mod writer;

use models::{ListenRecord, ListenRow, UpsertOutcome};
use sqlx::{Pool, Sqlite};
use tokio::sync::{mpsc, oneshot};

use crate::config::HistoryConfig;
use crate::database::DatabaseManager;
use crate::errors::{HistoryError, HistoryResult};

pub use writer::BulkInsert;
use writer::{Reply, WriteCommand};

pub(crate) const SELECT_COLUMNS: &str = r#"
    SELECT id, canonical_uri, title, duration_ms, album_name, album_uri,
           artists_json, images_json, metadata_json, last_listen_timestamp
    FROM listen_records
"#;

/// Owner of the `listen_records` table.
///
/// Writes are queued to a single writer task and applied in the order they
/// were submitted, so a lookup-then-write upsert never interleaves with
/// another upsert, delete or clear. A queued write completes even if the
/// caller stops awaiting it. Reads run as single statements on the pool and
/// see either the state before or after any given write.
///
/// Must be constructed inside a tokio runtime.
pub struct HistoryStore {
    pool: Pool<Sqlite>,
    writer: mpsc::UnboundedSender<WriteCommand>,
}

impl HistoryStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        let writer = writer::spawn_writer(pool.clone());
        Self { pool, writer }
    }

    pub async fn open(config: &HistoryConfig) -> HistoryResult<Self> {
        let db = DatabaseManager::open(config).await?;
        Ok(Self::new(db.pool))
    }

    /// Queue a write and wait for its result. The command is enqueued
    /// before the first suspension point.
    async fn submit<T>(&self, command: impl FnOnce(Reply<T>) -> WriteCommand) -> HistoryResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.writer
            .send(command(reply_tx))
            .map_err(|_| HistoryError::StorageUnavailable("history writer has stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| HistoryError::Storage("history writer dropped the request".to_string()))?
    }

    /// Insert `record`, or if a row with the same canonical uri exists,
    /// replace only its `last_listen_timestamp`.
    pub async fn upsert(&self, record: &ListenRecord) -> HistoryResult<UpsertOutcome> {
        self.submit(|reply| WriteCommand::Upsert(record.clone(), reply)).await
    }

    /// Plain insert. A duplicate `id` or `canonical_uri` is a `Conflict`.
    pub async fn insert(&self, record: &ListenRecord) -> HistoryResult<()> {
        self.submit(|reply| WriteCommand::Insert(record.clone(), reply)).await
    }

    /// Insert every record in one transaction. Records colliding with an
    /// existing row (or an earlier record of the same batch) are skipped and
    /// reported; any other failure rolls back the whole batch.
    pub async fn insert_many(&self, records: &[ListenRecord]) -> HistoryResult<Vec<BulkInsert>> {
        self.submit(|reply| WriteCommand::InsertMany(records.to_vec(), reply)).await
    }

    /// Every record, in no particular order.
    pub async fn get_all(&self) -> HistoryResult<Vec<ListenRecord>> {
        let rows = sqlx::query_as::<_, ListenRow>(SELECT_COLUMNS)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(ListenRecord::try_from).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> HistoryResult<ListenRecord> {
        let row = sqlx::query_as::<_, ListenRow>(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => ListenRecord::try_from(row),
            None => Err(HistoryError::NotFound(id.to_string())),
        }
    }

    pub async fn count(&self) -> HistoryResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM listen_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Most recently listened records, newest first.
    pub async fn recent(&self, limit: i64) -> HistoryResult<Vec<ListenRecord>> {
        let rows = sqlx::query_as::<_, ListenRow>(&format!(
            "{} ORDER BY last_listen_timestamp DESC LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ListenRecord::try_from).collect()
    }

    /// Records last listened within `[from_ms, to_ms]`, oldest first.
    pub async fn listened_between(&self, from_ms: i64, to_ms: i64) -> HistoryResult<Vec<ListenRecord>> {
        let mut conn = self.pool.acquire().await?;
        let rows = index::rows_in_range(&mut conn, from_ms, to_ms).await?;

        rows.into_iter().map(ListenRecord::try_from).collect()
    }

    /// Remove the row with primary key `id`. Missing ids are not an error;
    /// the return value says whether anything was removed.
    pub async fn delete_by_id(&self, id: &str) -> HistoryResult<bool> {
        self.submit(|reply| WriteCommand::Delete(id.to_string(), reply)).await
    }

    /// Remove all rows. Returns the number of rows removed.
    pub async fn clear(&self) -> HistoryResult<u64> {
        self.submit(WriteCommand::Clear).await
    }
}

#[cfg(test)]
mod tests {
    use super::models::fixtures::record;
    use super::*;
    use crate::errors::ConflictKey;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn store() -> HistoryStore {
        let _ = env_logger::builder().is_test(true).try_init();
        HistoryStore::open(&HistoryConfig::in_memory()).await.unwrap()
    }

    /// File-backed store with a multi-connection pool, so reads overlap writes.
    async fn file_store() -> (tempfile::TempDir, HistoryStore) {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut config = HistoryConfig::with_database_path(dir.path().join("history.db"));
        config.max_connections = 4;
        let store = HistoryStore::open(&config).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_upsert_replay_only_replaces_timestamp() {
        let store = store().await;
        let first = record("1", "spotify:track:1", 1_000);
        assert_eq!(store.upsert(&first).await.unwrap(), UpsertOutcome::Inserted);

        let mut replay = first.clone();
        replay.title = "Changed title".to_string();
        replay.artists.reverse();
        replay.last_listen_timestamp = 2_000;
        assert_eq!(store.upsert(&replay).await.unwrap(), UpsertOutcome::Updated);

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        let stored = &all[0];
        assert_eq!(stored.title, first.title);
        assert_eq!(stored.artists, first.artists);
        assert_eq!(stored.metadata, first.metadata);
        assert_eq!(stored.last_listen_timestamp, 2_000);
    }

    #[tokio::test]
    async fn test_upsert_replaces_with_older_timestamp() {
        let store = store().await;
        store.upsert(&record("1", "u", 5_000)).await.unwrap();
        store.upsert(&record("1", "u", 3_000)).await.unwrap();
        assert_eq!(store.get_by_id("1").await.unwrap().last_listen_timestamp, 3_000);
    }

    #[tokio::test]
    async fn test_upsert_matches_on_canonical_uri_not_id() {
        let store = store().await;
        store.upsert(&record("1", "u", 1)).await.unwrap();
        // same logical item delivered under a different upstream id
        assert_eq!(
            store.upsert(&record("2", "u", 2)).await.unwrap(),
            UpsertOutcome::Updated
        );

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "1");
        assert_eq!(all[0].last_listen_timestamp, 2);
    }

    #[tokio::test]
    async fn test_upsert_id_collision_is_conflict() {
        let store = store().await;
        store.upsert(&record("1", "u:a", 1)).await.unwrap();

        let err = store.upsert(&record("1", "u:b", 2)).await.unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Conflict { key: ConflictKey::Id, .. }
        ));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_keep_one_row_per_uri() {
        let (_dir, store) = file_store().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..40i64 {
            let writer = store.clone();
            handles.push(tokio::spawn(async move {
                let uri = format!("spotify:track:{}", i % 4);
                let id = format!("{}", i % 4);
                writer.upsert(&record(&id, &uri, i)).await.map(|_| ())
            }));
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.get_all().await.map(|_| ()) }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let all = store.get_all().await.unwrap();
        assert_eq!(all.len(), 4);

        let uris: HashSet<_> = all.iter().map(|r| r.canonical_uri.clone()).collect();
        let ids: HashSet<_> = all.iter().map(|r| r.id.clone()).collect();
        assert_eq!(uris.len(), 4);
        assert_eq!(ids.len(), 4);
    }

    #[tokio::test]
    async fn test_sequential_upserts_apply_in_order() {
        let store = store().await;
        for ts in [10, 30, 20] {
            store.upsert(&record("1", "u", ts)).await.unwrap();
        }
        assert_eq!(store.get_by_id("1").await.unwrap().last_listen_timestamp, 20);
    }

    #[tokio::test]
    async fn test_insert_reports_conflicts() {
        let store = store().await;
        store.insert(&record("1", "u:a", 1)).await.unwrap();

        let err = store.insert(&record("2", "u:a", 1)).await.unwrap_err();
        match err {
            HistoryError::Conflict { key, value } => {
                assert_eq!(key, ConflictKey::CanonicalUri);
                assert_eq!(value, "u:a");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store().await;
        store.upsert(&record("1", "u", 1)).await.unwrap();

        assert!(store.delete_by_id("1").await.unwrap());
        assert!(!store.delete_by_id("1").await.unwrap());
        assert!(!store.delete_by_id("never-existed").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_by_id_missing_is_not_found() {
        let store = store().await;
        assert!(matches!(
            store.get_by_id("nope").await,
            Err(HistoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_empties_table() {
        let store = store().await;
        for i in 0..5 {
            store.upsert(&record(&i.to_string(), &format!("u:{}", i), i)).await.unwrap();
        }
        assert_eq!(store.clear().await.unwrap(), 5);
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_get_all_during_clear_sees_whole_state() {
        let (_dir, store) = file_store().await;
        let store = Arc::new(store);
        let batch: Vec<_> = (0..200)
            .map(|i: i64| record(&i.to_string(), &format!("u:{}", i), i))
            .collect();
        store.insert_many(&batch).await.unwrap();

        let mut readers = Vec::new();
        for _ in 0..3 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let mut sizes = Vec::new();
                for _ in 0..20 {
                    sizes.push(store.get_all().await.unwrap().len());
                    tokio::task::yield_now().await;
                }
                sizes
            }));
        }
        tokio::task::yield_now().await;
        store.clear().await.unwrap();

        for reader in readers {
            for size in reader.await.unwrap() {
                assert!(size == 0 || size == 200, "observed partial state of {} rows", size);
            }
        }
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_writes_still_complete() {
        let store = store().await;

        let first = record("1", "u:1", 1);
        tokio::select! {
            biased;
            _ = store.upsert(&first) => {}
            _ = async {} => {}
        }
        // writes apply in submission order, so this one lands after the upsert
        store.delete_by_id("unrelated").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);

        store.upsert(&record("2", "u:2", 2)).await.unwrap();
        store.upsert(&record("3", "u:3", 3)).await.unwrap();
        tokio::select! {
            biased;
            _ = store.clear() => {}
            _ = async {} => {}
        }
        store.delete_by_id("unrelated").await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_upsert_survives_timeout() {
        let store = store().await;
        let replay = record("1", "u:1", 50);
        store.upsert(&record("1", "u:1", 10)).await.unwrap();

        let _ = tokio::time::timeout(std::time::Duration::ZERO, store.upsert(&replay)).await;
        store.delete_by_id("unrelated").await.unwrap();

        assert_eq!(store.get_by_id("1").await.unwrap().last_listen_timestamp, 50);
    }

    #[tokio::test]
    async fn test_insert_many_skips_conflicts() {
        let store = store().await;
        store.upsert(&record("1", "u:1", 1)).await.unwrap();

        let batch = vec![
            record("2", "u:2", 2),
            record("3", "u:1", 3),
            record("2", "u:4", 4),
            record("5", "u:5", 5),
        ];
        let results = store.insert_many(&batch).await.unwrap();
        assert_eq!(
            results,
            vec![
                BulkInsert::Inserted,
                BulkInsert::Conflict(ConflictKey::CanonicalUri),
                BulkInsert::Conflict(ConflictKey::Id),
                BulkInsert::Inserted,
            ]
        );
        assert_eq!(store.count().await.unwrap(), 3);
        // the existing row was not overwritten
        assert_eq!(store.get_by_id("1").await.unwrap().last_listen_timestamp, 1);
    }

    #[tokio::test]
    async fn test_recent_and_range_queries() {
        let store = store().await;
        store.upsert(&record("a", "u:a", 300)).await.unwrap();
        store.upsert(&record("b", "u:b", 100)).await.unwrap();
        store.upsert(&record("c", "u:c", 200)).await.unwrap();

        let recent: Vec<_> = store.recent(2).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(recent, vec!["a", "c"]);

        let range: Vec<_> = store
            .listened_between(100, 200)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(range, vec!["b", "c"]);
    }
}
