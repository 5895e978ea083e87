pub mod config;
pub mod database;
pub mod errors;
pub mod history;
pub mod recorder;
pub mod transfer;
pub mod view;

pub use config::HistoryConfig;
pub use errors::{ConflictKey, HistoryError, HistoryResult};
pub use history::models::{Album, Artist, Image, ListenRecord, UpsertOutcome};
pub use history::HistoryStore;
pub use recorder::{HistoryRecorder, PlayEvent, PlaySubscription};
pub use transfer::{ExportOutcome, ImportOutcome, ImportReport, TransferSerializer};
pub use view::SortKey;

use std::sync::Arc;

/// The history component as a host wires it up: one store handle opened at
/// startup and shared by the recorder, the transfer serializer and views.
#[derive(Clone)]
pub struct ListenHistory {
    config: HistoryConfig,
    store: Arc<HistoryStore>,
    recorder: HistoryRecorder,
}

impl ListenHistory {
    pub async fn open(config: HistoryConfig) -> HistoryResult<Self> {
        let store = Arc::new(HistoryStore::open(&config).await?);
        let recorder = HistoryRecorder::new(store.clone());

        Ok(Self {
            config,
            store,
            recorder,
        })
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn recorder(&self) -> &HistoryRecorder {
        &self.recorder
    }

    pub async fn record_play(&self, event: PlayEvent) -> HistoryResult<UpsertOutcome> {
        self.recorder.record_play(event).await
    }

    /// Subscribe to play events using the configured channel capacity.
    pub fn subscribe(&self) -> PlaySubscription {
        self.recorder.subscribe(self.config.event_buffer)
    }

    pub fn transfer(&self) -> TransferSerializer<'_> {
        TransferSerializer::new(&self.store).pretty(self.config.pretty_export)
    }

    /// Current snapshot, filtered by `query` and sorted by `key`.
    pub async fn list(&self, key: SortKey, ascending: bool, query: &str) -> HistoryResult<Vec<ListenRecord>> {
        let records = self.store.get_all().await?;
        Ok(view::view(&records, key, ascending, query))
    }

    pub async fn delete(&self, id: &str) -> HistoryResult<bool> {
        self.store.delete_by_id(id).await
    }

    pub async fn clear(&self) -> HistoryResult<u64> {
        self.store.clear().await
    }
}
