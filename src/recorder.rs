//! Entry point for "now playing" transitions.
//!
//! The playback side either calls [`HistoryRecorder::record_play`] directly
//! or pushes [`PlayEvent`]s into the channel of a [`PlaySubscription`].
//! Events sent on one subscription are applied strictly in arrival order.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::errors::HistoryResult;
use crate::history::models::{Album, Artist, Image, ListenRecord, UpsertOutcome};
use crate::history::HistoryStore;

/// Payload delivered once per "now playing" transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    pub id: String,
    pub canonical_uri: String,
    pub title: String,
    pub duration_ms: u64,
    pub album: Album,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PlayEvent {
    pub fn into_record(self, listened_at_ms: i64) -> ListenRecord {
        ListenRecord {
            id: self.id,
            canonical_uri: self.canonical_uri,
            title: self.title,
            duration_ms: self.duration_ms,
            album: self.album,
            artists: self.artists,
            images: self.images,
            metadata: self.metadata,
            last_listen_timestamp: listened_at_ms,
        }
    }
}

#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<HistoryStore>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    /// Record a play stamped with the current time.
    pub async fn record_play(&self, event: PlayEvent) -> HistoryResult<UpsertOutcome> {
        self.record_play_at(event, Utc::now().timestamp_millis()).await
    }

    pub async fn record_play_at(&self, event: PlayEvent, listened_at_ms: i64) -> HistoryResult<UpsertOutcome> {
        let record = event.into_record(listened_at_ms);
        let outcome = self.store.upsert(&record).await?;

        if outcome == UpsertOutcome::Inserted {
            log::info!("Recorded first play of '{}' ({})", record.title, record.canonical_uri);
        }
        Ok(outcome)
    }

    /// Start consuming play events from a bounded channel of `buffer` slots.
    pub fn subscribe(&self, buffer: usize) -> PlaySubscription {
        let (tx, mut rx) = mpsc::channel::<PlayEvent>(buffer.max(1));
        let recorder = self.clone();

        let handle = tokio::spawn(async move {
            log::info!("[HistoryRecorder] Play event subscription started");

            while let Some(event) = rx.recv().await {
                let uri = event.canonical_uri.clone();
                if let Err(e) = recorder.record_play(event).await {
                    log::error!("[HistoryRecorder] Failed to record play of {}: {}", uri, e);
                }
            }

            log::info!("[HistoryRecorder] Play event subscription stopped");
        });

        PlaySubscription { sender: tx, handle }
    }
}

pub struct PlaySubscription {
    sender: mpsc::Sender<PlayEvent>,
    handle: JoinHandle<()>,
}

impl PlaySubscription {
    /// Sending half for the event source. Clones keep the subscription's
    /// consumer alive until they are dropped too.
    pub fn sender(&self) -> mpsc::Sender<PlayEvent> {
        self.sender.clone()
    }

    /// Close this handle's sender and wait until every event already queued
    /// has been written.
    pub async fn unsubscribe(self) {
        drop(self.sender);
        if let Err(e) = self.handle.await {
            log::error!("[HistoryRecorder] Subscription task ended abnormally: {}", e);
        }
    }
}
