use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{HistoryError, HistoryResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub name: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: String,
    pub label: String,
}

/// One row per distinct item ever played. Field names match the export
/// document format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenRecord {
    pub id: String,
    pub canonical_uri: String,
    pub title: String,
    pub duration_ms: u64,
    pub album: Album,
    pub artists: Vec<Artist>,
    pub images: Vec<Image>,
    /// Opaque to the store, passed through unmodified.
    pub metadata: Map<String, Value>,
    pub last_listen_timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UpsertOutcome {
    Inserted,
    /// An existing row for the same canonical uri had its timestamp replaced.
    Updated,
}

/// Raw row as stored in SQLite; nested fields are JSON text.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListenRow {
    pub id: String,
    pub canonical_uri: String,
    pub title: String,
    pub duration_ms: i64,
    pub album_name: String,
    pub album_uri: String,
    pub artists_json: String,
    pub images_json: String,
    pub metadata_json: String,
    pub last_listen_timestamp: i64,
}

impl ListenRow {
    pub fn from_record(record: &ListenRecord) -> HistoryResult<Self> {
        let duration_ms = i64::try_from(record.duration_ms).map_err(|_| {
            HistoryError::Serialization(format!(
                "durationMs {} does not fit the store",
                record.duration_ms
            ))
        })?;

        Ok(Self {
            id: record.id.clone(),
            canonical_uri: record.canonical_uri.clone(),
            title: record.title.clone(),
            duration_ms,
            album_name: record.album.name.clone(),
            album_uri: record.album.uri.clone(),
            artists_json: serde_json::to_string(&record.artists)?,
            images_json: serde_json::to_string(&record.images)?,
            metadata_json: serde_json::to_string(&record.metadata)?,
            last_listen_timestamp: record.last_listen_timestamp,
        })
    }
}

impl TryFrom<ListenRow> for ListenRecord {
    type Error = HistoryError;

    fn try_from(row: ListenRow) -> Result<Self, Self::Error> {
        Ok(ListenRecord {
            id: row.id,
            canonical_uri: row.canonical_uri,
            title: row.title,
            duration_ms: row.duration_ms.max(0) as u64,
            album: Album {
                name: row.album_name,
                uri: row.album_uri,
            },
            artists: serde_json::from_str(&row.artists_json)?,
            images: serde_json::from_str(&row.images_json)?,
            metadata: serde_json::from_str(&row.metadata_json)?,
            last_listen_timestamp: row.last_listen_timestamp,
        })
    }
}
