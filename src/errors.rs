use serde::Serialize;
use thiserror::Error;

use crate::transfer::validation::RecordViolations;

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Which unique key an insert collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictKey {
    Id,
    CanonicalUri,
}

impl std::fmt::Display for ConflictKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictKey::Id => write!(f, "id"),
            ConflictKey::CanonicalUri => write!(f, "canonicalUri"),
        }
    }
}

#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum HistoryError {
    #[error("History database unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Duplicate {key}: {value}")]
    Conflict { key: ConflictKey, value: String },

    #[error("{} record(s) failed validation", .0.len())]
    Validation(Vec<RecordViolations>),

    #[error("Listen record not found: {0}")]
    NotFound(String),

    #[error("Malformed history document: {0}")]
    MalformedDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("File system error: {0}")]
    Io(String),
}

impl HistoryError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, HistoryError::Conflict { .. })
    }
}

// Unique violations are classified by `history::index::classify` before they
// reach this conversion; anything arriving here is a plain storage failure.
impl From<sqlx::Error> for HistoryError {
    fn from(e: sqlx::Error) -> Self {
        HistoryError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for HistoryError {
    fn from(e: std::io::Error) -> Self {
        HistoryError::Io(e.to_string())
    }
}
