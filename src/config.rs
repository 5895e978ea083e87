use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{HistoryError, HistoryResult};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_EVENT_BUFFER: usize = 64;

pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sonami")
}

pub fn get_database_path() -> PathBuf {
    get_data_dir().join("history.db")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub database_path: PathBuf,
    /// Keep the table in memory instead of `database_path`.
    pub in_memory: bool,
    pub max_connections: u32,
    /// Capacity of the play-event channel handed out by `HistoryRecorder::subscribe`.
    pub event_buffer: usize,
    pub pretty_export: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_path: get_database_path(),
            in_memory: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            pretty_export: true,
        }
    }
}

impl HistoryConfig {
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            max_connections: 1,
            ..Self::default()
        }
    }

    pub fn with_database_path(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> HistoryResult<Self> {
        if !path.exists() {
            log::info!("No history config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)?;
        let config: HistoryConfig = serde_json::from_str(&raw)
            .map_err(|e| HistoryError::Serialization(format!("Invalid config {:?}: {}", path, e)))?;

        Ok(config)
    }
}
