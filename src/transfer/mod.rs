//! Export and import of the listen history as a JSON document.
//!
//! The document is a UTF-8 JSON array of `ListenRecord`s ordered by
//! `lastListenTimestamp`, oldest first. Import is all-or-nothing with
//! respect to validation: one invalid element rejects the whole document
//! before anything is written. Records that collide with an existing row
//! are skipped and reported, never overwritten.

pub mod validation;

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::errors::{ConflictKey, HistoryError, HistoryResult};
use crate::history::{BulkInsert, HistoryStore};
use crate::view::{self, SortKey};

#[derive(Debug)]
pub enum ExportOutcome {
    Document(Vec<u8>),
    /// Nothing to export; no document was produced.
    EmptyHistory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ImportOutcome {
    Inserted { index: usize, id: String },
    Skipped { index: usize, id: String, conflict: ConflictKey },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub outcomes: Vec<ImportOutcome>,
}

impl ImportReport {
    pub fn inserted(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ImportOutcome::Inserted { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.inserted()
    }
}

pub struct TransferSerializer<'a> {
    store: &'a HistoryStore,
    pretty: bool,
}

impl<'a> TransferSerializer<'a> {
    pub fn new(store: &'a HistoryStore) -> Self {
        Self { store, pretty: true }
    }

    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub async fn export(&self) -> HistoryResult<ExportOutcome> {
        let records = self.store.get_all().await?;
        if records.is_empty() {
            log::info!("Export skipped: listen history is empty");
            return Ok(ExportOutcome::EmptyHistory);
        }

        let ordered = view::sort(&records, SortKey::Date, true);
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&ordered)?
        } else {
            serde_json::to_vec(&ordered)?
        };

        log::info!("Exported {} listen records ({} bytes)", ordered.len(), bytes.len());
        Ok(ExportOutcome::Document(bytes))
    }

    /// Export to `path`. Returns the number of bytes written, or `None` when
    /// the history is empty and no file was created.
    pub async fn export_to_file(&self, path: &Path) -> HistoryResult<Option<usize>> {
        match self.export().await? {
            ExportOutcome::Document(bytes) => {
                fs::write(path, &bytes)?;
                Ok(Some(bytes.len()))
            }
            ExportOutcome::EmptyHistory => Ok(None),
        }
    }

    pub async fn import(&self, document: &[u8]) -> HistoryResult<ImportReport> {
        let parsed: Value = serde_json::from_slice(document)
            .map_err(|e| HistoryError::MalformedDocument(e.to_string()))?;

        let Value::Array(items) = parsed else {
            return Err(HistoryError::MalformedDocument(
                "expected a JSON array of listen records".to_string(),
            ));
        };

        let records = validation::validate_all(&items).map_err(|failures| {
            log::warn!(
                "Import rejected: {} of {} records failed validation",
                failures.len(),
                items.len()
            );
            HistoryError::Validation(failures)
        })?;

        let results = self.store.insert_many(&records).await?;

        let outcomes: Vec<ImportOutcome> = records
            .iter()
            .zip(results)
            .enumerate()
            .map(|(index, (record, result))| match result {
                BulkInsert::Inserted => ImportOutcome::Inserted {
                    index,
                    id: record.id.clone(),
                },
                BulkInsert::Conflict(conflict) => {
                    log::warn!(
                        "Import skipped record {} ({}): duplicate {}",
                        index,
                        record.id,
                        conflict
                    );
                    ImportOutcome::Skipped {
                        index,
                        id: record.id.clone(),
                        conflict,
                    }
                }
            })
            .collect();

        let report = ImportReport { outcomes };
        log::info!(
            "Imported {} listen records, skipped {}",
            report.inserted(),
            report.skipped()
        );
        Ok(report)
    }

    pub async fn import_from_file(&self, path: &Path) -> HistoryResult<ImportReport> {
        let bytes = fs::read(path)?;
        self.import(&bytes).await
    }
}
