//! Sorted and filtered views over a snapshot of listen records.
//!
//! Everything here is pure. The current sort key, direction and search text
//! belong to the caller.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

use crate::history::models::ListenRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    Title,
    Album,
    Date,
    Duration,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "title" => Ok(SortKey::Title),
            "album" => Ok(SortKey::Album),
            "date" => Ok(SortKey::Date),
            "duration" => Ok(SortKey::Duration),
            other => Err(format!("Unknown sort key: {}", other)),
        }
    }
}

/// Case-insensitive ordering first, then lowercase before uppercase for
/// strings that differ only in case, mirroring a default locale collation.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));

    folded.then_with(|| {
        a.chars()
            .zip(b.chars())
            .find(|(x, y)| x != y)
            .map(|(x, y)| match (x.is_lowercase(), y.is_lowercase()) {
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                _ => x.cmp(&y),
            })
            .unwrap_or_else(|| a.len().cmp(&b.len()))
    })
}

fn compare(key: SortKey, a: &ListenRecord, b: &ListenRecord) -> Ordering {
    match key {
        SortKey::Title => locale_compare(&a.title, &b.title),
        SortKey::Album => locale_compare(&a.album.name, &b.album.name),
        SortKey::Date => a.last_listen_timestamp.cmp(&b.last_listen_timestamp),
        SortKey::Duration => a.duration_ms.cmp(&b.duration_ms),
    }
}

/// Stable ascending sort by `key`. Descending is the ascending result
/// reversed, so ties swap their relative order too.
pub fn sort(records: &[ListenRecord], key: SortKey, ascending: bool) -> Vec<ListenRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| compare(key, a, b));
    if !ascending {
        sorted.reverse();
    }
    sorted
}

/// Case-insensitive substring match on title, album name or any artist name.
pub fn matches(record: &ListenRecord, query: &str) -> bool {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return true;
    }

    record.title.to_lowercase().contains(&needle)
        || record.album.name.to_lowercase().contains(&needle)
        || record
            .artists
            .iter()
            .any(|artist| artist.name.to_lowercase().contains(&needle))
}

pub fn filter(records: &[ListenRecord], query: &str) -> Vec<ListenRecord> {
    records
        .iter()
        .filter(|record| matches(record, query))
        .cloned()
        .collect()
}

/// Filter, then sort. What a history list shows for a given key, direction
/// and search text.
pub fn view(records: &[ListenRecord], key: SortKey, ascending: bool, query: &str) -> Vec<ListenRecord> {
    sort(&filter(records, query), key, ascending)
}
