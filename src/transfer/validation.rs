//! Schema validation for imported listen records.
//!
//! Works on raw `serde_json::Value`s so a single pass can report every
//! violated field of a record instead of stopping at the first one.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::history::models::ListenRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    Missing,
    WrongType { expected: &'static str },
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    /// Path of the field inside the record, e.g. `artists[1].name`.
    pub field: String,
    pub kind: ViolationKind,
}

/// Every violation found in the record at `index` of the import document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordViolations {
    pub index: usize,
    pub violations: Vec<FieldViolation>,
}

#[derive(Default)]
struct Checker {
    violations: Vec<FieldViolation>,
}

impl Checker {
    fn push(&mut self, field: impl Into<String>, kind: ViolationKind) {
        self.violations.push(FieldViolation {
            field: field.into(),
            kind,
        });
    }

    fn field<'a>(&mut self, obj: &'a Map<String, Value>, key: &str, path: &str) -> Option<&'a Value> {
        match obj.get(key) {
            Some(value) => Some(value),
            None => {
                self.push(path, ViolationKind::Missing);
                None
            }
        }
    }

    fn string(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        if let Some(value) = self.field(obj, key, path) {
            if !value.is_string() {
                self.push(path, ViolationKind::WrongType { expected: "string" });
            }
        }
    }

    fn object<'a>(
        &mut self,
        obj: &'a Map<String, Value>,
        key: &str,
        path: &str,
    ) -> Option<&'a Map<String, Value>> {
        let value = self.field(obj, key, path)?;
        match value.as_object() {
            Some(inner) => Some(inner),
            None => {
                self.push(path, ViolationKind::WrongType { expected: "object" });
                None
            }
        }
    }

    fn non_negative_integer(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        let Some(value) = self.field(obj, key, path) else {
            return;
        };
        match value {
            Value::Number(n) if n.is_u64() => {
                if n.as_u64().map_or(true, |v| v > i64::MAX as u64) {
                    self.push(path, ViolationKind::OutOfRange);
                }
            }
            Value::Number(n) if n.is_i64() => self.push(path, ViolationKind::OutOfRange),
            _ => self.push(path, ViolationKind::WrongType { expected: "non-negative integer" }),
        }
    }

    fn integer(&mut self, obj: &Map<String, Value>, key: &str, path: &str) {
        let Some(value) = self.field(obj, key, path) else {
            return;
        };
        match value {
            Value::Number(n) if n.is_i64() => {}
            // integral but beyond i64
            Value::Number(n) if n.is_u64() => self.push(path, ViolationKind::OutOfRange),
            _ => self.push(path, ViolationKind::WrongType { expected: "integer" }),
        }
    }

    /// An array whose elements are objects carrying the string fields `keys`.
    fn array_of(&mut self, obj: &Map<String, Value>, key: &str, keys: [&str; 2]) {
        let Some(value) = self.field(obj, key, key) else {
            return;
        };
        let Some(items) = value.as_array() else {
            self.push(key, ViolationKind::WrongType { expected: "array" });
            return;
        };

        for (i, item) in items.iter().enumerate() {
            let item_path = format!("{}[{}]", key, i);
            match item.as_object() {
                Some(inner) => {
                    for k in keys {
                        self.string(inner, k, &format!("{}.{}", item_path, k));
                    }
                }
                None => self.push(item_path, ViolationKind::WrongType { expected: "object" }),
            }
        }
    }
}

/// Validate one element of an import document against the full
/// `ListenRecord` contract and decode it on success.
pub fn validate_record(index: usize, value: &Value) -> Result<ListenRecord, RecordViolations> {
    let mut checker = Checker::default();

    let Some(obj) = value.as_object() else {
        checker.push("$", ViolationKind::WrongType { expected: "object" });
        return Err(RecordViolations {
            index,
            violations: checker.violations,
        });
    };

    checker.string(obj, "id", "id");
    checker.string(obj, "canonicalUri", "canonicalUri");
    checker.string(obj, "title", "title");
    checker.non_negative_integer(obj, "durationMs", "durationMs");
    if let Some(album) = checker.object(obj, "album", "album") {
        checker.string(album, "name", "album.name");
        checker.string(album, "uri", "album.uri");
    }
    checker.array_of(obj, "artists", ["name", "uri"]);
    checker.array_of(obj, "images", ["url", "label"]);
    // null fails the object check, which is what "non-null object" requires
    checker.object(obj, "metadata", "metadata");
    checker.integer(obj, "lastListenTimestamp", "lastListenTimestamp");

    if !checker.violations.is_empty() {
        return Err(RecordViolations {
            index,
            violations: checker.violations,
        });
    }

    serde_json::from_value(value.clone()).map_err(|_| RecordViolations {
        index,
        violations: vec![FieldViolation {
            field: "$".to_string(),
            kind: ViolationKind::WrongType { expected: "ListenRecord" },
        }],
    })
}

/// Validate every element. Returns all decoded records, or every failing
/// record's violations if at least one element is invalid.
pub fn validate_all(items: &[Value]) -> Result<Vec<ListenRecord>, Vec<RecordViolations>> {
    let mut records = Vec::with_capacity(items.len());
    let mut failures = Vec::new();

    for (index, item) in items.iter().enumerate() {
        match validate_record(index, item) {
            Ok(record) => records.push(record),
            Err(violations) => failures.push(violations),
        }
    }

    if failures.is_empty() {
        Ok(records)
    } else {
        Err(failures)
    }
}
