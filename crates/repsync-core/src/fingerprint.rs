//! Change detection fingerprints
//!
//! A fingerprint is a deterministic digest of a snapshot of inputs (record
//! identities, versions, summary metrics, and extra scalar context). Two
//! snapshots with the same logical content produce the same fingerprint no
//! matter what order the store yielded them in: entries are sorted before
//! hashing. Fingerprints are cache keys, never identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::models::SyncRecord;

/// Hex-encoded SHA-256 digest of a canonicalized input snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Scalar context value folded into a fingerprint
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Scalar {
    fn canonical(&self) -> String {
        match self {
            Self::Int(value) => format!("i{value}"),
            Self::Float(value) => format!("f{}", canonical_float(*value)),
            Self::Text(value) => format!("t{}:{value}", value.len()),
            Self::Bool(value) => format!("b{}", u8::from(*value)),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Builder collecting fingerprint inputs
#[derive(Debug, Clone, Default)]
pub struct Fingerprinter {
    entries: Vec<String>,
    context: Vec<(String, String)>,
}

impl Fingerprinter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record identity at a version
    #[must_use]
    pub fn record(mut self, identity: &str, version: u32) -> Self {
        self.entries
            .push(format!("{}:{identity}|{version}|-", identity.len()));
        self
    }

    /// Add a record identity with a numeric summary field (e.g. a percentage)
    #[must_use]
    pub fn record_with_metric(mut self, identity: &str, version: u32, metric: f64) -> Self {
        self.entries.push(format!(
            "{}:{identity}|{version}|{}",
            identity.len(),
            canonical_float(metric)
        ));
        self
    }

    /// Add a named scalar; a later value for the same key replaces the earlier one
    #[must_use]
    pub fn context(mut self, key: &str, value: impl Into<Scalar>) -> Self {
        let value = value.into().canonical();
        self.context.retain(|(existing, _)| existing != key);
        self.context.push((key.to_string(), value));
        self
    }

    /// Number of record entries collected so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.context.is_empty()
    }

    /// Sort, serialize, and hash the collected inputs
    pub fn finish(mut self) -> Fingerprint {
        self.entries.sort_unstable();
        self.context.sort_unstable();

        let mut hasher = Sha256::new();
        for entry in &self.entries {
            hasher.update(b"r|");
            hasher.update(entry.as_bytes());
            hasher.update(b"\n");
        }
        for (key, value) in &self.context {
            hasher.update(format!("c|{}:{key}|{value}\n", key.len()).as_bytes());
        }
        Fingerprint(hex::encode(hasher.finalize()))
    }
}

/// Fingerprint the `limit` most recently updated records by identity and version.
///
/// Ties on `updated_at` are broken by record id so the selected window is
/// itself independent of iteration order.
pub fn fingerprint_records<'a>(
    records: impl IntoIterator<Item = &'a SyncRecord>,
    limit: usize,
) -> Fingerprint {
    let mut records: Vec<&SyncRecord> = records.into_iter().collect();
    records.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    records
        .into_iter()
        .take(limit)
        .fold(Fingerprinter::new(), |acc, record| {
            acc.record(&record_identity(record), record.version)
        })
        .finish()
}

/// Identity used for a record inside fingerprints: `table/id`
pub fn record_identity(record: &SyncRecord) -> String {
    format!("{}/{}", record.table(), record.id)
}

fn canonical_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    let rounded = format!("{value:.4}");
    // -0.0000 and 0.0000 are the same input
    if rounded.trim_start_matches('-').chars().all(|c| c == '0' || c == '.') {
        "0.0000".to_string()
    } else {
        rounded
    }
}
