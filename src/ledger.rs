use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One completed transfer, as it appears in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp_utc: DateTime<Utc>,
    pub url: String,
    #[serde(serialize_with = "serialize_size")]
    pub file_size_mb: f64,
    /// Set when the bytes came over a connection whose certificate was not checked.
    #[serde(skip)]
    pub unverified: bool,
}

impl HistoryRecord {
    pub fn completed(url: impl Into<String>, bytes: u64, verified: bool) -> Self {
        Self {
            timestamp_utc: Utc::now(),
            url: url.into(),
            file_size_mb: size_mb(bytes),
            unverified: !verified,
        }
    }
}

/// Bytes to MiB, rounded to two decimals with ties going to the even digit.
pub fn size_mb(bytes: u64) -> f64 {
    (bytes as f64 / BYTES_PER_MB * 100.0).round_ties_even() / 100.0
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(serde::de::Error::custom)
}

fn serialize_size<S: Serializer>(size: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{:.2}", size))
}

/// Append-only table of completed downloads shared by every worker.
///
/// Clones share the same records. `append` and `snapshot` take the same lock,
/// so a snapshot never observes a half-inserted record. The lock is never held
/// across an await point.
#[derive(Debug, Clone, Default)]
pub struct HistoryLedger {
    records: Arc<Mutex<Vec<HistoryRecord>>>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously persisted history.
    pub fn from_records(records: Vec<HistoryRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn append(&self, record: HistoryRecord) {
        self.records.lock().push(record);
    }

    pub fn snapshot(&self) -> Vec<HistoryRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
