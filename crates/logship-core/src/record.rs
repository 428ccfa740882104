//! The record model shared by every pipeline stage.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Dynamically-typed field bag carried by every record.
///
/// Values span the JSON range (strings, numbers, booleans, nested
/// objects); domain metadata structs are serialized into objects before
/// insertion. Key uniqueness is the map's; insertion order is not
/// significant.
pub type Fields = serde_json::Map<String, Value>;

/// Opaque resume token produced by a source.
///
/// Cursors are totally ordered by emission time within one source
/// session. Nothing outside the source driver and the cursor store
/// interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Cursor(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty cursor means "start from the beginning".
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Cursor(raw)
    }
}

impl From<&str> for Cursor {
    fn from(raw: &str) -> Self {
        Cursor(raw.to_owned())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seconds and nanoseconds since the Unix epoch.
///
/// Stored as the raw pair rather than `chrono::DateTime` because journal
/// timestamps are untrusted input and can lie far outside chrono's
/// representable range; [`Timestamp::to_datetime`] bridges to chrono at
/// the formatting boundary. The zero value means the source did not
/// provide a usable timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };

    pub fn new(secs: i64, nanos: u32) -> Self {
        Timestamp { secs, nanos }
    }

    pub fn is_zero(&self) -> bool {
        self.secs == 0 && self.nanos == 0
    }

    /// Split a fractional Unix timestamp (the `ts` field convention in
    /// wrapped JSON logs) into whole seconds plus nanoseconds.
    pub fn from_secs_f64(ts: f64) -> Self {
        let secs = ts.trunc() as i64;
        let nanos = (ts.fract() * 1e9) as u32;
        Timestamp { secs, nanos }
    }

    /// Convert microseconds-since-epoch, the journal's native unit.
    pub fn from_micros(micros: u64) -> Self {
        Timestamp {
            secs: (micros / 1_000_000) as i64,
            nanos: ((micros % 1_000_000) * 1_000) as u32,
        }
    }

    /// `None` when the instant is outside chrono's range.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.secs, self.nanos).single()
    }
}

/// One log entry flowing through the pipeline.
///
/// Created by the source driver, mutated in place by the transform
/// chain, serialized and discarded by the sink. `cursor` is non-empty
/// for every real record.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub time: Timestamp,
    pub cursor: Cursor,
    pub fields: Fields,
}

/// An ordered group of records emitted together by the batcher.
///
/// `cursor` is the cursor of the last record. A batch is the unit of
/// delivery atomicity: the checkpoint advances only once the whole batch
/// has been accepted downstream.
#[derive(Debug, Clone)]
pub struct Batch {
    pub records: Vec<Record>,
    pub cursor: Cursor,
}

impl Batch {
    /// Build a batch from a run of records; `None` when empty, since an
    /// empty batch has no cursor and is never emitted.
    pub fn from_records(records: Vec<Record>) -> Option<Batch> {
        let cursor = records.last()?.cursor.clone();
        Some(Batch { records, cursor })
    }
}
