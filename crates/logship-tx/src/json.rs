//! Embedded-JSON unwrap.
//!
//! Container runtimes hand the journal a single `log` string; services
//! that log structured JSON end up with a JSON object serialized inside
//! it. This transformer splices such objects back onto the record.

use anyhow::Result;
use serde_json::Value;

use logship_core::record::{Record, Timestamp};

/// If `log` holds a string that parses as a JSON object, splice its
/// top-level keys over the record's fields (overwriting collisions).
/// A numeric `ts` field then becomes the record time, split into whole
/// seconds and nanoseconds. Logs are not required to be JSON: anything
/// that does not parse as an object is left exactly as it was.
pub fn transform(record: &mut Record) -> Result<()> {
    let parsed = match record.fields.get("log") {
        Some(Value::String(log)) => match serde_json::from_str::<Value>(log) {
            Ok(Value::Object(parsed)) => parsed,
            _ => return Ok(()),
        },
        _ => return Ok(()),
    };

    for (key, value) in parsed {
        record.fields.insert(key, value);
    }

    if let Some(Value::Number(ts)) = record.fields.get("ts") {
        if let Some(ts) = ts.as_f64() {
            record.time = Timestamp::from_secs_f64(ts);
        }
    }
    Ok(())
}
