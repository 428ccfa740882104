//! Kibana `@timestamp` formatting.

use anyhow::Result;
use serde_json::Value;

use logship_core::Record;

/// Writes `@timestamp` as the record time with millisecond precision,
/// e.g. `2017-04-06T20:34:57.961`, the format Kibana expects to find.
pub fn transform(record: &mut Record) -> Result<()> {
    if let Some(time) = record.time.to_datetime() {
        record.fields.insert(
            "@timestamp".to_owned(),
            Value::String(time.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logship_core::record::Timestamp;

    #[test]
    fn formats_to_millisecond_precision() {
        let time = Utc.with_ymd_and_hms(2017, 4, 3, 15, 32, 45).unwrap();
        let mut record = Record {
            time: Timestamp::new(time.timestamp(), 120456789),
            ..Default::default()
        };

        transform(&mut record).unwrap();

        assert_eq!(
            record.fields.get("@timestamp"),
            Some(&Value::String("2017-04-03T15:32:45.120".to_owned()))
        );
    }

    #[test]
    fn zero_time_formats_as_the_epoch() {
        let mut record = Record::default();
        transform(&mut record).unwrap();
        assert_eq!(
            record.fields.get("@timestamp"),
            Some(&Value::String("1970-01-01T00:00:00.000".to_owned()))
        );
    }
}
