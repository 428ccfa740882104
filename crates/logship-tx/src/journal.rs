//! Journald field normalization.

use anyhow::Result;
use logship_core::Record;

/// Renames `MESSAGE` to `log` and prefixes every `_`-led journal field
/// with `JD`, so downstream indexers never see raw journal internals.
pub fn transform(record: &mut Record) -> Result<()> {
    if let Some(message) = record.fields.remove("MESSAGE") {
        record.fields.insert("log".to_owned(), message);
    }

    let underscored: Vec<String> = record
        .fields
        .keys()
        .filter(|key| key.starts_with('_'))
        .cloned()
        .collect();
    for key in underscored {
        if let Some(value) = record.fields.remove(&key) {
            record.fields.insert(format!("JD{key}"), value);
        }
    }
    Ok(())
}
