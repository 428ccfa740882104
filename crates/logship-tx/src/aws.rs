//! EC2 instance metadata stamping.
//!
//! The metadata values are exported as environment variables by the
//! instance bootstrap service on the base images this agent runs on; the
//! transformer snapshots them once and stamps every record with an `aws`
//! object.

use anyhow::Result;
use serde::Serialize;

use logship_core::{Record, Transformer};

pub const ENV_INSTANCE_ID: &str = "EC2_METADATA_INSTANCE_ID";
pub const ENV_LOCAL_IPV4: &str = "EC2_METADATA_LOCAL_IPV4";
pub const ENV_LOCAL_HOSTNAME: &str = "EC2_METADATA_LOCAL_HOSTNAME";

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstanceMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub instance_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_ipv4: String,
}

impl InstanceMetadata {
    pub fn from_env() -> Self {
        Self {
            instance_id: std::env::var(ENV_INSTANCE_ID).unwrap_or_default(),
            local_hostname: std::env::var(ENV_LOCAL_HOSTNAME).unwrap_or_default(),
            local_ipv4: std::env::var(ENV_LOCAL_IPV4).unwrap_or_default(),
        }
    }
}

/// Builds the transformer stamping `meta` onto every record as an `aws`
/// object; empty fields are omitted from it.
pub fn transformer(meta: InstanceMetadata) -> Result<Transformer> {
    let value = serde_json::to_value(&meta)?;
    Ok(Box::new(move |record: &mut Record| {
        record.fields.insert("aws".to_owned(), value.clone());
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn stamps_an_aws_object_on_every_record() {
        let stamp = transformer(InstanceMetadata {
            instance_id: "i-0abc".to_owned(),
            local_hostname: "ip-10-0-0-1".to_owned(),
            local_ipv4: "10.0.0.1".to_owned(),
        })
        .unwrap();

        let mut record = Record::default();
        stamp(&mut record).unwrap();

        assert_eq!(
            record.fields.get("aws"),
            Some(&json!({
                "instance_id": "i-0abc",
                "local_hostname": "ip-10-0-0-1",
                "local_ipv4": "10.0.0.1",
            }))
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let stamp = transformer(InstanceMetadata {
            instance_id: "i-0abc".to_owned(),
            ..Default::default()
        })
        .unwrap();

        let mut record = Record::default();
        stamp(&mut record).unwrap();

        assert_eq!(record.fields.get("aws"), Some(&json!({"instance_id": "i-0abc"})));
        if let Some(Value::Object(aws)) = record.fields.get("aws") {
            assert!(!aws.contains_key("local_ipv4"));
        }
    }
}
