//! Synthetic record source for running the agent without journald.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use logship_core::record::{Cursor, Fields, Record, Timestamp};
use logship_core::{RecordTx, Source};

/// Emits one synthetic record per interval. The fields mimic a container
/// log entry (a wrapped-JSON `MESSAGE` plus kubelet-style container
/// fields) so every transformer in the chain gets exercised.
pub struct MockSource {
    interval: Duration,
    seq: u64,
}

impl MockSource {
    pub fn new(interval: Duration) -> Self {
        Self { interval, seq: 0 }
    }

    fn next_record(&mut self) -> Record {
        self.seq += 1;
        let now = Utc::now();
        let mut fields = Fields::new();
        fields.insert(
            "MESSAGE".to_owned(),
            Value::String(
                r#"{"log":"my fake log","ts":1492015752.123456789,"hello":"field"}"#.to_owned(),
            ),
        );
        fields.insert(
            "CONTAINER_NAME".to_owned(),
            Value::String(
                "k8s_containername.containerhash_contract-service-2957857213-vztuq_default_poduuid_abcd1234"
                    .to_owned(),
            ),
        );
        fields.insert(
            "CONTAINER_ID_FULL".to_owned(),
            Value::String("mycontainerid".to_owned()),
        );
        Record {
            time: Timestamp::new(now.timestamp(), now.timestamp_subsec_nanos()),
            cursor: Cursor::new(format!("mock-{:020}", self.seq)),
            fields,
        }
    }
}

#[async_trait]
impl Source for MockSource {
    async fn run(&mut self, out: RecordTx, stop: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        // skip the interval's immediate first tick
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }
            let record = self.next_record();
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                sent = out.send(record) => if sent.is_err() { return Ok(()) },
            }
        }
    }
}
