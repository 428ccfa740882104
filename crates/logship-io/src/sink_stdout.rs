//! Stdout sink: newline-delimited JSON, for running without AWS.

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use logship_core::{BatchRx, CursorTx, LogshipError, Sink};

/// Prints each record's fields as one compact JSON line and reports
/// every batch cursor as delivered.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl Sink for StdoutSink {
    async fn run(&mut self, mut batches: BatchRx, progress: CursorTx) -> Result<()> {
        while let Some(batch) = batches.recv().await {
            for record in &batch.records {
                match serde_json::to_string(&record.fields) {
                    Ok(line) => println!("{line}"),
                    Err(err) => {
                        warn!(error = %err, cursor = %record.cursor, "failed to serialize record, skipping")
                    }
                }
            }
            if progress.send(batch.cursor).await.is_err() {
                return Err(LogshipError::ChannelClosed("progress queue").into());
            }
        }
        Ok(())
    }
}
