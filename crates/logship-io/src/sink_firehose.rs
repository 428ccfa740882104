//! Firehose sink: batch shaping, delivery, partial-failure retry.
//!
//! Delivery is generic over the [`FirehoseApi`] boundary so the retry
//! protocol can be exercised against a scripted destination; the real
//! implementation wraps the official SDK's `PutRecordBatch`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record as FirehoseRecord;
use bytes::Bytes;
use tracing::{error, warn};

use logship_core::record::{Cursor, Record};
use logship_core::retry::{Backoff, RetryPolicy};
use logship_core::{BatchRx, CursorTx, LogshipError, Sink};

/// Hard limits of the PutRecordBatch API.
pub const FIREHOSE_MAX_RECORDS: usize = 500;
pub const FIREHOSE_MAX_RECORD_SIZE: usize = 1000 * 1024;
pub const FIREHOSE_MAX_BATCH_SIZE: usize = 4 * 1024 * 1024;

/// Error code the destination uses for records it will never accept.
const INVALID_ARGUMENT: &str = "InvalidArgumentException";

/// Destination size limits applied while shaping.
#[derive(Clone, Copy, Debug)]
pub struct ShapeLimits {
    pub max_records: usize,
    pub max_record_size: usize,
    pub max_batch_size: usize,
}

impl Default for ShapeLimits {
    fn default() -> Self {
        Self {
            max_records: FIREHOSE_MAX_RECORDS,
            max_record_size: FIREHOSE_MAX_RECORD_SIZE,
            max_batch_size: FIREHOSE_MAX_BATCH_SIZE,
        }
    }
}

/// A batch reshaped to the destination's limits: serialized records plus
/// the cursor of the last record packed in.
#[derive(Debug, Clone)]
pub struct ShapedBatch {
    pub records: Vec<Bytes>,
    pub cursor: Cursor,
}

/// Per-record outcome of one PutRecordBatch call; `error_code` is `None`
/// for accepted records.
#[derive(Debug, Clone, Default)]
pub struct RecordResult {
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl RecordResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: &str) -> Self {
        Self {
            error_code: Some(code.to_owned()),
            error_message: None,
        }
    }
}

/// Boundary to the Firehose API.
#[async_trait]
pub trait FirehoseApi: Send + Sync {
    /// Submit one shaped batch; returns one result per submitted record,
    /// in submission order.
    async fn put_record_batch(&self, stream: &str, records: &[Bytes]) -> Result<Vec<RecordResult>>;
}

/// Packs records into destination-conformant batches.
///
/// Each record serializes to one compact JSON line. A serialized record
/// over the per-record limit is truncated to `max_record_size - 1` bytes
/// plus the newline; the result is lossy and mid-JSON, which is the wire
/// contract the downstream pipeline expects today. A record that fails to serialize
/// is logged and skipped; the next record's cursor checkpoints past it.
pub fn shape(records: &[Record], limits: ShapeLimits) -> Vec<ShapedBatch> {
    let mut batches = Vec::new();
    let mut current: Vec<Bytes> = Vec::new();
    let mut current_cursor = Cursor::default();
    let mut current_size = 0usize;

    for record in records {
        let mut serialized = match serde_json::to_vec(&record.fields) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(error = %err, cursor = %record.cursor, "failed to serialize record, skipping");
                continue;
            }
        };

        if serialized.len() > limits.max_record_size - 2 {
            serialized.truncate(limits.max_record_size - 1);
        }
        serialized.push(b'\n');

        if !current.is_empty()
            && (current_size + serialized.len() > limits.max_batch_size
                || current.len() == limits.max_records)
        {
            batches.push(ShapedBatch {
                records: std::mem::take(&mut current),
                cursor: std::mem::take(&mut current_cursor),
            });
            current_size = 0;
        }

        current_size += serialized.len();
        current.push(Bytes::from(serialized));
        current_cursor = record.cursor.clone();
    }

    if !current.is_empty() {
        batches.push(ShapedBatch {
            records: current,
            cursor: current_cursor,
        });
    }
    batches
}

/// Delivery stage over any [`FirehoseApi`] implementation.
pub struct FirehoseSink<C> {
    api: C,
    stream: String,
    limits: ShapeLimits,
    retry: RetryPolicy,
}

impl<C: FirehoseApi> FirehoseSink<C> {
    pub fn new(api: C, stream: impl Into<String>) -> Self {
        Self {
            api,
            stream: stream.into(),
            limits: ShapeLimits::default(),
            retry: RetryPolicy::delivery(),
        }
    }

    pub fn with_limits(mut self, limits: ShapeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Delivers one shaped batch, retrying until every record has been
    /// accepted (or permanently rejected) or the retry budget runs out.
    async fn deliver(&self, mut records: Vec<Bytes>) -> Result<()> {
        let mut backoff = Backoff::new(self.retry.clone());
        loop {
            match self.api.put_record_batch(&self.stream, &records).await {
                Err(err) => {
                    error!(error = %err, stream = %self.stream, "put record batch failed");
                }
                Ok(results) => {
                    let failed = results.iter().filter(|r| r.error_code.is_some()).count();
                    let mut retained = Vec::with_capacity(failed);
                    for (result, data) in results.iter().zip(&records) {
                        match result.error_code.as_deref() {
                            None => {}
                            // the destination will never accept this
                            // record; drop it rather than retry forever
                            Some(INVALID_ARGUMENT) => {
                                warn!(message = ?result.error_message, "record rejected as invalid, dropping");
                            }
                            Some(_) => retained.push(data.clone()),
                        }
                    }
                    if retained.is_empty() {
                        return Ok(());
                    }
                    error!(
                        failed,
                        retrying = retained.len(),
                        "records failed to deliver, retrying the remainder"
                    );
                    records = retained;
                }
            }
            match backoff.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => bail!("delivery retries exhausted for stream {}", self.stream),
            }
        }
    }
}

#[async_trait]
impl<C: FirehoseApi> Sink for FirehoseSink<C> {
    async fn run(&mut self, mut batches: BatchRx, progress: CursorTx) -> Result<()> {
        while let Some(batch) = batches.recv().await {
            for shaped in shape(&batch.records, self.limits) {
                self.deliver(shaped.records)
                    .await
                    .with_context(|| format!("delivering batch at cursor {}", shaped.cursor))?;
                if progress.send(shaped.cursor).await.is_err() {
                    return Err(LogshipError::ChannelClosed("progress queue").into());
                }
            }
        }
        Ok(())
    }
}

/// [`FirehoseApi`] backed by the official SDK.
pub struct AwsFirehose {
    client: aws_sdk_firehose::Client,
}

impl AwsFirehose {
    /// Loads AWS configuration from the environment. When
    /// `imds_endpoint` is set, credentials come from that EC2 metadata
    /// host instead of the default one.
    pub async fn new(imds_endpoint: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(host) = imds_endpoint {
            let imds = aws_config::imds::Client::builder()
                .endpoint(format!("http://{host}/latest"))
                .map_err(|err| anyhow::anyhow!("invalid EC2 metadata endpoint {host}: {err}"))?
                .build();
            let credentials = aws_config::imds::credentials::ImdsCredentialsProvider::builder()
                .imds_client(imds)
                .build();
            loader = loader.credentials_provider(credentials);
        }
        let config = loader.load().await;
        Ok(Self {
            client: aws_sdk_firehose::Client::new(&config),
        })
    }
}

#[async_trait]
impl FirehoseApi for AwsFirehose {
    async fn put_record_batch(&self, stream: &str, records: &[Bytes]) -> Result<Vec<RecordResult>> {
        let mut request = self.client.put_record_batch().delivery_stream_name(stream);
        for data in records {
            let record = FirehoseRecord::builder()
                .data(Blob::new(data.to_vec()))
                .build()
                .context("building firehose record")?;
            request = request.records(record);
        }
        let output = request.send().await.context("calling PutRecordBatch")?;
        Ok(output
            .request_responses()
            .iter()
            .map(|entry| RecordResult {
                error_code: entry.error_code().map(str::to_owned),
                error_message: entry.error_message().map(str::to_owned),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logship_core::record::{Batch, Fields};
    use logship_core::retry::Jitter;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn record(cursor: &str, key: &str, value: &str) -> Record {
        let mut fields = Fields::new();
        fields.insert(key.to_owned(), Value::String(value.to_owned()));
        Record {
            cursor: Cursor::from(cursor),
            fields,
            ..Default::default()
        }
    }

    fn limits(max_records: usize, max_record_size: usize, max_batch_size: usize) -> ShapeLimits {
        ShapeLimits {
            max_records,
            max_record_size,
            max_batch_size,
        }
    }

    #[test]
    fn shape_packs_splits_and_truncates() {
        let records = vec![
            // these two fit one batch together
            record("1", "1234567890", "12345678901234567890"),
            record("2", "1234567890", "09876543210987654321"),
            // this one serializes past the record limit and is truncated
            record("3", "12345678901234567890", "1234567890abcdefghij1234567890"),
            // too large to share a batch with the truncated record
            record("4", "12345678901234567890", "12345678901234567890"),
        ];

        let batches = shape(&records, limits(2, 50, 80));
        assert_eq!(batches.len(), 3);

        assert_eq!(batches[0].cursor.as_str(), "2");
        assert_eq!(
            batches[0].records[0].as_ref(),
            b"{\"1234567890\":\"12345678901234567890\"}\n"
        );
        assert_eq!(
            batches[0].records[1].as_ref(),
            b"{\"1234567890\":\"09876543210987654321\"}\n"
        );

        assert_eq!(batches[1].cursor.as_str(), "3");
        assert_eq!(batches[1].records.len(), 1);
        assert_eq!(
            batches[1].records[0].as_ref(),
            b"{\"12345678901234567890\":\"1234567890abcdefghij1234\n"
        );

        assert_eq!(batches[2].cursor.as_str(), "4");
        assert_eq!(batches[2].records.len(), 1);
        assert_eq!(
            batches[2].records[0].as_ref(),
            b"{\"12345678901234567890\":\"12345678901234567890\"}\n"
        );
    }

    #[test]
    fn shape_respects_the_byte_budget() {
        // each record serializes to 39 bytes including the newline
        let records = vec![
            record("1", "1234567890", "12345678901234567890"),
            record("2", "1234567890", "09876543210987654321"),
        ];

        // both fit within 80 bytes
        let batches = shape(&records, limits(10, 50, 80));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records.len(), 2);
        assert_eq!(batches[0].cursor.as_str(), "2");

        // a 70 byte budget forces a split
        let batches = shape(&records, limits(10, 50, 70));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].records.len(), 1);
        assert_eq!(batches[0].cursor.as_str(), "1");
        assert_eq!(batches[1].records.len(), 1);
        assert_eq!(batches[1].cursor.as_str(), "2");
    }

    #[test]
    fn shape_respects_the_record_count() {
        let records = vec![
            record("1", "k", "v"),
            record("2", "k", "v"),
            record("3", "k", "v"),
        ];
        let batches = shape(&records, limits(2, 1024, 1024 * 1024));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].records.len(), 2);
        assert_eq!(batches[0].cursor.as_str(), "2");
        assert_eq!(batches[1].records.len(), 1);
        assert_eq!(batches[1].cursor.as_str(), "3");
    }

    #[test]
    fn shape_skips_nothing_on_empty_input() {
        assert!(shape(&[], ShapeLimits::default()).is_empty());
    }

    /// Scripted destination: pops one response set per call, then
    /// accepts everything.
    struct MockApi {
        script: Mutex<VecDeque<Result<Vec<RecordResult>>>>,
        calls: Mutex<Vec<Vec<Bytes>>>,
    }

    impl MockApi {
        fn scripted(script: Vec<Result<Vec<RecordResult>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FirehoseApi for &MockApi {
        async fn put_record_batch(
            &self,
            _stream: &str,
            records: &[Bytes],
        ) -> Result<Vec<RecordResult>> {
            self.calls.lock().unwrap().push(records.to_vec());
            match self.script.lock().unwrap().pop_front() {
                Some(step) => step,
                None => Ok(records.iter().map(|_| RecordResult::ok()).collect()),
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 1.5,
            max_elapsed: Some(Duration::from_secs(5)),
            jitter: Jitter::None,
        }
    }

    #[tokio::test]
    async fn partial_failures_retry_only_the_failed_records() {
        let api = MockApi::scripted(vec![Ok(vec![
            RecordResult::ok(),
            RecordResult::failed("ServiceUnavailableException"),
            RecordResult::ok(),
        ])]);
        let sink = FirehoseSink::new(&api, "stream").with_retry_policy(fast_retry());

        let records = vec![
            Bytes::from_static(b"a\n"),
            Bytes::from_static(b"b\n"),
            Bytes::from_static(b"c\n"),
        ];
        sink.deliver(records).await.unwrap();

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].len(), 3);
        // only the failed record went back out
        assert_eq!(calls[1], vec![Bytes::from_static(b"b\n")]);
    }

    #[tokio::test]
    async fn invalid_records_are_dropped_not_retried() {
        let api = MockApi::scripted(vec![Ok(vec![
            RecordResult::failed(INVALID_ARGUMENT),
            RecordResult::ok(),
        ])]);
        let sink = FirehoseSink::new(&api, "stream").with_retry_policy(fast_retry());

        sink.deliver(vec![Bytes::from_static(b"bad\n"), Bytes::from_static(b"good\n")])
            .await
            .unwrap();

        // the all-invalid response needed no second call
        assert_eq!(api.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn api_errors_retry_the_whole_batch() {
        let api = MockApi::scripted(vec![
            Err(anyhow::anyhow!("connection reset")),
            Err(anyhow::anyhow!("connection reset")),
        ]);
        let sink = FirehoseSink::new(&api, "stream").with_retry_policy(fast_retry());

        sink.deliver(vec![Bytes::from_static(b"a\n")]).await.unwrap();

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.len() == 1));
    }

    #[tokio::test]
    async fn exhausted_delivery_retries_are_fatal() {
        let script: Vec<Result<Vec<RecordResult>>> =
            (0..500).map(|_| Err(anyhow::anyhow!("down"))).collect();
        let api = MockApi::scripted(script);
        let retry = RetryPolicy {
            max_elapsed: Some(Duration::from_millis(20)),
            ..fast_retry()
        };
        let sink = FirehoseSink::new(&api, "stream").with_retry_policy(retry);

        let err = sink
            .deliver(vec![Bytes::from_static(b"a\n")])
            .await
            .expect_err("exhaustion must be fatal");
        assert!(err.to_string().contains("retries exhausted"));
    }

    #[tokio::test]
    async fn run_reports_progress_per_shaped_batch() {
        let api = MockApi::scripted(Vec::new());
        let mut sink = FirehoseSink::new(&api, "stream")
            .with_retry_policy(fast_retry())
            .with_limits(limits(2, 1024, 1024 * 1024));

        let (batch_tx, batch_rx) = mpsc::channel(4);
        let (progress_tx, mut progress_rx) = mpsc::channel(4);

        let records = vec![
            record("1", "k", "v"),
            record("2", "k", "v"),
            record("3", "k", "v"),
        ];
        let batch = Batch::from_records(records).unwrap();
        batch_tx.send(batch).await.unwrap();
        drop(batch_tx);

        sink.run(batch_rx, progress_tx).await.unwrap();

        let first = timeout(Duration::from_secs(1), progress_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first.as_str(), "2");
        let second = timeout(Duration::from_secs(1), progress_rx.recv()).await.unwrap().unwrap();
        assert_eq!(second.as_str(), "3");
        assert!(progress_rx.recv().await.is_none());
    }
}
