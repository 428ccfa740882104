//! Pipeline supervision: queue ownership, stage spawning, shutdown.
//!
//! The supervisor owns the three bounded queues between stages and the
//! cancellation token handed to the source. Shutdown is a wave that
//! travels downstream: cancelling the source closes the record queue,
//! the transform stage drains it and closes its output, the batcher
//! flushes and closes the batch queue, the sink finishes in-flight
//! deliveries and closes the progress queue, and the checkpointer writes
//! the final cursor and exits.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batcher;
use crate::retry::{Backoff, RetryPolicy};
use crate::{
    CursorRx, CursorStore, LogshipError, RecordRx, RecordTx, Sink, Source, Transformer,
};

/// Default capacity of the source -> transform queue.
pub const DEFAULT_MAX_BUFFER: usize = 200;

/// Default records-per-batch handed to the sink.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default ceiling on how long a record waits before its batch flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

const TRANSFORMED_QUEUE_CAPACITY: usize = 20;
const PROGRESS_QUEUE_CAPACITY: usize = 5;

/// Stage wiring and tuning for one pipeline instance.
pub struct Config {
    pub max_buffer: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub cursor: Box<dyn CursorStore>,
    pub source: Box<dyn Source>,
    pub sink: Box<dyn Sink>,
    pub transformers: Vec<Transformer>,
}

impl Config {
    pub fn new(
        cursor: Box<dyn CursorStore>,
        source: Box<dyn Source>,
        sink: Box<dyn Sink>,
    ) -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            cursor,
            source,
            sink,
            transformers: Vec::new(),
        }
    }
}

/// A running pipeline: five stages spawned into a [`JoinSet`].
pub struct Pipeline {
    tasks: JoinSet<Result<()>>,
    stop_source: CancellationToken,
}

impl Pipeline {
    /// Wires the queues and spawns every stage. The pipeline is live
    /// when this returns.
    pub fn start(conf: Config) -> Pipeline {
        let (in_tx, in_rx) = mpsc::channel(conf.max_buffer);
        let (out_tx, out_rx) = mpsc::channel(TRANSFORMED_QUEUE_CAPACITY);
        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_QUEUE_CAPACITY);

        let stop_source = CancellationToken::new();
        let mut tasks = JoinSet::new();

        let mut source = conf.source;
        let stop = stop_source.clone();
        tasks.spawn(async move { source.run(in_tx, stop).await.context("source stage") });

        let transformers = conf.transformers;
        tasks.spawn(async move {
            transform_stage(in_rx, out_tx, transformers)
                .await
                .context("transform stage")
        });

        let batch_rx = batcher::buffered(conf.batch_size, conf.flush_interval, out_rx);

        let mut sink = conf.sink;
        tasks.spawn(async move { sink.run(batch_rx, progress_tx).await.context("sink stage") });

        let mut store = conf.cursor;
        tasks.spawn(async move {
            checkpoint_stage(progress_rx, &mut *store)
                .await
                .context("checkpoint stage")
        });

        info!("pipeline started");
        Pipeline { tasks, stop_source }
    }

    /// Resolves on the first stage failure (fatal), or `Ok` once every
    /// stage has finished.
    pub async fn join(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(err) => return Err(anyhow!(err)).context("pipeline stage panicked"),
            }
        }
        Ok(())
    }

    /// Requests cooperative shutdown and waits for the stages to drain,
    /// aborting whatever is still running once `grace` elapses.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        info!("stopping pipeline");
        self.stop_source.cancel();
        match timeout(grace, self.join()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "grace period elapsed before the pipeline drained, aborting"
                );
                self.tasks.abort_all();
                Ok(())
            }
        }
    }
}

/// Applies the transform chain to each record, in input order.
async fn transform_stage(
    mut input: RecordRx,
    output: RecordTx,
    transformers: Vec<Transformer>,
) -> Result<()> {
    while let Some(mut record) = input.recv().await {
        for transformer in &transformers {
            if let Err(err) = transformer(&mut record) {
                warn!(error = %err, cursor = %record.cursor, "transformer failed, forwarding record as-is");
            }
        }
        if output.send(record).await.is_err() {
            return Err(LogshipError::ChannelClosed("batcher input").into());
        }
    }
    Ok(())
}

/// Durably persists each cursor published by the sink. Cursors arrive in
/// monotonic order, so latest-seen is latest-in-time and no comparison
/// is needed.
async fn checkpoint_stage(mut progress: CursorRx, store: &mut dyn CursorStore) -> Result<()> {
    while let Some(cursor) = progress.recv().await {
        let mut backoff = Backoff::new(RetryPolicy::local_io());
        loop {
            match store.set(&cursor) {
                Ok(()) => break,
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        warn!(error = %err, delay_ms = delay.as_millis() as u64, "cursor write failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err).context("persisting delivery cursor"),
                },
            }
        }
    }
    Ok(())
}
