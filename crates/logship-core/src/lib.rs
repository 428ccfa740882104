//! # logship core
//!
//! Foundational types and pipeline machinery for the logship agent. This
//! crate defines the record model, the operator traits implemented by the
//! I/O crates, the time-or-size batcher, the retry policy used by every
//! stage, and the pipeline supervisor that owns the queues between stages.
//!
//! ## Pipeline shape
//!
//! ```text
//! Source --(records)--> transform chain --(records)--> batcher
//!        --(batches)--> Sink --(cursors)--> checkpointer --> CursorStore
//! ```
//!
//! Every arrow is a bounded `tokio::sync::mpsc` channel: a full queue
//! stalls the stage upstream of it, propagating backpressure all the way
//! to the source's poll loop, and a dropped sender is the downstream
//! stages' shutdown signal.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod batcher;
pub mod pipeline;
pub mod record;
pub mod retry;

pub use record::{Batch, Cursor, Fields, Record, Timestamp};

/// Sender half of a record queue between pipeline stages.
pub type RecordTx = mpsc::Sender<Record>;

/// Receiver half of a record queue between pipeline stages.
pub type RecordRx = mpsc::Receiver<Record>;

/// Sender half of the batcher's output queue.
pub type BatchTx = mpsc::Sender<Batch>;

/// Receiver half of the batcher's output queue.
pub type BatchRx = mpsc::Receiver<Batch>;

/// Sender half of the delivery-progress queue.
pub type CursorTx = mpsc::Sender<Cursor>;

/// Receiver half of the delivery-progress queue.
pub type CursorRx = mpsc::Receiver<Cursor>;

/// Errors surfaced by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum LogshipError {
    /// A queue between stages closed while records were still flowing.
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    /// Any other error, with context attached where it happened.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A record producer: the entry point of the pipeline.
///
/// Implementations emit records into `out` in source order and hold the
/// send side open for as long as they run. Cancelling `stop` requests
/// cooperative shutdown: the source finishes its current poll cycle,
/// drops `out` (closing the queue for the downstream stages) and
/// returns. A non-recoverable read error is returned as `Err` and is
/// fatal to the pipeline.
#[async_trait]
pub trait Source: Send {
    async fn run(&mut self, out: RecordTx, stop: CancellationToken) -> Result<()>;
}

/// A batch consumer: the exit point of the pipeline.
///
/// For every batch read from `batches`, implementations deliver the
/// contained records to their destination and then publish the batch
/// cursor to `progress`; publishing a cursor asserts that everything up
/// to and including that cursor has been accepted by the destination.
/// Returning `Err` (delivery retries exhausted) is fatal to the
/// pipeline.
#[async_trait]
pub trait Sink: Send {
    async fn run(&mut self, batches: BatchRx, progress: CursorTx) -> Result<()>;
}

/// Durable storage for the single high-water-mark cursor.
///
/// After `set` returns `Ok`, a process restart must observe the cursor
/// that was written. Exactly one task (the checkpointer) calls `set`; the
/// stored value is read once at startup to resume the source.
pub trait CursorStore: Send {
    /// The cursor loaded at startup, or last successfully written.
    fn cursor(&self) -> Cursor;

    /// Durably replace the stored cursor.
    fn set(&mut self, cursor: &Cursor) -> Result<()>;
}

/// One step of the transform chain.
///
/// Transformers mutate the record in place; ownership is exclusive along
/// the pipeline so no copies are needed. A transformer error is logged
/// and the record is forwarded as-is, since enrichment failures are
/// never fatal.
pub type Transformer = Box<dyn Fn(&mut Record) -> Result<()> + Send>;
