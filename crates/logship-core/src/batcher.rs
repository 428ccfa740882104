//! Time-or-size record batching.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::record::{Batch, Record};
use crate::{BatchRx, BatchTx, RecordRx};

/// Groups records into batches of up to `size`, flushing whatever has
/// accumulated every `interval` so a quiet stream still ships promptly.
///
/// Semantics:
/// - a size-triggered flush does not reset the interval timer
/// - a timer tick with an empty buffer emits nothing; no batch is ever
///   empty
/// - when the input closes, the remaining buffer is flushed and the
///   returned channel closes
///
/// The output channel has capacity 1: a slow consumer stalls the batcher,
/// which stalls the record queue behind it.
pub fn buffered(size: usize, interval: Duration, input: RecordRx) -> BatchRx {
    assert!(size >= 1, "batch size must be at least 1");
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(run(size, interval, input, tx));
    rx
}

async fn run(size: usize, interval: Duration, mut input: RecordRx, tx: BatchTx) {
    let mut buffer: Vec<Record> = Vec::with_capacity(size);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // the first tick of a tokio interval completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            record = input.recv() => match record {
                Some(record) => {
                    buffer.push(record);
                    if buffer.len() == size && !flush(&mut buffer, &tx).await {
                        return;
                    }
                }
                None => {
                    flush(&mut buffer, &tx).await;
                    return;
                }
            },
            _ = ticker.tick() => {
                if !flush(&mut buffer, &tx).await {
                    return;
                }
            }
        }
    }
}

/// Emits the buffer as one batch, if non-empty. Returns `false` when the
/// output channel is gone and the batcher should stop.
async fn flush(buffer: &mut Vec<Record>, tx: &BatchTx) -> bool {
    let Some(batch) = Batch::from_records(std::mem::take(buffer)) else {
        return true;
    };
    tx.send(batch).await.is_ok()
}
