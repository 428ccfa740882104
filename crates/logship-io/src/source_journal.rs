//! Journald source: a resumable tail of journal entries.
//!
//! The driver is generic over the [`Journal`] boundary so the read loop,
//! retry behavior and entry conversion can be exercised without a
//! journal on the machine. The shipped backend tails
//! `journalctl --output=json --follow` as a child process, which keeps
//! the crate free of libsystemd bindings; it resumes with
//! `--after-cursor`, positioning strictly after the last delivered
//! entry.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use logship_core::record::{Cursor, Fields, Record, Timestamp};
use logship_core::retry::{Backoff, RetryPolicy};
use logship_core::{RecordTx, Source};

/// How long one poll waits for new entries before the driver loops and
/// re-checks for shutdown.
const WAIT_FOR_ENTRIES: Duration = Duration::from_secs(5);

const CURSOR_FIELD: &str = "__CURSOR";
const REALTIME_TIMESTAMP: &str = "__REALTIME_TIMESTAMP";
const SOURCE_REALTIME_TIMESTAMP: &str = "_SOURCE_REALTIME_TIMESTAMP";

/// Journal-internal fields stripped from every entry before it becomes a
/// record.
const OMIT_FIELDS: &[&str] = &[
    "__CURSOR",
    "__MONOTONIC_TIMESTAMP",
    "_BOOT_ID",
    "_UID",
    "_GID",
    "_CAP_EFFECTIVE",
    "_SYSTEMD_SLICE",
    "SYSLOG_IDENTIFIER",
    "_SYSTEMD_CGROUP",
    "_CMDLINE",
    "_COMM",
    "_SELINUX_CONTEXT",
    "SYSLOG_FACILITY",
    "__REALTIME_TIMESTAMP",
    "_SOURCE_REALTIME_TIMESTAMP",
    "PRIORITY",
    "_TRANSPORT",
    "_MACHINE_ID",
    "_EXE",
    "_HOSTNAME",
];

/// One decoded journal entry, as handed across the [`Journal`] boundary.
#[derive(Debug, Clone, Default)]
pub struct JournalEntry {
    pub cursor: String,
    /// Microseconds since the epoch, from the journal's own clock.
    pub realtime_usec: u64,
    pub fields: Fields,
}

/// Boundary to a concrete journal backend.
///
/// `next_entry` advances to the next entry, waiting up to `wait` for one
/// to appear. `Ok(None)` means nothing arrived in time, including EOF
/// from the backend: journald never ends a followed stream on purpose,
/// so EOF is re-polled rather than treated as an error. Implementations
/// position themselves strictly after the resume cursor at construction
/// time.
#[async_trait]
pub trait Journal: Send {
    async fn next_entry(&mut self, wait: Duration) -> Result<Option<JournalEntry>>;
}

/// Source driver over any [`Journal`] backend.
pub struct JournalSource<J> {
    journal: J,
    retry: RetryPolicy,
}

impl<J: Journal> JournalSource<J> {
    pub fn new(journal: J) -> Self {
        Self {
            journal,
            retry: RetryPolicy::local_io(),
        }
    }

    #[cfg(test)]
    fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Advances to the next entry, retrying transient read failures
    /// until the read budget runs out.
    async fn next_with_retry(&mut self) -> Result<Option<JournalEntry>> {
        let mut backoff: Option<Backoff> = None;
        loop {
            match self.journal.next_entry(WAIT_FOR_ENTRIES).await {
                Ok(entry) => return Ok(entry),
                Err(err) => {
                    let delay = backoff
                        .get_or_insert_with(|| Backoff::new(self.retry.clone()))
                        .next_delay();
                    match delay {
                        Some(delay) => {
                            warn!(error = %err, delay_ms = delay.as_millis() as u64, "journal read failed, retrying");
                            sleep(delay).await;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<J: Journal> Source for JournalSource<J> {
    async fn run(&mut self, out: RecordTx, stop: CancellationToken) -> Result<()> {
        loop {
            let entry = tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                next = self.next_with_retry() => next.context("reading from journal")?,
            };
            let Some(entry) = entry else { continue };
            let record = entry_to_record(entry);
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                sent = out.send(record) => {
                    if sent.is_err() {
                        warn!("record queue closed under the journal driver");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Converts an entry into a record: timestamp resolution, then the
/// omit-list strip.
fn entry_to_record(mut entry: JournalEntry) -> Record {
    let time = entry_time(&entry);
    for field in OMIT_FIELDS {
        entry.fields.remove(*field);
    }
    Record {
        time,
        cursor: Cursor::new(entry.cursor),
        fields: entry.fields,
    }
}

/// Prefers the origin timestamp stamped by the logging process; falls
/// back to the journal's own receive time.
fn entry_time(entry: &JournalEntry) -> Timestamp {
    if let Some(Value::String(stamp)) = entry.fields.get(SOURCE_REALTIME_TIMESTAMP) {
        if let Some(time) = parse_source_timestamp(stamp) {
            return time;
        }
    }
    Timestamp::from_micros(entry.realtime_usec)
}

/// `_SOURCE_REALTIME_TIMESTAMP` is decimal microseconds since the epoch;
/// the last six digits are the sub-second part.
fn parse_source_timestamp(stamp: &str) -> Option<Timestamp> {
    if stamp.len() <= 6 {
        return None;
    }
    let (secs, micros) = stamp.split_at(stamp.len() - 6);
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = micros.parse().ok()?;
    Some(Timestamp::new(secs, micros * 1_000))
}

/// Tails `journalctl --output=json --follow`, one JSON entry per line.
pub struct Journalctl {
    // held so the child is killed when the source goes away
    _child: Child,
    lines: Lines<BufReader<ChildStdout>>,
}

impl Journalctl {
    /// Spawns the tail. A non-empty `resume` cursor positions the stream
    /// strictly after the entry it names; an empty one starts from the
    /// beginning of the journal.
    pub fn spawn(resume: &Cursor) -> Result<Self> {
        let mut command = Command::new("journalctl");
        command
            .arg("--output=json")
            .arg("--follow")
            .arg("--no-pager")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if !resume.is_empty() {
            command.arg(format!("--after-cursor={}", resume.as_str()));
        }
        let mut child = command.spawn().context("spawning journalctl")?;
        let stdout = child
            .stdout
            .take()
            .context("journalctl stdout not captured")?;
        Ok(Self {
            _child: child,
            lines: BufReader::new(stdout).lines(),
        })
    }
}

#[async_trait]
impl Journal for Journalctl {
    async fn next_entry(&mut self, wait: Duration) -> Result<Option<JournalEntry>> {
        match tokio::time::timeout(wait, self.lines.next_line()).await {
            // nothing arrived within the wait window
            Err(_) => Ok(None),
            // EOF is indistinguishable from "nothing yet"; re-poll
            Ok(Ok(None)) => Ok(None),
            Ok(Ok(Some(line))) => parse_entry(&line).map(Some),
            Ok(Err(err)) => Err(err).context("reading journalctl output"),
        }
    }
}

fn parse_entry(line: &str) -> Result<JournalEntry> {
    let fields: Fields = serde_json::from_str(line).context("decoding journal entry")?;
    let cursor = match fields.get(CURSOR_FIELD) {
        Some(Value::String(cursor)) => cursor.clone(),
        _ => bail!("journal entry without a cursor"),
    };
    let realtime_usec = match fields.get(REALTIME_TIMESTAMP) {
        Some(Value::String(usec)) => usec.parse().unwrap_or(0),
        _ => 0,
    };
    Ok(JournalEntry {
        cursor,
        realtime_usec,
        fields,
    })
}
