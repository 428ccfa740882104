//! # logship I/O
//!
//! Concrete sources, sinks and the cursor store for the logship
//! pipeline: the journald tail (with its resumable cursor), the Firehose
//! delivery stage, the stdout and synthetic-record stand-ins used for
//! local runs, and the file-backed cursor store that makes delivery
//! progress survive restarts.

/// File-backed durable cursor store
pub mod cursor;

/// Firehose sink: shaping, partial-failure retry, delivery
pub mod sink_firehose;

/// Stdout sink for local runs
pub mod sink_stdout;

/// Journald source driver and journalctl adapter
pub mod source_journal;

/// Synthetic record source for local runs
pub mod source_mock;
