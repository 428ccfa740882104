//! # logship, the log shipping agent
//!
//! Tails the local journal, runs every entry through the transform
//! chain, batches the results and ships them to Firehose, checkpointing
//! the journal cursor after each delivered batch so a restart resumes
//! exactly where delivery left off.
//!
//! Configuration is environment-driven:
//!
//! | Variable | Effect |
//! |---|---|
//! | `FAIR_LOG_CURSOR_PATH` | Required. Path to the cursor file. |
//! | `FAIR_LOG_MOCK_SOURCE` | `true` emits a synthetic record every 2s. |
//! | `FAIR_LOG_MOCK_DESTINATION` | `true` prints NDJSON to stdout. |
//! | `FAIR_LOG_FIREHOSE_STREAM` | Delivery stream (required unless mock). |
//! | `FAIR_LOG_FIREHOSE_CREDENTIALS_ENDPOINT` | EC2 metadata host override. |
//! | `FAIR_LOG_K8_CONFIG_PATH` | Enables Kubernetes enrichment. |
//! | `FAIR_LOG_K8_CONTAINER_NAME_REGEX` | Container-name regex override. |
//! | `EC2_METADATA_*` | Instance metadata stamped onto records. |
//! | `ENV=production` | Structured (JSON) logging. |
//!
//! The process runs in the foreground until interrupted or terminated,
//! then drains the pipeline within the shutdown grace period. Exit code
//! 0 means a clean shutdown; anything else is a fatal pipeline
//! condition, logged with the failing stage.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use logship_core::pipeline::{Config, Pipeline};
use logship_core::{CursorStore, Sink, Source, Transformer};
use logship_io::cursor::FileCursorStore;
use logship_io::sink_firehose::{AwsFirehose, FirehoseSink};
use logship_io::sink_stdout::StdoutSink;
use logship_io::source_journal::{JournalSource, Journalctl};
use logship_io::source_mock::MockSource;
use logship_tx as tx;

/// Interval between synthetic records when running with the mock source.
const MOCK_SOURCE_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "logship")]
#[command(about = "Per-node log shipping agent: journald to Firehose with durable cursor checkpointing")]
struct Args {
    /// Path to the cursor file recording delivery progress
    #[arg(long, env = "FAIR_LOG_CURSOR_PATH")]
    cursor_path: PathBuf,

    /// Emit a synthetic record every 2s instead of tailing the journal
    #[arg(long, env = "FAIR_LOG_MOCK_SOURCE")]
    mock_source: bool,

    /// Write newline-delimited JSON to stdout instead of Firehose
    #[arg(long, env = "FAIR_LOG_MOCK_DESTINATION")]
    mock_destination: bool,

    /// Firehose delivery stream name (required unless mock destination)
    #[arg(long, env = "FAIR_LOG_FIREHOSE_STREAM")]
    firehose_stream: Option<String>,

    /// EC2 metadata host override for Firehose credentials
    #[arg(long, env = "FAIR_LOG_FIREHOSE_CREDENTIALS_ENDPOINT")]
    firehose_credentials_endpoint: Option<String>,

    /// Enable Kubernetes enrichment using this kubeconfig
    #[arg(long, env = "FAIR_LOG_K8_CONFIG_PATH")]
    k8_config_path: Option<PathBuf>,

    /// Override the default container-name regex
    #[arg(long, env = "FAIR_LOG_K8_CONTAINER_NAME_REGEX")]
    k8_container_name_regex: Option<String>,

    /// Seconds to wait for the pipeline to drain on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_grace: u64,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("ENV").as_deref() == Ok("production") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let store = FileCursorStore::open(&args.cursor_path)
        .with_context(|| format!("opening cursor store at {}", args.cursor_path.display()))?;
    let resume = store.cursor();
    if !resume.is_empty() {
        info!(cursor = %resume, "resuming after stored cursor");
    }

    let source: Box<dyn Source> = if args.mock_source {
        info!("using the mock source");
        Box::new(MockSource::new(MOCK_SOURCE_INTERVAL))
    } else {
        let journal = Journalctl::spawn(&resume).context("starting journal tail")?;
        Box::new(JournalSource::new(journal))
    };

    let sink: Box<dyn Sink> = if args.mock_destination {
        info!("using the stdout destination");
        Box::new(StdoutSink)
    } else {
        let Some(stream) = args.firehose_stream.clone() else {
            bail!("FAIR_LOG_FIREHOSE_STREAM must be set when not using the mock destination");
        };
        let api = AwsFirehose::new(args.firehose_credentials_endpoint.as_deref())
            .await
            .context("configuring the Firehose client")?;
        info!(stream = %stream, "delivering to Firehose");
        Box::new(FirehoseSink::new(api, stream))
    };

    let mut transformers: Vec<Transformer> = vec![
        Box::new(tx::journal::transform),
        Box::new(tx::json::transform),
        Box::new(tx::kibana::transform),
        tx::aws::transformer(tx::aws::InstanceMetadata::from_env())?,
    ];
    if let Some(config_path) = &args.k8_config_path {
        let k8 = tx::k8::K8Transform::new(args.k8_container_name_regex.as_deref())?;
        info!(kubeconfig = %config_path.display(), "kubernetes enrichment enabled");
        transformers.push(k8.into_transformer());
    }

    let mut conf = Config::new(Box::new(store), source, sink);
    conf.transformers = transformers;
    let mut pipeline = Pipeline::start(conf);

    let mut sigterm = unix_signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = sigterm.recv() => info!("termination requested, shutting down"),
        result = pipeline.join() => {
            return result.map_err(|err| {
                error!(error = %err, "pipeline failed");
                err
            });
        }
    }

    pipeline.stop(Duration::from_secs(args.shutdown_grace)).await
}
