//! Kubernetes container metadata enrichment.
//!
//! The kubelet encodes pod identity into the container name; this
//! transformer parses it back out and, when the external pod-watcher
//! cache knows the pod, attaches its UID, labels and node. The watcher
//! itself is a separate dependency; only its read side ([`PodTracker`])
//! and the slot it is swapped into live here.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use logship_core::{Record, Transformer};

/// Container names written by the kubelet:
/// `k8s_<container>.<hash>_<pod>_<namespace>_<pod-uid>_<attempt>`.
pub const DEFAULT_CONTAINER_NAME_REGEX: &str =
    r"^k8s_(?P<container_name>[^\._]+)\.?[^_]*_(?P<pod_name>[^_]+)_(?P<namespace>[^_]+)_[^_]+_[a-f0-9]+$";

/// How often the kubeconfig path is polled while it does not exist.
pub const KUBECONFIG_POLL_INTERVAL: Duration = Duration::from_secs(2);

const CONTAINER_NAME: &str = "CONTAINER_NAME";
const CONTAINER_ID_FULL: &str = "CONTAINER_ID_FULL";

/// Pod details served by the external watcher.
#[derive(Debug, Clone, Default)]
pub struct PodInfo {
    pub uid: String,
    pub labels: BTreeMap<String, String>,
    pub node: String,
}

/// Read side of the external pod-watcher cache.
///
/// Implementations must be safe under concurrent reads while their
/// watcher updates them in the background.
pub trait PodTracker: Send + Sync {
    fn get(&self, namespace: &str, pod_name: &str) -> Option<PodInfo>;
}

/// Single-writer / multi-reader slot a tracker is swapped into once the
/// cluster becomes reachable.
pub type TrackerSlot = Arc<RwLock<Option<Arc<dyn PodTracker>>>>;

/// Builds a [`PodTracker`] once the kubeconfig exists.
pub type TrackerFactory = Box<dyn Fn() -> Result<Arc<dyn PodTracker>> + Send>;

#[derive(Debug, Clone, Serialize)]
struct DockerMetadata {
    container_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
struct KubernetesMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    namespace_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pod_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pod_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    container_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    node: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
}

/// Container-name enrichment over an optional pod tracker.
pub struct K8Transform {
    container_name_regex: Regex,
    tracker: TrackerSlot,
}

impl K8Transform {
    /// `regex` overrides the default container-name pattern; it must
    /// keep the `container_name`/`pod_name`/`namespace` capture groups.
    pub fn new(regex: Option<&str>) -> Result<Self> {
        let pattern = regex.unwrap_or(DEFAULT_CONTAINER_NAME_REGEX);
        Ok(Self {
            container_name_regex: Regex::new(pattern)
                .with_context(|| format!("compiling container name regex {pattern}"))?,
            tracker: Arc::new(RwLock::new(None)),
        })
    }

    /// The slot a kubeconfig watcher swaps the tracker into.
    pub fn tracker_slot(&self) -> TrackerSlot {
        Arc::clone(&self.tracker)
    }

    pub fn with_tracker(self, tracker: Arc<dyn PodTracker>) -> Self {
        *self.tracker.write() = Some(tracker);
        self
    }

    pub fn apply(&self, record: &mut Record) -> Result<()> {
        let (name, container_id) = match (
            record.fields.get(CONTAINER_NAME),
            record.fields.get(CONTAINER_ID_FULL),
        ) {
            (Some(Value::String(name)), Some(Value::String(id))) => (name.clone(), id.clone()),
            _ => return Ok(()),
        };
        let Some(captures) = self.container_name_regex.captures(&name) else {
            return Ok(());
        };

        let mut metadata = KubernetesMetadata::default();
        if let Some(namespace) = captures.name("namespace") {
            metadata.namespace_name = namespace.as_str().to_owned();
        }
        if let Some(pod_name) = captures.name("pod_name") {
            metadata.pod_name = pod_name.as_str().to_owned();
        }
        if let Some(container_name) = captures.name("container_name") {
            metadata.container_name = container_name.as_str().to_owned();
        }

        // records processed before a tracker is installed simply carry
        // no pod metadata
        let tracker = self.tracker.read().clone();
        if let Some(tracker) = tracker {
            if let Some(pod) = tracker.get(&metadata.namespace_name, &metadata.pod_name) {
                metadata.pod_id = pod.uid;
                metadata.labels = pod.labels;
                metadata.node = pod.node;
            }
        }

        record.fields.insert(
            "docker".to_owned(),
            serde_json::to_value(DockerMetadata { container_id })?,
        );
        record
            .fields
            .insert("kubernetes".to_owned(), serde_json::to_value(metadata)?);
        Ok(())
    }

    pub fn into_transformer(self) -> Transformer {
        Box::new(move |record: &mut Record| self.apply(record))
    }
}

/// Watches for the kubeconfig to appear and swaps a tracker into the
/// slot once the factory can build one.
pub fn spawn_kubeconfig_watch(
    path: PathBuf,
    poll_interval: Duration,
    slot: TrackerSlot,
    factory: TrackerFactory,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            if !path.exists() {
                continue;
            }
            match factory() {
                Ok(tracker) => {
                    info!(path = %path.display(), "kubeconfig found, pod tracker installed");
                    *slot.write() = Some(tracker);
                    return;
                }
                Err(err) => {
                    warn!(error = %err, path = %path.display(), "kubeconfig present but tracker construction failed");
                }
            }
        }
    });
}
