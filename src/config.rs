//! Configuration for queue and map views.

use crate::asset::{Clusters, StaticAsset};
use crate::error::Result;
use crate::replication::local::LocalCluster;
use crate::replication::ReplicationHandlerFactory;
use crate::types::{HostId, WireType};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transformation applied to replicated message bytes before they are
/// written to the receiving queue.
pub trait MessageAdaptor: Send + Sync {
    /// Name carried in replication handler descriptors.
    fn name(&self) -> &str;

    fn adapt(&self, message: &[u8]) -> Vec<u8>;
}

/// Per-queue configuration, as resolved from the asset tree.
#[derive(Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub wire_type: WireType,

    /// Host that owns the writable copy of the queue.
    pub source_host_id: HostId,

    /// If true each replication event is acknowledged back to the source.
    #[serde(default)]
    pub acknowledgment: bool,

    #[serde(skip)]
    pub message_adaptor: Option<Arc<dyn MessageAdaptor>>,
}

impl QueueConfig {
    pub fn new(source_host_id: HostId) -> Self {
        Self {
            wire_type: WireType::Binary,
            source_host_id,
            acknowledgment: false,
            message_adaptor: None,
        }
    }

    pub fn with_wire_type(mut self, wire_type: WireType) -> Self {
        self.wire_type = wire_type;
        self
    }

    pub fn with_acknowledgment(mut self, acknowledgment: bool) -> Self {
        self.acknowledgment = acknowledgment;
        self
    }

    pub fn with_message_adaptor(mut self, adaptor: Arc<dyn MessageAdaptor>) -> Self {
        self.message_adaptor = Some(adaptor);
        self
    }
}

impl fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConfig")
            .field("wire_type", &self.wire_type)
            .field("source_host_id", &self.source_host_id)
            .field("acknowledgment", &self.acknowledgment)
            .field(
                "message_adaptor",
                &self.message_adaptor.as_ref().map(|a| a.name().to_string()),
            )
            .finish()
    }
}

/// Options for opening a queue view.
#[derive(Clone, Debug)]
pub struct QueueOptions {
    /// Queue name, used under `base_path`.
    pub name: String,

    /// Root directory for queue data. When `None` the asset path and the
    /// local host id are used instead.
    pub base_path: Option<PathBuf>,

    /// Delete all backing storage when the view closes.
    pub dont_persist: bool,

    /// Cluster to replicate over.
    pub cluster: String,

    /// Type descriptors carried in replication handlers.
    pub topic_type: String,
    pub element_type: String,

    /// Sync the log to disk every N appends (0 = every append).
    pub sync_interval: u64,

    /// Number of decoded records kept in the read cache.
    pub read_cache_size: usize,

    /// Builds source/sync replication handlers. Required when replicating.
    pub handler_factory: Option<Arc<dyn ReplicationHandlerFactory>>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            name: "queue".to_string(),
            base_path: None,
            dont_persist: false,
            cluster: "cluster".to_string(),
            topic_type: "String".to_string(),
            element_type: "String".to_string(),
            sync_interval: 100,
            read_cache_size: 1024,
            handler_factory: None,
        }
    }
}

impl QueueOptions {
    /// Directory holding the queue's log.
    pub fn queue_dir(&self, asset_path: &str, host_id: Option<HostId>) -> PathBuf {
        match &self.base_path {
            Some(base) => base.join(&self.name),
            None => {
                let default_path = asset_path.strip_prefix('/').unwrap_or(asset_path);
                let host = host_id.map(|h| h.to_string()).unwrap_or_else(|| "null".into());
                Path::new(default_path).join(host)
            }
        }
    }
}

/// Options for map views.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct MapOptions {
    /// Skip fetching the previous value on `put`.
    #[serde(default = "default_true")]
    pub put_returns_null: bool,

    /// Skip fetching the previous value on `remove`.
    #[serde(default = "default_true")]
    pub remove_returns_null: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            put_returns_null: true,
            remove_returns_null: true,
        }
    }
}

/// Description of one host as loaded from JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct HostDetails {
    pub host_id: HostId,
    #[serde(default)]
    pub connect_uri: String,
}

/// Node-level configuration: who we are, which clusters exist and how each
/// queue path replicates.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    pub host_id: Option<HostId>,
    #[serde(default)]
    pub clusters: HashMap<String, Vec<HostDetails>>,
    #[serde(default)]
    pub queues: HashMap<String, QueueConfig>,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// One in-process cluster per configured entry, in name order.
    pub fn local_clusters(&self) -> Vec<Arc<LocalCluster>> {
        let mut names: Vec<&String> = self.clusters.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| Arc::new(LocalCluster::from_details(name.clone(), self.clusters[name].clone())))
            .collect()
    }

    /// Build the asset for `path`.
    ///
    /// Live `clusters` are attached as given. Without them, any configured
    /// clusters are attached as in-process [`LocalCluster`]s.
    pub fn into_asset(&self, path: &str, clusters: Option<Arc<Clusters>>) -> StaticAsset {
        let mut asset = StaticAsset::new(path);
        if let Some(host_id) = self.host_id {
            asset = asset.with_host_id(host_id);
        }
        if let Some(config) = self.queues.get(path) {
            asset = asset.with_queue_config(config.clone());
        }
        let clusters = clusters.or_else(|| {
            if self.clusters.is_empty() {
                return None;
            }
            let mut local = Clusters::new();
            for cluster in self.local_clusters() {
                local.insert(cluster);
            }
            Some(Arc::new(local))
        });
        if let Some(clusters) = clusters {
            asset = asset.with_clusters(clusters);
        }
        asset
    }
}
