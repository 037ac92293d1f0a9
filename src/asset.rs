//! Boundary to the asset tree that resolves a path to its configuration.
//!
//! The tree itself lives outside this crate. Views only need the handful of
//! lookups below; [`StaticAsset`] answers them from fixed values.

use crate::config::QueueConfig;
use crate::replication::EngineCluster;
use crate::types::HostId;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookups a view performs against its node in the asset tree.
pub trait Asset: Send + Sync {
    /// Full hierarchical path, e.g. `/queues/trades`.
    fn full_name(&self) -> &str;

    /// Local host identifier, if this node is part of a cluster.
    fn host_id(&self) -> Option<HostId>;

    /// Queue configuration for this path.
    fn queue_config(&self) -> Option<QueueConfig>;

    /// Known clusters.
    fn clusters(&self) -> Option<Arc<Clusters>>;
}

/// Named clusters known to this node.
#[derive(Default)]
pub struct Clusters {
    clusters: HashMap<String, Arc<dyn EngineCluster>>,
}

impl Clusters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cluster: Arc<dyn EngineCluster>) {
        self.clusters.insert(cluster.name().to_string(), cluster);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn EngineCluster>> {
        self.clusters.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// An asset answering from values fixed at construction.
#[derive(Clone, Default)]
pub struct StaticAsset {
    full_name: String,
    host_id: Option<HostId>,
    queue_config: Option<QueueConfig>,
    clusters: Option<Arc<Clusters>>,
}

impl StaticAsset {
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            ..Default::default()
        }
    }

    pub fn with_host_id(mut self, host_id: HostId) -> Self {
        self.host_id = Some(host_id);
        self
    }

    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = Some(config);
        self
    }

    pub fn with_clusters(mut self, clusters: Arc<Clusters>) -> Self {
        self.clusters = Some(clusters);
        self
    }
}

impl Asset for StaticAsset {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn host_id(&self) -> Option<HostId> {
        self.host_id
    }

    fn queue_config(&self) -> Option<QueueConfig> {
        self.queue_config.clone()
    }

    fn clusters(&self) -> Option<Arc<Clusters>> {
        self.clusters.clone()
    }
}
