//! Per-queue replication role resolution and handler installation.

use super::handler::{ReplicationHandlerFactory, SourceHandlerArgs, SyncHandlerArgs};
use super::transport::{
    ConnectionListener, ConnectionManager, HandlerEnvelope, ListenerId, NetworkContext,
};
use crate::asset::Asset;
use crate::config::{QueueConfig, QueueOptions};
use crate::error::{EngineError, Result};
use crate::records::LogStore;
use crate::types::{HostId, WireType};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Replication state of a queue, or of one link to a remote peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicationState {
    /// No host id or no cluster; the queue is standalone.
    Unconfigured,
    /// Role is known and listeners are registered; the link is not up.
    RoleResolved,
    /// A source handler is installed: the remote is the source and streams
    /// to us.
    SourceActive,
    /// A sync handler is installed on the link.
    SinkActive,
    /// Handler creation failed for the link.
    Failed,
    Closed,
}

/// Shared between the coordinator and its connection listeners.
struct Links {
    closed: AtomicBool,
    states: RwLock<HashMap<HostId, ReplicationState>>,
}

impl Links {
    fn set(&self, remote: HostId, state: ReplicationState) {
        self.states.write().insert(remote, state);
    }
}

/// Everything a connection listener needs to build a handler.
struct LinkSetup {
    csp: String,
    local: HostId,
    remote: HostId,
    source: HostId,
    topic_type: String,
    element_type: String,
    acknowledgement: bool,
    message_adaptor: Option<String>,
    wire_type: WireType,
    factory: Arc<dyn ReplicationHandlerFactory>,
    log: Weak<LogStore>,
    links: Arc<Links>,
}

impl LinkSetup {
    fn on_connection(&self, nc: &Arc<dyn NetworkContext>, connected: bool) {
        if self.links.closed.load(Ordering::SeqCst) {
            return;
        }
        if !connected {
            let mut states = self.links.states.write();
            if let Some(state) = states.get_mut(&self.remote) {
                if matches!(
                    state,
                    ReplicationState::SourceActive | ReplicationState::SinkActive
                ) {
                    *state = ReplicationState::RoleResolved;
                }
            }
            debug!(csp = %self.csp, remote = %self.remote, "replication link down");
            return;
        }
        if nc.is_acceptor() {
            return;
        }

        let is_source_link = self.remote == self.source;
        match self.install(nc, is_source_link) {
            Ok(cid) => {
                let state = if is_source_link {
                    ReplicationState::SourceActive
                } else {
                    ReplicationState::SinkActive
                };
                self.links.set(self.remote, state);
                info!(
                    csp = %self.csp,
                    local = %self.local,
                    remote = %self.remote,
                    cid,
                    ?state,
                    "installed replication handler"
                );
            }
            Err(e) => {
                self.links.set(self.remote, ReplicationState::Failed);
                error!(
                    csp = %self.csp,
                    remote = %self.remote,
                    error = %e,
                    "failed to install replication handler"
                );
            }
        }
    }

    fn install(&self, nc: &Arc<dyn NetworkContext>, is_source_link: bool) -> Result<i64> {
        let handler = if is_source_link {
            let next_index_required = self
                .log
                .upgrade()
                .map(|log| next_index_required(&log))
                .unwrap_or(-1);
            self.factory.new_source(SourceHandlerArgs {
                next_index_required,
                topic_type: self.topic_type.clone(),
                element_type: self.element_type.clone(),
                acknowledgement: self.acknowledgement,
                message_adaptor: self.message_adaptor.clone(),
            })?
        } else {
            self.factory.new_sync(SyncHandlerArgs {
                topic_type: self.topic_type.clone(),
                element_type: self.element_type.clone(),
                acknowledgement: self.acknowledgement,
                message_adaptor: self.message_adaptor.clone(),
                wire_type: self.wire_type,
            })?
        };

        let cid = nc.new_cid();
        let envelope = HandlerEnvelope::new(self.csp.clone(), cid, handler.as_ref())?;
        nc.publish(envelope);
        Ok(cid)
    }
}

/// Index a source should resume streaming from.
///
/// One below the local append tail, so the last held record is sent again;
/// the receiving log drops it as a duplicate. `-1` for a fresh log.
pub fn next_index_required(log: &LogStore) -> i64 {
    log.next_index_to_append() - 1
}

/// Decides whether this host is the writable source of a queue and wires a
/// handler onto each link to a peer as it connects.
pub struct ReplicationCoordinator {
    csp: String,
    local: Option<HostId>,
    source: Option<HostId>,
    is_source: bool,
    is_replicating: bool,
    state: RwLock<ReplicationState>,
    links: Arc<Links>,
    registrations: Mutex<Vec<(Arc<dyn ConnectionManager>, ListenerId)>>,
}

impl ReplicationCoordinator {
    /// A coordinator for a queue that does not replicate.
    pub fn standalone(csp: impl Into<String>) -> Self {
        Self {
            csp: csp.into(),
            local: None,
            source: None,
            is_source: false,
            is_replicating: false,
            state: RwLock::new(ReplicationState::Unconfigured),
            links: Arc::new(Links {
                closed: AtomicBool::new(false),
                states: RwLock::new(HashMap::new()),
            }),
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// Resolve the role for the queue at `asset` and register a listener on
    /// the connection manager of every remote peer.
    ///
    /// Without a host id or without the named cluster the queue stays
    /// standalone. Peers without a handler factory are an error.
    pub fn start(
        asset: &dyn Asset,
        options: &QueueOptions,
        config: &QueueConfig,
        log: &Arc<LogStore>,
    ) -> Result<Self> {
        let csp = asset.full_name().to_string();
        let mut coordinator = Self::standalone(csp.clone());

        let Some(local) = asset.host_id() else {
            debug!(csp = %csp, "no host id, replication disabled");
            return Ok(coordinator);
        };
        let cluster = asset
            .clusters()
            .and_then(|clusters| clusters.get(&options.cluster));
        let Some(cluster) = cluster else {
            warn!(csp = %csp, cluster = %options.cluster, "no cluster found, replication disabled");
            return Ok(coordinator);
        };

        let source = config.source_host_id;
        coordinator.local = Some(local);
        coordinator.source = Some(source);
        coordinator.is_source = local == source;
        coordinator.is_replicating = true;
        *coordinator.state.write() = ReplicationState::RoleResolved;

        let peers: Vec<HostId> = cluster
            .host_details()
            .into_iter()
            .map(|details| details.host_id)
            .filter(|host| *host != local)
            .collect();

        info!(
            csp = %csp,
            local = %local,
            source = %source,
            is_source = coordinator.is_source,
            peers = peers.len(),
            "replication role resolved"
        );

        if peers.is_empty() {
            return Ok(coordinator);
        }
        let factory = options.handler_factory.clone().ok_or_else(|| {
            EngineError::HandlerUnavailable(format!(
                "no replication handler factory configured for {}",
                csp
            ))
        })?;

        for remote in peers {
            coordinator.links.set(remote, ReplicationState::RoleResolved);

            let Some(manager) = cluster.find_connection_manager(remote) else {
                warn!(csp = %csp, remote = %remote, "no connection manager for peer");
                continue;
            };

            let setup = LinkSetup {
                csp: csp.clone(),
                local,
                remote,
                source,
                topic_type: options.topic_type.clone(),
                element_type: options.element_type.clone(),
                acknowledgement: config.acknowledgment,
                message_adaptor: config
                    .message_adaptor
                    .as_ref()
                    .map(|adaptor| adaptor.name().to_string()),
                wire_type: config.wire_type,
                factory: Arc::clone(&factory),
                log: Arc::downgrade(log),
                links: Arc::clone(&coordinator.links),
            };
            let listener: ConnectionListener =
                Arc::new(move |nc: &Arc<dyn NetworkContext>, connected: bool| {
                    setup.on_connection(nc, connected)
                });
            let id = manager.add_listener(listener);
            coordinator.registrations.lock().push((manager, id));
        }

        Ok(coordinator)
    }

    pub fn csp(&self) -> &str {
        &self.csp
    }

    pub fn is_source(&self) -> bool {
        self.is_source
    }

    pub fn is_replicating(&self) -> bool {
        self.is_replicating
    }

    pub fn local_host(&self) -> Option<HostId> {
        self.local
    }

    pub fn source_host(&self) -> Option<HostId> {
        self.source
    }

    pub fn state(&self) -> ReplicationState {
        *self.state.read()
    }

    /// State of the link to `remote`, if it is a known peer.
    pub fn link_state(&self, remote: HostId) -> Option<ReplicationState> {
        self.links.states.read().get(&remote).copied()
    }

    /// Fails if this host holds a read-only replica.
    pub fn check_writable(&self) -> Result<()> {
        match (self.is_replicating, self.is_source, self.local, self.source) {
            (true, false, Some(local), Some(source)) => Err(EngineError::SinkWrite {
                local,
                source_host: source,
            }),
            _ => Ok(()),
        }
    }

    /// Stop reacting to connection events and deregister every listener.
    /// Idempotent.
    pub fn close(&self) {
        if self.links.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (manager, id) in self.registrations.lock().drain(..) {
            manager.remove_listener(id);
        }
        *self.state.write() = ReplicationState::Closed;
        let mut states = self.links.states.write();
        for state in states.values_mut() {
            *state = ReplicationState::Closed;
        }
        debug!(csp = %self.csp, "replication closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Clusters, StaticAsset};
    use crate::replication::local::{ChannelConnection, LocalCluster};
    use crate::replication::{decode_source_args, StandardHandlerFactory, SOURCE_HANDLER_TYPE};
    use tempfile::TempDir;

    fn setup(
        local: u8,
        source: u8,
        factory: bool,
    ) -> (TempDir, Arc<LocalCluster>, Arc<LogStore>, Result<ReplicationCoordinator>) {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(LogStore::open(dir.path()).unwrap());
        let cluster = Arc::new(LocalCluster::new("cluster", &[HostId(1), HostId(2), HostId(3)]));
        let mut clusters = Clusters::new();
        clusters.insert(cluster.clone());
        let asset = StaticAsset::new("/queues/trades")
            .with_host_id(HostId(local))
            .with_clusters(Arc::new(clusters));
        let mut options = QueueOptions::default();
        if factory {
            options.handler_factory = Some(Arc::new(StandardHandlerFactory));
        }
        let coordinator =
            ReplicationCoordinator::start(&asset, &options, &QueueConfig::new(HostId(source)), &log);
        (dir, cluster, log, coordinator)
    }

    #[test]
    fn test_standalone_without_host_id() {
        let dir = TempDir::new().unwrap();
        let log = Arc::new(LogStore::open(dir.path()).unwrap());
        let asset = StaticAsset::new("/queues/trades");
        let coordinator = ReplicationCoordinator::start(
            &asset,
            &QueueOptions::default(),
            &QueueConfig::new(HostId(1)),
            &log,
        )
        .unwrap();

        assert!(!coordinator.is_replicating());
        assert_eq!(coordinator.state(), ReplicationState::Unconfigured);
        assert!(coordinator.check_writable().is_ok());
    }

    #[test]
    fn test_role_resolution() {
        let (_dir, cluster, _log, coordinator) = setup(1, 1, true);
        let coordinator = coordinator.unwrap();
        assert!(coordinator.is_source());
        assert!(coordinator.is_replicating());
        assert_eq!(coordinator.link_state(HostId(2)), Some(ReplicationState::RoleResolved));
        assert_eq!(coordinator.link_state(HostId(1)), None);
        assert_eq!(cluster.manager(HostId(2)).unwrap().listener_count(), 1);
        assert_eq!(cluster.manager(HostId(1)).unwrap().listener_count(), 0);

        let (_dir, _cluster, _log, coordinator) = setup(2, 1, true);
        let coordinator = coordinator.unwrap();
        assert!(!coordinator.is_source());
        assert!(matches!(
            coordinator.check_writable(),
            Err(EngineError::SinkWrite { .. })
        ));
    }

    #[test]
    fn test_missing_factory_fails() {
        let (_dir, _cluster, _log, coordinator) = setup(1, 1, false);
        assert!(matches!(coordinator, Err(EngineError::HandlerUnavailable(_))));
    }

    #[test]
    fn test_source_link_requests_tail_minus_one() {
        let (_dir, cluster, log, coordinator) = setup(2, 1, true);
        let coordinator = coordinator.unwrap();
        for i in 0..5 {
            log.append(b"t", format!("m{}", i).as_bytes()).unwrap();
        }

        let (connection, outbound) = ChannelConnection::new(false);
        let nc: Arc<dyn NetworkContext> = Arc::new(connection);
        cluster.manager(HostId(1)).unwrap().notify(&nc, true);

        let envelope = outbound.try_recv().unwrap();
        assert_eq!(envelope.csp, "/queues/trades");
        assert_eq!(envelope.handler.type_name, SOURCE_HANDLER_TYPE);
        let args = decode_source_args(&envelope.handler.body).unwrap();
        assert_eq!(args.next_index_required, 4);
        assert_eq!(coordinator.link_state(HostId(1)), Some(ReplicationState::SourceActive));

        cluster.manager(HostId(1)).unwrap().notify(&nc, false);
        assert_eq!(coordinator.link_state(HostId(1)), Some(ReplicationState::RoleResolved));
    }

    #[test]
    fn test_acceptor_links_are_ignored() {
        let (_dir, cluster, _log, coordinator) = setup(1, 1, true);
        let coordinator = coordinator.unwrap();

        let (connection, outbound) = ChannelConnection::new(true);
        let nc: Arc<dyn NetworkContext> = Arc::new(connection);
        cluster.manager(HostId(2)).unwrap().notify(&nc, true);

        assert!(outbound.try_recv().is_err());
        assert_eq!(coordinator.link_state(HostId(2)), Some(ReplicationState::RoleResolved));
    }

    #[test]
    fn test_closed_coordinator_ignores_connections() {
        let (_dir, cluster, _log, coordinator) = setup(1, 1, true);
        let coordinator = coordinator.unwrap();
        coordinator.close();
        coordinator.close();

        let (connection, outbound) = ChannelConnection::new(false);
        let nc: Arc<dyn NetworkContext> = Arc::new(connection);
        cluster.manager(HostId(3)).unwrap().notify(&nc, true);

        assert!(outbound.try_recv().is_err());
        assert_eq!(coordinator.state(), ReplicationState::Closed);
        assert_eq!(coordinator.link_state(HostId(3)), Some(ReplicationState::Closed));
    }

    #[test]
    fn test_close_deregisters_listeners() {
        let (_dir, cluster, _log, coordinator) = setup(1, 1, true);
        let coordinator = coordinator.unwrap();
        assert_eq!(cluster.manager(HostId(2)).unwrap().listener_count(), 1);
        assert_eq!(cluster.manager(HostId(3)).unwrap().listener_count(), 1);

        coordinator.close();
        assert_eq!(cluster.manager(HostId(2)).unwrap().listener_count(), 0);
        assert_eq!(cluster.manager(HostId(3)).unwrap().listener_count(), 0);
    }

    #[test]
    fn test_next_index_required() {
        let dir = TempDir::new().unwrap();
        let log = LogStore::open(dir.path()).unwrap();
        assert_eq!(next_index_required(&log), -1);
        log.append(b"t", b"a").unwrap();
        log.append(b"t", b"b").unwrap();
        assert_eq!(next_index_required(&log), 1);
    }
}
