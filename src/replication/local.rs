//! In-process cluster transport.
//!
//! Connection events are driven by hand through
//! [`LocalConnectionManager::notify`] and published envelopes land in a
//! channel, which makes role resolution observable without a network.

use super::transport::{
    ConnectionListener, ConnectionManager, EngineCluster, HandlerEnvelope, ListenerId,
    NetworkContext,
};
use crate::config::HostDetails;
use crate::types::HostId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A link whose published envelopes go to a channel.
pub struct ChannelConnection {
    acceptor: bool,
    next_cid: AtomicI64,
    sender: Sender<HandlerEnvelope>,
}

impl ChannelConnection {
    pub fn new(acceptor: bool) -> (Self, Receiver<HandlerEnvelope>) {
        let (sender, receiver) = unbounded();
        let connection = Self {
            acceptor,
            next_cid: AtomicI64::new(1),
            sender,
        };
        (connection, receiver)
    }
}

impl NetworkContext for ChannelConnection {
    fn is_acceptor(&self) -> bool {
        self.acceptor
    }

    fn new_cid(&self) -> i64 {
        self.next_cid.fetch_add(1, Ordering::SeqCst)
    }

    fn publish(&self, envelope: HandlerEnvelope) {
        // The receiver going away is a closed link.
        if self.sender.send(envelope).is_err() {
            trace!("publish on closed link");
        }
    }
}

#[derive(Default)]
pub struct LocalConnectionManager {
    listeners: Mutex<Vec<(ListenerId, ConnectionListener)>>,
    next_id: AtomicU64,
}

impl LocalConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a connect (`true`) or disconnect on `nc` to every listener.
    pub fn notify(&self, nc: &Arc<dyn NetworkContext>, connected: bool) {
        let listeners: Vec<ConnectionListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(nc, connected);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl ConnectionManager for LocalConnectionManager {
    fn add_listener(&self, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }
}

/// A cluster of hosts living in one process, with one connection manager
/// per host.
pub struct LocalCluster {
    name: String,
    hosts: Vec<HostDetails>,
    managers: HashMap<HostId, Arc<LocalConnectionManager>>,
}

impl LocalCluster {
    pub fn new(name: impl Into<String>, hosts: &[HostId]) -> Self {
        let hosts: Vec<HostDetails> = hosts
            .iter()
            .map(|host| HostDetails {
                host_id: *host,
                connect_uri: format!("local://{}", host),
            })
            .collect();
        Self::from_details(name, hosts)
    }

    /// Cluster over hosts described in configuration.
    pub fn from_details(name: impl Into<String>, hosts: Vec<HostDetails>) -> Self {
        let managers = hosts
            .iter()
            .map(|details| (details.host_id, Arc::new(LocalConnectionManager::new())))
            .collect();
        Self {
            name: name.into(),
            hosts,
            managers,
        }
    }

    /// Connection manager for links to `remote`.
    pub fn manager(&self, remote: HostId) -> Option<Arc<LocalConnectionManager>> {
        self.managers.get(&remote).cloned()
    }
}

impl EngineCluster for LocalCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn host_details(&self) -> Vec<HostDetails> {
        self.hosts.clone()
    }

    fn find_connection_manager(&self, remote: HostId) -> Option<Arc<dyn ConnectionManager>> {
        self.managers
            .get(&remote)
            .map(|manager| Arc::clone(manager) as Arc<dyn ConnectionManager>)
    }
}
