//! Boundary to the network layer that carries replication traffic.

use super::handler::ReplicationHandler;
use crate::config::HostDetails;
use crate::error::Result;
use crate::types::HostId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handler installation record sent to the remote peer.
///
/// `csp` names the queue so the peer can route later traffic on this `cid`
/// to the right local instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEnvelope {
    pub csp: String,
    pub cid: i64,
    pub handler: TypedHandler,
}

/// A handler body tagged with its type name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedHandler {
    pub type_name: String,
    pub body: Vec<u8>,
}

impl HandlerEnvelope {
    pub fn new(csp: impl Into<String>, cid: i64, handler: &dyn ReplicationHandler) -> Result<Self> {
        Ok(Self {
            csp: csp.into(),
            cid,
            handler: TypedHandler {
                type_name: handler.type_name().to_string(),
                body: handler.encode()?,
            },
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// One established link to a remote host.
pub trait NetworkContext: Send + Sync {
    /// True if the remote side opened this connection.
    fn is_acceptor(&self) -> bool;

    /// Fresh connection session identifier.
    fn new_cid(&self) -> i64;

    /// Queue a record for sending. Does not wait for delivery.
    fn publish(&self, envelope: HandlerEnvelope);
}

/// Called with the link and `true` on connect, `false` on disconnect.
pub type ConnectionListener = Arc<dyn Fn(&Arc<dyn NetworkContext>, bool) + Send + Sync>;

/// Handle for removing a registered [`ConnectionListener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Connection state notifications for one remote host.
pub trait ConnectionManager: Send + Sync {
    fn add_listener(&self, listener: ConnectionListener) -> ListenerId;

    /// Returns false if `id` was not registered.
    fn remove_listener(&self, id: ListenerId) -> bool;
}

/// A named set of hosts and the connections between them.
pub trait EngineCluster: Send + Sync {
    fn name(&self) -> &str;

    fn host_details(&self) -> Vec<HostDetails>;

    fn find_connection_manager(&self, remote: HostId) -> Option<Arc<dyn ConnectionManager>>;
}
