//! Replication protocol handlers and the factory that builds them.
//!
//! A source handler asks the remote source to stream from a given index; a
//! sync handler sets up two-way synchronisation. Hosts plug in their own
//! factory (e.g. a licensed implementation); [`StandardHandlerFactory`] builds
//! plain descriptors.

use crate::error::Result;
use crate::types::WireType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Arguments for a source handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHandlerArgs {
    /// First index the local queue needs from the source.
    pub next_index_required: i64,
    pub topic_type: String,
    pub element_type: String,
    pub acknowledgement: bool,
    pub message_adaptor: Option<String>,
}

/// Arguments for a sync handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHandlerArgs {
    pub topic_type: String,
    pub element_type: String,
    pub acknowledgement: bool,
    pub message_adaptor: Option<String>,
    pub wire_type: WireType,
}

/// A handler that can be installed on a remote peer.
pub trait ReplicationHandler: Send + Sync + fmt::Debug {
    /// Name the peer uses to pick the decoder for [`encode`](Self::encode).
    fn type_name(&self) -> &'static str;

    fn encode(&self) -> Result<Vec<u8>>;
}

/// Builds role-specific handlers.
pub trait ReplicationHandlerFactory: Send + Sync + fmt::Debug {
    fn new_source(&self, args: SourceHandlerArgs) -> Result<Box<dyn ReplicationHandler>>;

    fn new_sync(&self, args: SyncHandlerArgs) -> Result<Box<dyn ReplicationHandler>>;
}

pub const SOURCE_HANDLER_TYPE: &str = "QueueSourceReplicationHandler";
pub const SYNC_HANDLER_TYPE: &str = "QueueSyncReplicationHandler";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSourceReplicationHandler(pub SourceHandlerArgs);

impl ReplicationHandler for QueueSourceReplicationHandler {
    fn type_name(&self) -> &'static str {
        SOURCE_HANDLER_TYPE
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(&self.0)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSyncReplicationHandler(pub SyncHandlerArgs);

impl ReplicationHandler for QueueSyncReplicationHandler {
    fn type_name(&self) -> &'static str {
        SYNC_HANDLER_TYPE
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(&self.0)?)
    }
}

/// Factory producing [`QueueSourceReplicationHandler`] and
/// [`QueueSyncReplicationHandler`] descriptors.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardHandlerFactory;

impl ReplicationHandlerFactory for StandardHandlerFactory {
    fn new_source(&self, args: SourceHandlerArgs) -> Result<Box<dyn ReplicationHandler>> {
        Ok(Box::new(QueueSourceReplicationHandler(args)))
    }

    fn new_sync(&self, args: SyncHandlerArgs) -> Result<Box<dyn ReplicationHandler>> {
        Ok(Box::new(QueueSyncReplicationHandler(args)))
    }
}

/// Decode the body of a handler built by [`StandardHandlerFactory`].
pub fn decode_source_args(body: &[u8]) -> Result<SourceHandlerArgs> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Decode the body of a handler built by [`StandardHandlerFactory`].
pub fn decode_sync_args(body: &[u8]) -> Result<SyncHandlerArgs> {
    Ok(rmp_serde::from_slice(body)?)
}
