//! Source/sink replication of queues across a cluster.
//!
//! Each queue has one writable source host; every other host holds a
//! read-only replica. The [`ReplicationCoordinator`] resolves the local role
//! from the asset's host id and queue config, then installs a handler on each
//! outbound link to a peer as it connects:
//!
//! - link to the source: a source handler asking for records from one below
//!   the local tail
//! - any other link: a sync handler carrying the wire type
//!
//! The network itself sits behind [`EngineCluster`], [`ConnectionManager`]
//! and [`NetworkContext`]; [`local`] provides an in-process implementation.

mod coordinator;
mod handler;
pub mod local;
mod stream;
mod transport;

pub use coordinator::{next_index_required, ReplicationCoordinator, ReplicationState};
pub use handler::{
    decode_source_args, decode_sync_args, QueueSourceReplicationHandler,
    QueueSyncReplicationHandler, ReplicationHandler, ReplicationHandlerFactory,
    SourceHandlerArgs, StandardHandlerFactory, SyncHandlerArgs, SOURCE_HANDLER_TYPE,
    SYNC_HANDLER_TYPE,
};
pub use stream::{ReplicationSink, ReplicationStream};
pub use transport::{
    ConnectionListener, ConnectionManager, EngineCluster, HandlerEnvelope, ListenerId,
    NetworkContext, TypedHandler,
};
