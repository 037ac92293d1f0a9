//! # Chronicle Engine
//!
//! Core of a data-grid node: topic-keyed append-only queues, key/value map
//! views and change subscriptions, replicated across the hosts of a cluster.
//!
//! ## Core Concepts
//!
//! - **Queues**: Durable logs of `(topic, message, index)` excerpts with
//!   per-thread cursors
//! - **Maps**: Null-checked views over a segmented key/value store
//! - **Subscriptions**: Key, topic and change-event consumers behind
//!   filter chains
//! - **Replication**: One writable source per queue; every other host is a
//!   read-only sink
//!
//! ## Example
//!
//! ```ignore
//! use chronicle_engine::{HostId, QueueConfig, QueueOptions, QueueView, StaticAsset};
//!
//! let asset = StaticAsset::new("/queues/trades")
//!     .with_queue_config(QueueConfig::new(HostId(1)));
//! let queue: QueueView<String, String> = QueueView::new(&asset, QueueOptions {
//!     base_path: Some("./data".into()),
//!     ..Default::default()
//! })?;
//!
//! // Append and read back
//! let index = queue.publish(&"AAPL".to_string(), &"buy 100".to_string())?;
//! let excerpt = queue.get(index)?;
//!
//! // Map with change notification
//! let prices = MapView::<String, f64>::in_memory("/maps/prices", 16, MapOptions::default());
//! prices.register_key_subscriber(Arc::new(|key: String| -> Result<()> {
//!     println!("changed: {}", key);
//!     Ok(())
//! }));
//! prices.put("AAPL".into(), 187.5)?;
//! ```

pub mod asset;
pub mod codec;
pub mod config;
pub mod error;
pub mod map;
pub mod queue;
pub mod records;
pub mod replication;
pub mod session;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use asset::{Asset, Clusters, StaticAsset};
pub use config::{EngineConfig, HostDetails, MapOptions, MessageAdaptor, QueueConfig, QueueOptions};
pub use error::{EngineError, Result};
pub use map::{KeyValueStore, MapView, SegmentedStore};
pub use queue::{QueueTailer, QueueView};
pub use records::{Appender, LogStore, Tailer};
pub use replication::{
    EngineCluster, ReplicationCoordinator, ReplicationHandlerFactory, ReplicationSink,
    ReplicationState, ReplicationStream, StandardHandlerFactory,
};
pub use session::{ContextId, SessionManager};
pub use subscriptions::{
    ChannelSubscriber, Filter, FilteredSubscriber, KvSubscription, MapEvent, Subscriber,
    SubscriptionId, TopicSubscriber,
};
pub use types::*;
