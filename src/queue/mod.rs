//! Queue views: topic-keyed append-only logs with per-thread cursors.
//!
//! # Example
//!
//! ```ignore
//! let asset = StaticAsset::new("/queues/trades").with_queue_config(QueueConfig::new(HostId(1)));
//! let queue: QueueView<String, Trade> = QueueView::new(&asset, QueueOptions::default())?;
//!
//! let index = queue.publish(&"AAPL".to_string(), &trade)?;
//! let excerpt = queue.get(index)?;
//!
//! let mut tailer = queue.tailer()?;
//! while let Some(excerpt) = tailer.poll()? {
//!     println!("{}: {:?}", excerpt.index, excerpt.message);
//! }
//! ```

mod tailer;
mod teardown;
mod view;

pub use tailer::QueueTailer;
pub use teardown::{delete_recursive, StorageOwner};
pub use view::{validate_wire_type, QueueView, TopicPublisher};
