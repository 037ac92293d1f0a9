//! Subscription & filter pipeline for change notification.
//!
//! Shared by queue and map views:
//! - Subscriber shapes: plain values, `(topic, value)` pairs, change events
//! - Filter chains (FILTER / MAP / FLAT_MAP / PROJECT) in front of a subscriber
//! - A per-path registry fanning events out to every consumer
//!
//! # Example
//!
//! ```ignore
//! let subscription = KvSubscription::<String, i64>::new("/maps/prices");
//!
//! let filtered = FilteredSubscriber::new(
//!     Filter::new().filter(|k: &String| k.starts_with("EUR")),
//!     Arc::new(|key: String| -> Result<()> {
//!         println!("changed: {}", key);
//!         Ok(())
//!     }),
//! );
//! subscription.register_key_subscriber(Arc::new(filtered));
//! ```

mod filter;
mod manager;
mod types;

pub use filter::{Filter, FilteredSubscriber, Operation};
pub use manager::KvSubscription;
pub use types::{
    ChannelSubscriber, Consumer, MapEvent, Subscriber, SubscriptionId, TopicSubscriber,
};
