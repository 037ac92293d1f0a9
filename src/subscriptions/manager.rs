//! Subscription registry for one map path.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Consumer, MapEvent, Subscriber, SubscriptionId, TopicSubscriber};

/// Consumers registered against a map path, fanned out on every change.
///
/// Consumers are invoked outside the registry lock, so a consumer may
/// register or unregister others while handling an event. There is no
/// ordering guarantee between different consumers.
pub struct KvSubscription<K, V> {
    path: String,
    consumers: RwLock<HashMap<SubscriptionId, Consumer<K, V>>>,
    next_id: AtomicU64,
}

impl<K, V> KvSubscription<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            consumers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Register a consumer of any shape.
    pub fn subscribe(&self, consumer: Consumer<K, V>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(path = %self.path, id = id.0, kind = consumer.kind(), "registered subscriber");
        self.consumers.write().insert(id, consumer);
        id
    }

    pub fn register_key_subscriber(&self, subscriber: Arc<dyn Subscriber<K>>) -> SubscriptionId {
        self.subscribe(Consumer::Key(subscriber))
    }

    pub fn register_topic_subscriber(
        &self,
        subscriber: Arc<dyn TopicSubscriber<K, V>>,
    ) -> SubscriptionId {
        self.subscribe(Consumer::Topic(subscriber))
    }

    pub fn register_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber<MapEvent<K, V>>>,
    ) -> SubscriptionId {
        self.subscribe(Consumer::Event(subscriber))
    }

    /// Remove a consumer. Returns false if it was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        self.consumers.write().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.consumers.read().len()
    }

    pub fn has_subscribers(&self) -> bool {
        !self.consumers.read().is_empty()
    }

    /// Deliver `event` to every consumer in the shape it asked for.
    ///
    /// Failures never reach the caller. A consumer that reports
    /// `InvalidSubscriber` is dropped; other failures are logged.
    pub fn notify_event(&self, event: &MapEvent<K, V>) {
        let snapshot: Vec<(SubscriptionId, Consumer<K, V>)> = self
            .consumers
            .read()
            .iter()
            .map(|(id, consumer)| (*id, consumer.clone()))
            .collect();

        let mut to_remove = Vec::new();
        for (id, consumer) in snapshot {
            if let Err(e) = Self::deliver(&consumer, event) {
                if e.is_invalid_subscriber() {
                    to_remove.push(id);
                } else {
                    warn!(path = %self.path, id = id.0, error = %e, "subscriber failed");
                }
            }
        }

        if !to_remove.is_empty() {
            let mut consumers = self.consumers.write();
            for id in to_remove {
                debug!(path = %self.path, id = id.0, "dropping invalid subscriber");
                consumers.remove(&id);
            }
        }
    }

    fn deliver(consumer: &Consumer<K, V>, event: &MapEvent<K, V>) -> Result<()> {
        match consumer {
            Consumer::Key(s) => s.on_message(event.key().clone()),
            Consumer::Topic(s) => s.on_message(event.key().clone(), event.value().cloned()),
            Consumer::Event(s) => s.on_message(event.clone()),
        }
    }
}
