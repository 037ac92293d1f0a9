//! Subscriber shapes and change events.

use crate::error::{EngineError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Receives plain values (keys, messages).
///
/// Returning [`EngineError::InvalidSubscriber`] asks the registry to drop
/// this subscriber.
pub trait Subscriber<E>: Send + Sync {
    fn on_message(&self, message: E) -> Result<()>;
}

impl<E, F> Subscriber<E> for F
where
    F: Fn(E) -> Result<()> + Send + Sync,
{
    fn on_message(&self, message: E) -> Result<()> {
        self(message)
    }
}

/// Receives `(topic, value)` pairs. The value is `None` for removals.
pub trait TopicSubscriber<T, M>: Send + Sync {
    fn on_message(&self, topic: T, message: Option<M>) -> Result<()>;
}

impl<T, M, F> TopicSubscriber<T, M> for F
where
    F: Fn(T, Option<M>) -> Result<()> + Send + Sync,
{
    fn on_message(&self, topic: T, message: Option<M>) -> Result<()> {
        self(topic, message)
    }
}

/// Structured change to a map entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MapEvent<K, V> {
    Insert { key: K, value: V },
    Update { key: K, old_value: V, value: V },
    Remove { key: K, old_value: V },
}

impl<K, V> MapEvent<K, V> {
    pub fn key(&self) -> &K {
        match self {
            MapEvent::Insert { key, .. }
            | MapEvent::Update { key, .. }
            | MapEvent::Remove { key, .. } => key,
        }
    }

    /// Value after the change; `None` for removals.
    pub fn value(&self) -> Option<&V> {
        match self {
            MapEvent::Insert { value, .. } | MapEvent::Update { value, .. } => Some(value),
            MapEvent::Remove { .. } => None,
        }
    }

    /// Value before the change; `None` for inserts.
    pub fn old_value(&self) -> Option<&V> {
        match self {
            MapEvent::Update { old_value, .. } | MapEvent::Remove { old_value, .. } => {
                Some(old_value)
            }
            MapEvent::Insert { .. } => None,
        }
    }
}

/// A registered consumer, tagged by the event shape it wants.
pub enum Consumer<K, V> {
    /// Keys of changed entries.
    Key(Arc<dyn Subscriber<K>>),
    /// Key and new value of changed entries.
    Topic(Arc<dyn TopicSubscriber<K, V>>),
    /// Full change events.
    Event(Arc<dyn Subscriber<MapEvent<K, V>>>),
}

impl<K, V> Clone for Consumer<K, V> {
    fn clone(&self) -> Self {
        match self {
            Consumer::Key(s) => Consumer::Key(Arc::clone(s)),
            Consumer::Topic(s) => Consumer::Topic(Arc::clone(s)),
            Consumer::Event(s) => Consumer::Event(Arc::clone(s)),
        }
    }
}

impl<K, V> Consumer<K, V> {
    pub fn kind(&self) -> &'static str {
        match self {
            Consumer::Key(_) => "key",
            Consumer::Topic(_) => "topic",
            Consumer::Event(_) => "event",
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Subscriber that forwards into a bounded channel.
///
/// A full or disconnected channel makes the subscriber invalid, so slow
/// consumers are dropped instead of blocking the publisher.
pub struct ChannelSubscriber<E> {
    sender: Sender<E>,
}

impl<E: Send> ChannelSubscriber<E> {
    /// Create a subscriber and the receiving end of its channel.
    pub fn bounded(buffer_size: usize) -> (Self, Receiver<E>) {
        let (sender, receiver) = bounded(buffer_size);
        (Self { sender }, receiver)
    }
}

impl<E: Send> Subscriber<E> for ChannelSubscriber<E> {
    fn on_message(&self, message: E) -> Result<()> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(EngineError::InvalidSubscriber)
            }
        }
    }
}
