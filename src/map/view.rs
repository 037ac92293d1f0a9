//! Null-checked map interface over a [`KeyValueStore`] and its subscriptions.

use crate::codec;
use crate::config::MapOptions;
use crate::error::{EngineError, Result};
use crate::subscriptions::{
    Filter, FilteredSubscriber, KvSubscription, MapEvent, Subscriber, SubscriptionId,
    TopicSubscriber,
};
use crate::types::Nullable;
use serde::Serialize;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, warn};

use super::collections::{EntrySet, KeySet, MapEntry, Values};
use super::store::{KeyValueStore, SegmentedStore};

/// Map interface over a segmented key/value store at one asset path.
///
/// Null keys and values are rejected before the store is touched. Change
/// notifications come from the store through the shared subscription.
pub struct MapView<K, V> {
    path: String,
    store: Arc<dyn KeyValueStore<K, V>>,
    subscription: Arc<KvSubscription<K, V>>,
    options: MapOptions,
}

impl<K, V> MapView<K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    /// View over `store`. The store is expected to publish its changes to
    /// `subscription`.
    pub fn new(
        path: impl Into<String>,
        store: Arc<dyn KeyValueStore<K, V>>,
        subscription: Arc<KvSubscription<K, V>>,
        options: MapOptions,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            subscription,
            options,
        }
    }

    /// View over a fresh [`SegmentedStore`] wired to its own subscription.
    pub fn in_memory(path: impl Into<String>, segments: usize, options: MapOptions) -> Self {
        let path = path.into();
        let subscription = Arc::new(KvSubscription::new(path.clone()));
        let store = SegmentedStore::new(segments).with_subscription(Arc::clone(&subscription));
        Self::new(path, Arc::new(store), subscription, options)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn options(&self) -> MapOptions {
        self.options
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore<K, V>> {
        &self.store
    }

    pub fn subscription(&self) -> &Arc<KvSubscription<K, V>> {
        &self.subscription
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        check_key(key)?;
        self.store.get(key)
    }

    /// Copy the value for `key` into `using`. Returns `false` if absent.
    pub fn get_using(&self, key: &K, using: &mut V) -> Result<bool> {
        check_key(key)?;
        self.store.get_using(key, using)
    }

    /// Store `value` under `key`.
    ///
    /// Returns the previous value only when `put_returns_null` is off;
    /// otherwise the previous value is never fetched and `None` is returned.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        check_key(&key)?;
        check_value(&value)?;
        if self.options.put_returns_null {
            self.store.put(key, value)?;
            Ok(None)
        } else {
            self.store.get_and_put(key, value)
        }
    }

    /// Store `value` under `key` without fetching the previous value.
    pub fn set(&self, key: K, value: V) -> Result<()> {
        check_key(&key)?;
        check_value(&value)?;
        self.store.put(key, value)
    }

    pub fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        check_key(&key)?;
        check_value(&value)?;
        self.store.get_and_put(key, value)
    }

    /// Store every entry. Stops at the first null key or value; entries
    /// before it stay stored.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        check_key(&key)?;
        check_value(&value)?;
        self.store.put_if_absent(key, value)
    }

    /// Remove `key`. Returns the previous value only when
    /// `remove_returns_null` is off.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        check_key(key)?;
        if self.options.remove_returns_null {
            self.store.remove(key)?;
            Ok(None)
        } else {
            self.store.get_and_remove(key)
        }
    }

    pub fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        check_key(key)?;
        self.store.get_and_remove(key)
    }

    pub fn remove_if_equal(&self, key: &K, value: &V) -> Result<bool> {
        check_key(key)?;
        check_value(value)?;
        self.store.remove_if_equal(key, value)
    }

    pub fn replace(&self, key: K, value: V) -> Result<Option<V>> {
        check_key(&key)?;
        check_value(&value)?;
        self.store.replace(key, value)
    }

    pub fn replace_if_equal(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        check_key(&key)?;
        check_value(old_value)?;
        check_value(&new_value)?;
        self.store.replace_if_equal(key, old_value, new_value)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        check_key(key)?;
        self.store.contains_key(key)
    }

    /// Whether any entry holds `value`.
    ///
    /// There is no value index: this scans every segment comparing encoded
    /// bytes, stopping at the first match. O(n) in the size of the map.
    pub fn contains_value(&self, value: &V) -> Result<bool> {
        check_value(value)?;
        let target = codec::to_bytes(value)?;
        for segment in 0..self.store.segments() {
            let flow = self.store.entries_for(segment, &mut |_, candidate| {
                match codec::to_bytes(candidate) {
                    Ok(bytes) if bytes == target => ControlFlow::Break(()),
                    _ => ControlFlow::Continue(()),
                }
            });
            if flow.is_break() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn size(&self) -> usize {
        self.store.long_size() as usize
    }

    pub fn long_size(&self) -> u64 {
        self.store.long_size()
    }

    pub fn is_empty(&self) -> bool {
        self.store.long_size() == 0
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    /// Same size and every entry has a byte-equal counterpart in `other`.
    ///
    /// Differing sizes return immediately; otherwise this is a full scan.
    pub fn equals(&self, other: &dyn KeyValueStore<K, V>) -> bool {
        if self.store.long_size() != other.long_size() {
            return false;
        }
        for segment in 0..self.store.segments() {
            let flow = self.store.entries_for(segment, &mut |key, value| match other.get(key) {
                Ok(Some(theirs)) if codec::bytes_equal(value, &theirs) => ControlFlow::Continue(()),
                _ => ControlFlow::Break(()),
            });
            if flow.is_break() {
                return false;
            }
        }
        true
    }

    pub fn key_set(&self) -> KeySet<'_, K, V> {
        KeySet::new(self)
    }

    pub fn entry_set(&self) -> EntrySet<'_, K, V> {
        EntrySet::new(self)
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values::new(self)
    }

    /// Live reference to the value of `key`. Not supported by this view.
    pub fn reference_for(&self, _key: &K) -> Result<MapEntry<'_, K, V>> {
        Err(EngineError::Unsupported(format!("reference_for on map {}", self.path)))
    }

    pub fn register_topic_subscriber(
        &self,
        subscriber: Arc<dyn TopicSubscriber<K, V>>,
    ) -> SubscriptionId {
        self.subscription.register_topic_subscriber(subscriber)
    }

    pub fn register_key_subscriber(&self, subscriber: Arc<dyn Subscriber<K>>) -> SubscriptionId {
        self.subscription.register_key_subscriber(subscriber)
    }

    /// Key subscription behind a filter chain.
    ///
    /// With `bootstrap_only` the current keys are pushed through the chain
    /// once and nothing is registered, so `None` is returned. A subscriber
    /// reporting `InvalidSubscriber` ends the bootstrap early.
    pub fn register_filtered_key_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber<K>>,
        filter: Filter<K>,
        bootstrap_only: bool,
    ) -> Option<SubscriptionId> {
        let filtered = FilteredSubscriber::new(filter, subscriber);
        if !bootstrap_only {
            return Some(self.subscription.register_key_subscriber(Arc::new(filtered)));
        }

        for key in self.key_set().iter() {
            match filtered.on_message(key) {
                Ok(()) => {}
                Err(e) if e.is_invalid_subscriber() => {
                    debug!(path = %self.path, "bootstrap stopped by subscriber");
                    break;
                }
                Err(e) => warn!(path = %self.path, error = %e, "bootstrap delivery failed"),
            }
        }
        None
    }

    pub fn register_subscriber(
        &self,
        subscriber: Arc<dyn Subscriber<MapEvent<K, V>>>,
    ) -> SubscriptionId {
        self.subscription.register_subscriber(subscriber)
    }

    pub fn unregister_topic_subscriber(&self, id: SubscriptionId) -> bool {
        self.subscription.unregister(id)
    }

    pub fn unregister_key_subscriber(&self, id: SubscriptionId) -> bool {
        self.subscription.unregister(id)
    }

    pub fn unregister_subscriber(&self, id: SubscriptionId) -> bool {
        self.subscription.unregister(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscription.subscriber_count()
    }
}

impl<K, V> PartialEq for MapView<K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    fn eq(&self, other: &Self) -> bool {
        self.equals(other.store.as_ref())
    }
}

/// `{k1=v1, k2=v2}` in segment order.
impl<K, V> fmt::Display for MapView<K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + fmt::Display + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + fmt::Display + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries = Vec::new();
        for segment in 0..self.store.segments() {
            let flow = self.store.entries_for(segment, &mut |key, value| {
                entries.push(format!("{}={}", key, value));
                ControlFlow::Continue(())
            });
            debug_assert!(flow.is_continue());
        }
        write!(f, "{{{}}}", entries.join(", "))
    }
}

fn check_key<K: Nullable + ?Sized>(key: &K) -> Result<()> {
    if key.is_null() {
        return Err(EngineError::NullNotAllowed("key"));
    }
    Ok(())
}

fn check_value<V: Nullable + ?Sized>(value: &V) -> Result<()> {
    if value.is_null() {
        return Err(EngineError::NullNotAllowed("value"));
    }
    Ok(())
}
