//! Segmented key/value store boundary and an in-memory implementation.

use crate::codec;
use crate::error::Result;
use crate::subscriptions::{KvSubscription, MapEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Visitor over the live entries of one segment. Returning
/// `ControlFlow::Break` stops the scan.
pub type EntryVisitor<'a, K, V> = dyn FnMut(&K, &V) -> ControlFlow<()> + 'a;

/// Key/value storage split into independently locked segments.
///
/// Methods without a `get_and_` prefix do not fetch the previous value.
pub trait KeyValueStore<K, V>: Send + Sync {
    fn segments(&self) -> usize;

    /// Visit every entry of `segment`. Returns `Break` if the visitor broke
    /// out early.
    fn entries_for(&self, segment: usize, visitor: &mut EntryVisitor<'_, K, V>) -> ControlFlow<()>;

    fn get(&self, key: &K) -> Result<Option<V>>;

    /// Copy the value for `key` into `using`. Returns `false`, leaving `using`
    /// untouched, if the key is absent.
    fn get_using(&self, key: &K, using: &mut V) -> Result<bool>;

    fn contains_key(&self, key: &K) -> Result<bool>;

    fn put(&self, key: K, value: V) -> Result<()>;

    fn get_and_put(&self, key: K, value: V) -> Result<Option<V>>;

    fn remove(&self, key: &K) -> Result<bool>;

    fn get_and_remove(&self, key: &K) -> Result<Option<V>>;

    /// Insert unless present. Returns the existing value if there was one.
    fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>>;

    fn remove_if_equal(&self, key: &K, value: &V) -> Result<bool>;

    /// Replace only if present. Returns the previous value.
    fn replace(&self, key: K, value: V) -> Result<Option<V>>;

    fn replace_if_equal(&self, key: K, old_value: &V, new_value: V) -> Result<bool>;

    fn long_size(&self) -> u64;

    fn clear(&self) -> Result<()>;
}

type Segment<K, V> = RwLock<HashMap<Vec<u8>, (K, V)>>;

/// In-memory [`KeyValueStore`].
///
/// Keys are routed to a segment by the CRC32 of their binary encoding. Value
/// comparisons are on encoded bytes. Changes are reported to an attached
/// subscription after the segment lock is released.
pub struct SegmentedStore<K, V> {
    segments: Vec<Segment<K, V>>,
    subscription: Option<Arc<KvSubscription<K, V>>>,
}

impl<K, V> SegmentedStore<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: Serialize + Clone + Send + Sync + 'static,
{
    pub const DEFAULT_SEGMENTS: usize = 16;

    pub fn new(segments: usize) -> Self {
        let segments = segments.max(1);
        Self {
            segments: (0..segments).map(|_| RwLock::new(HashMap::new())).collect(),
            subscription: None,
        }
    }

    pub fn with_subscription(mut self, subscription: Arc<KvSubscription<K, V>>) -> Self {
        self.subscription = Some(subscription);
        self
    }

    fn locate(&self, key: &K) -> Result<(&Segment<K, V>, Vec<u8>)> {
        let bytes = codec::to_bytes(key)?;
        let segment = crc32fast::hash(&bytes) as usize % self.segments.len();
        Ok((&self.segments[segment], bytes))
    }

    fn notify(&self, event: MapEvent<K, V>) {
        if let Some(subscription) = &self.subscription {
            if subscription.has_subscribers() {
                subscription.notify_event(&event);
            }
        }
    }

    fn insert(&self, key: K, value: V) -> Result<Option<V>> {
        let (segment, bytes) = self.locate(&key)?;
        let old = segment
            .write()
            .insert(bytes, (key.clone(), value.clone()))
            .map(|(_, old)| old);
        self.notify(match &old {
            Some(old_value) => MapEvent::Update {
                key,
                old_value: old_value.clone(),
                value,
            },
            None => MapEvent::Insert { key, value },
        });
        Ok(old)
    }

    fn take(&self, key: &K) -> Result<Option<V>> {
        let (segment, bytes) = self.locate(key)?;
        let old = segment.write().remove(&bytes).map(|(_, old)| old);
        if let Some(old_value) = &old {
            self.notify(MapEvent::Remove {
                key: key.clone(),
                old_value: old_value.clone(),
            });
        }
        Ok(old)
    }
}

impl<K, V> KeyValueStore<K, V> for SegmentedStore<K, V>
where
    K: Serialize + Clone + Send + Sync + 'static,
    V: Serialize + Clone + Send + Sync + 'static,
{
    fn segments(&self) -> usize {
        self.segments.len()
    }

    fn entries_for(&self, segment: usize, visitor: &mut EntryVisitor<'_, K, V>) -> ControlFlow<()> {
        let Some(segment) = self.segments.get(segment) else {
            return ControlFlow::Continue(());
        };
        // Snapshot so the visitor may write back to the store.
        let entries: Vec<(K, V)> = segment.read().values().cloned().collect();
        for (key, value) in &entries {
            visitor(key, value)?;
        }
        ControlFlow::Continue(())
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        let (segment, bytes) = self.locate(key)?;
        Ok(segment.read().get(&bytes).map(|(_, v)| v.clone()))
    }

    fn get_using(&self, key: &K, using: &mut V) -> Result<bool> {
        let (segment, bytes) = self.locate(key)?;
        match segment.read().get(&bytes) {
            Some((_, value)) => {
                using.clone_from(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn contains_key(&self, key: &K) -> Result<bool> {
        let (segment, bytes) = self.locate(key)?;
        Ok(segment.read().contains_key(&bytes))
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        self.insert(key, value).map(|_| ())
    }

    fn get_and_put(&self, key: K, value: V) -> Result<Option<V>> {
        self.insert(key, value)
    }

    fn remove(&self, key: &K) -> Result<bool> {
        self.take(key).map(|old| old.is_some())
    }

    fn get_and_remove(&self, key: &K) -> Result<Option<V>> {
        self.take(key)
    }

    fn put_if_absent(&self, key: K, value: V) -> Result<Option<V>> {
        let (segment, bytes) = self.locate(&key)?;
        {
            let mut entries = segment.write();
            if let Some((_, existing)) = entries.get(&bytes) {
                return Ok(Some(existing.clone()));
            }
            entries.insert(bytes, (key.clone(), value.clone()));
        }
        self.notify(MapEvent::Insert { key, value });
        Ok(None)
    }

    fn remove_if_equal(&self, key: &K, value: &V) -> Result<bool> {
        let (segment, bytes) = self.locate(key)?;
        let expected = codec::to_bytes(value)?;
        let removed = {
            let mut entries = segment.write();
            let matches = match entries.get(&bytes) {
                Some((_, current)) => codec::to_bytes(current)? == expected,
                None => false,
            };
            if matches {
                entries.remove(&bytes).map(|(_, old)| old)
            } else {
                None
            }
        };
        match removed {
            Some(old_value) => {
                self.notify(MapEvent::Remove {
                    key: key.clone(),
                    old_value,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn replace(&self, key: K, value: V) -> Result<Option<V>> {
        let (segment, bytes) = self.locate(&key)?;
        let old = {
            let mut entries = segment.write();
            match entries.get_mut(&bytes) {
                Some(entry) => Some(std::mem::replace(&mut entry.1, value.clone())),
                None => None,
            }
        };
        if let Some(old_value) = &old {
            self.notify(MapEvent::Update {
                key,
                old_value: old_value.clone(),
                value,
            });
        }
        Ok(old)
    }

    fn replace_if_equal(&self, key: K, old_value: &V, new_value: V) -> Result<bool> {
        let (segment, bytes) = self.locate(&key)?;
        let expected = codec::to_bytes(old_value)?;
        let replaced = {
            let mut entries = segment.write();
            match entries.get_mut(&bytes) {
                Some(entry) if codec::to_bytes(&entry.1)? == expected => {
                    Some(std::mem::replace(&mut entry.1, new_value.clone()))
                }
                _ => None,
            }
        };
        match replaced {
            Some(old_value) => {
                self.notify(MapEvent::Update {
                    key,
                    old_value,
                    value: new_value,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn long_size(&self) -> u64 {
        self.segments.iter().map(|s| s.read().len() as u64).sum()
    }

    fn clear(&self) -> Result<()> {
        for segment in &self.segments {
            let drained: Vec<(K, V)> = segment.write().drain().map(|(_, entry)| entry).collect();
            for (key, old_value) in drained {
                self.notify(MapEvent::Remove { key, old_value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn store() -> SegmentedStore<String, i64> {
        SegmentedStore::new(4)
    }

    #[test]
    fn test_point_operations() {
        let store = store();
        assert_eq!(store.get_and_put("a".into(), 1).unwrap(), None);
        assert_eq!(store.get_and_put("a".into(), 2).unwrap(), Some(1));
        assert_eq!(store.put_if_absent("a".into(), 3).unwrap(), Some(2));
        assert_eq!(store.replace("b".into(), 3).unwrap(), None);
        assert!(!store.contains_key(&"b".into()).unwrap());

        assert!(!store.replace_if_equal("a".into(), &9, 10).unwrap());
        assert!(store.replace_if_equal("a".into(), &2, 10).unwrap());
        assert!(!store.remove_if_equal(&"a".into(), &2).unwrap());
        assert!(store.remove_if_equal(&"a".into(), &10).unwrap());
        assert_eq!(store.long_size(), 0);
    }

    #[test]
    fn test_get_using() {
        let store = store();
        store.put("a".into(), 7).unwrap();
        let mut value = 0;
        assert!(store.get_using(&"a".into(), &mut value).unwrap());
        assert_eq!(value, 7);
        assert!(!store.get_using(&"z".into(), &mut value).unwrap());
        assert_eq!(value, 7);
    }

    #[test]
    fn test_entries_spread_over_segments() {
        let store = SegmentedStore::<String, i64>::new(8);
        for i in 0..100 {
            store.put(format!("k{}", i), i).unwrap();
        }

        let mut seen = 0;
        let mut non_empty = 0;
        for segment in 0..store.segments() {
            let mut count = 0;
            let _ = store.entries_for(segment, &mut |_, _| {
                count += 1;
                ControlFlow::Continue(())
            });
            seen += count;
            if count > 0 {
                non_empty += 1;
            }
        }
        assert_eq!(seen, 100);
        assert!(non_empty > 1);
    }

    #[test]
    fn test_visitor_can_break() {
        let store = SegmentedStore::<String, i64>::new(1);
        for i in 0..10 {
            store.put(format!("k{}", i), i).unwrap();
        }
        let mut visited = 0;
        let flow = store.entries_for(0, &mut |_, _| {
            visited += 1;
            ControlFlow::Break(())
        });
        assert!(flow.is_break());
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_changes_are_published() {
        let subscription = Arc::new(KvSubscription::<String, i64>::new("/maps/m"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&events);
        subscription.register_subscriber(Arc::new(move |event: MapEvent<String, i64>| -> Result<()> {
            e.lock().push(event);
            Ok(())
        }));
        let store = SegmentedStore::new(2).with_subscription(Arc::clone(&subscription));

        store.put("a".into(), 1).unwrap();
        store.put("a".into(), 2).unwrap();
        store.remove(&"a".into()).unwrap();
        store.remove(&"a".into()).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                MapEvent::Insert { key: "a".into(), value: 1 },
                MapEvent::Update { key: "a".into(), old_value: 1, value: 2 },
                MapEvent::Remove { key: "a".into(), old_value: 2 },
            ]
        );
    }
}
