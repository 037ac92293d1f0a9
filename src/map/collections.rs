//! Derived key, entry and value views over a [`MapView`].
//!
//! Views are cheap handles; nothing is read until they are queried or
//! iterated. Iteration walks the store one segment at a time.

use crate::codec;
use crate::error::Result;
use crate::types::Nullable;
use serde::Serialize;
use std::ops::ControlFlow;
use std::vec;

use super::view::MapView;

/// One entry of a map, tied to the view it came from.
pub struct MapEntry<'a, K, V> {
    map: &'a MapView<K, V>,
    key: K,
    value: V,
}

impl<'a, K, V> MapEntry<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }

    /// Write a new value for this entry's key.
    pub fn set_value(&mut self, value: V) -> Result<()> {
        self.map.set(self.key.clone(), value.clone())?;
        self.value = value;
        Ok(())
    }

    /// Remove this entry's key from the map.
    pub fn remove(&self) -> Result<bool> {
        self.map.store().remove(&self.key)
    }
}

/// Iterator over the entries of a map, one segment at a time.
pub struct EntryIter<'a, K, V> {
    map: &'a MapView<K, V>,
    segment: usize,
    buffer: vec::IntoIter<(K, V)>,
}

impl<'a, K, V> EntryIter<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    fn new(map: &'a MapView<K, V>) -> Self {
        Self {
            map,
            segment: 0,
            buffer: Vec::new().into_iter(),
        }
    }
}

impl<'a, K, V> Iterator for EntryIter<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    type Item = MapEntry<'a, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.buffer.next() {
                return Some(MapEntry {
                    map: self.map,
                    key,
                    value,
                });
            }
            if self.segment >= self.map.store().segments() {
                return None;
            }

            let mut entries = Vec::new();
            let flow = self.map.store().entries_for(self.segment, &mut |key, value| {
                entries.push((key.clone(), value.clone()));
                ControlFlow::Continue(())
            });
            // The collecting visitor never breaks, so the segment was read in full.
            debug_assert!(flow.is_continue());
            self.segment += 1;
            self.buffer = entries.into_iter();
        }
    }
}

/// The keys of a map.
pub struct KeySet<'a, K, V> {
    map: &'a MapView<K, V>,
}

impl<'a, K, V> KeySet<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    pub(super) fn new(map: &'a MapView<K, V>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, key: &K) -> Result<bool> {
        self.map.contains_key(key)
    }

    pub fn remove(&self, key: &K) -> Result<bool> {
        self.map.store().remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = K> + 'a {
        EntryIter::new(self.map).map(|entry| entry.key)
    }
}

/// The entries of a map.
pub struct EntrySet<'a, K, V> {
    map: &'a MapView<K, V>,
}

impl<'a, K, V> EntrySet<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    pub(super) fn new(map: &'a MapView<K, V>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether `key` maps to a value byte-equal to `value`.
    pub fn contains(&self, key: &K, value: &V) -> Result<bool> {
        Ok(match self.map.get(key)? {
            Some(current) => codec::bytes_equal(&current, value),
            None => false,
        })
    }

    pub fn remove(&self, key: &K, value: &V) -> Result<bool> {
        self.map.remove_if_equal(key, value)
    }

    pub fn iter(&self) -> EntryIter<'a, K, V> {
        EntryIter::new(self.map)
    }
}

/// The values of a map.
pub struct Values<'a, K, V> {
    map: &'a MapView<K, V>,
}

impl<'a, K, V> Values<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    pub(super) fn new(map: &'a MapView<K, V>) -> Self {
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Full scan, see [`MapView::contains_value`].
    pub fn contains(&self, value: &V) -> Result<bool> {
        self.map.contains_value(value)
    }

    pub fn iter(&self) -> ValuesIter<'a, K, V> {
        ValuesIter {
            entries: EntryIter::new(self.map),
            current: None,
        }
    }
}

/// Iterator over values that can remove the value it last returned.
pub struct ValuesIter<'a, K, V> {
    entries: EntryIter<'a, K, V>,
    current: Option<MapEntry<'a, K, V>>,
}

impl<'a, K, V> ValuesIter<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    /// Remove the entry whose value was returned by the last `next`.
    ///
    /// Returns `false` if `next` has not been called, or the entry was
    /// already removed.
    pub fn remove(&mut self) -> Result<bool> {
        match self.current.take() {
            Some(entry) => entry.remove(),
            None => Ok(false),
        }
    }
}

impl<'a, K, V> Iterator for ValuesIter<'a, K, V>
where
    K: Serialize + Nullable + Clone + Send + Sync + 'static,
    V: Serialize + Nullable + Clone + Send + Sync + 'static,
{
    type Item = V;

    fn next(&mut self) -> Option<V> {
        let entry = self.entries.next()?;
        let value = entry.value.clone();
        self.current = Some(entry);
        Some(value)
    }
}
