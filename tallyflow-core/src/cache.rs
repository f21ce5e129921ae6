//! Bounded least-recently-used map.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    hash::Hash,
};

pub const DEFAULT_CAPACITY: usize = 50;

/// Fixed-capacity map that evicts the least recently used entry.
///
/// Both [`LruCache::get`] and [`LruCache::put`] count as a use. Owned by a
/// single worker, so there is no internal locking.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> fmt::Debug for LruCache<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .field("order", &self.order)
            .finish()
    }
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get_mut(key)
    }

    /// Inserts or replaces `key`, returning the entry evicted to make room.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return None;
        }

        self.order.push_back(key);
        if self.entries.len() <= self.capacity {
            return None;
        }

        let oldest = self.order.pop_front()?;
        self.entries.remove(&oldest).map(|value| (oldest, value))
    }

    /// Drops `key`, returning its value.
    pub fn evict(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.retain(|candidate| candidate != key);
        Some(value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn touch(&mut self, key: &K) {
        if let Some(position) = self.order.iter().position(|k| k == key)
            && let Some(existing) = self.order.remove(position)
        {
            self.order.push_back(existing);
        }
    }
}

impl<K, V> Default for LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
