//! Byte-capacity LRU cache.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A strict least-recently-used cache bounded by total byte size.
///
/// Every entry carries an explicit byte cost; inserting past the
/// capacity evicts from the cold end until the new entry fits. Recency
/// is touched by [`add`](Self::add), [`get`](Self::get), and
/// [`has`](Self::has) alike.
#[derive(Debug)]
pub struct LruCache<K, V> {
    map: HashMap<K, (V, usize)>,
    /// Keys ordered hottest first.
    order: VecDeque<K>,
    capacity_bytes: usize,
    size_bytes: usize,
}

impl<K: Hash + Eq + Clone, V> LruCache<K, V> {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity_bytes,
            size_bytes: 0,
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).unwrap();
            self.order.push_front(k);
        }
    }

    /// Inserts or replaces an entry, marking it most recently used, then
    /// evicts cold entries until the cache fits its capacity. Returns the
    /// keys evicted.
    pub fn add(&mut self, key: K, value: V, bytes: usize) -> Vec<K> {
        if let Some((_, old)) = self.map.insert(key.clone(), (value, bytes)) {
            self.size_bytes -= old;
            self.touch(&key);
        } else {
            self.order.push_front(key);
        }
        self.size_bytes += bytes;

        let mut evicted = Vec::new();
        while self.size_bytes > self.capacity_bytes && self.order.len() > 1 {
            let cold = self.order.pop_back().unwrap();
            let (_, cost) = self.map.remove(&cold).unwrap();
            self.size_bytes -= cost;
            evicted.push(cold);
        }
        evicted
    }

    /// Looks an entry up and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
            self.map.get(key).map(|(v, _)| v)
        } else {
            None
        }
    }

    /// Membership test; a hit counts as a use.
    pub fn has(&mut self, key: &K) -> bool {
        let hit = self.map.contains_key(key);
        if hit {
            self.touch(key);
        }
        hit
    }

    /// Lookup without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.map.get(key).map(|(v, _)| v)
    }

    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Resident keys, most recently used first.
    pub fn get_all_keys(&self) -> Vec<K> {
        self.order.iter().cloned().collect()
    }
}
