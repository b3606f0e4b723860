//! In-memory caches and the storage that names them.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::{CacheEntry, RequestKey};

// ==================== Cache ====================

/// A named cache of request/response pairs, kept in insertion order.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<RequestKey, CacheEntry>,
    order: Vec<RequestKey>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Match a request. Only GET keys ever match.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        if !key.is_get() {
            return None;
        }
        self.entries.get(key)
    }

    /// Store an entry, replacing and re-appending any existing one.
    pub fn put(&mut self, entry: CacheEntry) {
        let key = entry.key.clone();
        if self.entries.insert(key.clone(), entry).is_some() {
            self.order.retain(|k| k != &key);
        }
        self.order.push(key);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &RequestKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// All keys, oldest write first.
    pub fn keys(&self) -> Vec<RequestKey> {
        self.order.clone()
    }

    /// Entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Cache storage (the `caches` global), kept in creation order.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Get a cache mutably without creating it.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.get_mut(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        if self.caches.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }

    /// All cache names, in creation order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Match across all caches, searching them in creation order.
    pub fn match_request(&self, key: &RequestKey) -> Option<&CacheEntry> {
        self.order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .find_map(|cache| cache.match_request(key))
    }

    /// Serializable copy of every cache.
    pub fn snapshot(&self) -> StorageSnapshot {
        let caches = self
            .order
            .iter()
            .filter_map(|name| self.caches.get(name))
            .map(|cache| CacheSnapshot {
                name: cache.name.clone(),
                entries: cache.entries().cloned().collect(),
            })
            .collect();
        StorageSnapshot { caches }
    }

    /// Rebuild storage from a snapshot, preserving every order.
    pub fn from_snapshot(snapshot: StorageSnapshot) -> Self {
        let mut storage = Self::new();
        for cache in snapshot.caches {
            let target = storage.open(&cache.name);
            for entry in cache.entries {
                target.put(entry);
            }
        }
        storage
    }
}

/// On-disk form of [`CacheStorage`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub caches: Vec<CacheSnapshot>,
}

/// On-disk form of one [`Cache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub name: String,
    pub entries: Vec<CacheEntry>,
}
