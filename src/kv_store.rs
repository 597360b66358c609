use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::config::RankPolicy;
use crate::resolve::Assignment;
use crate::utilities::SubjectSet;

/// Bounded store of resolved assignments for a single rank policy.
///
/// A capacity of zero disables caching: every lookup misses and nothing is stored.
pub struct AssignmentCache {
    store: Option<LruCache<SubjectSet, Assignment>>,
    hits: u64,
    misses: u64,
}

impl AssignmentCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: NonZeroUsize::new(capacity).map(LruCache::new),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &SubjectSet) -> Option<Assignment> {
        let found = self.store.as_mut().and_then(|c| c.get(key).cloned());
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    /// Stores an assignment, evicting the least recently used entry when full.
    pub fn put(&mut self, key: SubjectSet, value: Assignment) {
        if let Some(store) = self.store.as_mut() {
            store.put(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.store.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.store.as_ref().map_or(0, |c| c.cap().get())
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, key: &SubjectSet) -> bool {
        self.store.as_ref().is_some_and(|c| c.contains(key))
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

/// One [`AssignmentCache`] per rank policy, created on first use.
///
/// Caches are never shared between ranks: an entry computed at one rank is invisible at
/// every other.
pub struct RankCaches {
    capacity: usize,
    caches: HashMap<RankPolicy, AssignmentCache>,
}

impl RankCaches {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            caches: HashMap::new(),
        }
    }

    pub fn for_rank(&mut self, policy: &RankPolicy) -> &mut AssignmentCache {
        let capacity = self.capacity;
        self.caches
            .entry(policy.clone())
            .or_insert_with(|| AssignmentCache::new(capacity))
    }

    pub fn get(&self, policy: &RankPolicy) -> Option<&AssignmentCache> {
        self.caches.get(policy)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RankPolicy, &AssignmentCache)> {
        self.caches.iter()
    }
}
