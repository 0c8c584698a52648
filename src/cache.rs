// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The `seen_collections` cache (§5, §9 "encapsulate as fields of a
//! long-lived engine instance; no language-level globals"). Short-circuits
//! repeated collection inserts in the remote back-end: once a
//! `(registry_id, collection)` pair is known to already exist, the Postgres
//! store skips re-issuing the identity-attribute upsert for it.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub struct SeenCollections {
    inner: Mutex<LruCache<(String, String), ()>>,
}

impl SeenCollections {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        SeenCollections {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Returns `true` if this is the first time `(registry_id, collection)`
    /// has been seen, recording it either way.
    pub fn mark_and_check_first(&self, registry_id: &str, collection: &str) -> bool {
        let key = (registry_id.to_string(), collection.to_string());
        let mut guard = self.inner.lock().unwrap();
        if guard.contains(&key) {
            guard.promote(&key);
            false
        } else {
            guard.put(key, ());
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_reports_true_then_false() {
        let cache = SeenCollections::new(4);
        assert!(cache.mark_and_check_first("r1", "c1"));
        assert!(!cache.mark_and_check_first("r1", "c1"));
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let cache = SeenCollections::new(2);
        assert!(cache.mark_and_check_first("r1", "a"));
        assert!(cache.mark_and_check_first("r1", "b"));
        assert!(cache.mark_and_check_first("r1", "c")); // evicts "a"
        // "a" was evicted, so it's reported as first-sighting again.
        assert!(cache.mark_and_check_first("r1", "a"));
    }
}
