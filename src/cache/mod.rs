//! C9 — Recommendation Cache.
//!
//! Optional short-TTL cache keyed by `(session, filters, count,
//! history_length)` (spec §4.9). Disabled entirely via config without
//! affecting correctness.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::orchestrator::{RecommendFilters, RecommendResult};

struct CacheEntry {
    value: RecommendResult,
    inserted_at: Instant,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
}

pub struct RecommendationCache {
    entries: Mutex<LruCache<u64, CacheEntry>>,
    session_keys: DashMap<Uuid, HashSet<u64>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecommendationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = std::num::NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            entries: Mutex::new(LruCache::new(cap)),
            session_keys: DashMap::new(),
            ttl,
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn key(session_id: Uuid, filters: &RecommendFilters, count: usize, history_length: usize) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        session_id.hash(&mut hasher);
        serde_json::to_string(filters).unwrap_or_default().hash(&mut hasher);
        count.hash(&mut hasher);
        history_length.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get(&self, key: u64) -> Option<RecommendResult> {
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.pop(&key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, session_id: Uuid, key: u64, value: RecommendResult) {
        let mut entries = self.entries.lock();
        if let Some((evicted_key, _)) = entries.push(key, CacheEntry { value, inserted_at: Instant::now() }) {
            if evicted_key != key {
                Self::untrack(&self.session_keys, evicted_key);
            }
        }
        drop(entries);
        self.session_keys.entry(session_id).or_default().insert(key);
    }

    fn untrack(session_keys: &DashMap<Uuid, HashSet<u64>>, key: u64) {
        session_keys.retain(|_, keys| {
            keys.remove(&key);
            !keys.is_empty()
        });
    }

    /// Invalidate every cache entry associated with a session (spec §4.6
    /// step 9, a belt-and-braces measure on top of the history-length key
    /// component).
    pub fn invalidate_session(&self, session_id: Uuid) {
        if let Some((_, keys)) = self.session_keys.remove(&session_id) {
            let mut entries = self.entries.lock();
            for key in keys {
                entries.pop(&key);
            }
        }
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        self.session_keys.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.lock().len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandit::ConfidenceTier;
    use crate::orchestrator::{DiversityInfo, UserStats};

    fn sample_result() -> RecommendResult {
        RecommendResult {
            items: vec![],
            partial: false,
            diversity_info: DiversityInfo {
                avoided_categories: vec![],
                avoided_colors: vec![],
                avoided_brands: vec![],
                exclusion_window_size: 0,
            },
            user_stats: UserStats { total_interactions: 0, confidence_tier: ConfidenceTier::VeryLow, alpha: 0.3 },
        }
    }

    #[test]
    fn put_then_get_round_trips_and_counts_hit() {
        let cache = RecommendationCache::new(10, Duration::from_secs(300));
        let session = Uuid::new_v4();
        let key = RecommendationCache::key(session, &RecommendFilters::default(), 1, 0);
        cache.put(session, key, sample_result());
        assert!(cache.get(key).is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_on_unknown_key_is_counted() {
        let cache = RecommendationCache::new(10, Duration::from_secs(300));
        assert!(cache.get(12345).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn expired_entry_is_treated_as_a_miss() {
        let cache = RecommendationCache::new(10, Duration::from_millis(1));
        let session = Uuid::new_v4();
        let key = RecommendationCache::key(session, &RecommendFilters::default(), 1, 0);
        cache.put(session, key, sample_result());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(key).is_none());
    }

    #[test]
    fn invalidate_session_removes_its_entries() {
        let cache = RecommendationCache::new(10, Duration::from_secs(300));
        let session = Uuid::new_v4();
        let key = RecommendationCache::key(session, &RecommendFilters::default(), 1, 0);
        cache.put(session, key, sample_result());
        cache.invalidate_session(session);
        assert!(cache.get(key).is_none());
    }

    #[test]
    fn history_length_changes_the_key() {
        let session = Uuid::new_v4();
        let k1 = RecommendationCache::key(session, &RecommendFilters::default(), 1, 0);
        let k2 = RecommendationCache::key(session, &RecommendFilters::default(), 1, 1);
        assert_ne!(k1, k2);
    }
}
