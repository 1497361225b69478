//! In-process TTL caches for upstream responses.
//!
//! Both upstream APIs are rate limited (the odds API has a monthly request
//! quota), so dashboard handlers serve from these caches and only refresh
//! on expiry. The last good value is kept past its TTL: when a refresh
//! fails, handlers can fall back to the stale snapshot instead of showing
//! nothing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TtlCache<T> {
    slot: Mutex<Option<(T, Instant)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Cached value if it is younger than `ttl`
    pub fn get(&self, ttl: Duration) -> Option<T> {
        let guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some((value, stored_at)) if stored_at.elapsed() < ttl => Some(value.clone()),
            _ => None,
        }
    }

    /// Last stored value regardless of age, with its age
    pub fn last_good(&self) -> Option<(T, Duration)> {
        let guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|(value, stored_at)| (value.clone(), stored_at.elapsed()))
    }

    pub fn put(&self, value: T) {
        let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some((value, Instant::now()));
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_misses() {
        let cache: TtlCache<u32> = TtlCache::new();
        assert_eq!(cache.get(Duration::from_secs(60)), None);
        assert!(cache.last_good().is_none());
    }

    #[test]
    fn test_fresh_value_hits() {
        let cache = TtlCache::new();
        cache.put("odds".to_string());
        assert_eq!(cache.get(Duration::from_secs(60)), Some("odds".to_string()));
    }

    #[test]
    fn test_expired_value_misses_but_stays_as_last_good() {
        let cache = TtlCache::new();
        cache.put(7u32);
        // Zero TTL expires immediately
        assert_eq!(cache.get(Duration::ZERO), None);
        let (value, age) = cache.last_good().unwrap();
        assert_eq!(value, 7);
        assert!(age < Duration::from_secs(5));
    }

    #[test]
    fn test_put_replaces() {
        let cache = TtlCache::new();
        cache.put(1u32);
        cache.put(2u32);
        assert_eq!(cache.get(Duration::from_secs(60)), Some(2));
    }
}
