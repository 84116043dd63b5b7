//! Short-lived cache of rewrite results.
//!
//! Entries expire a fixed TTL after they were written. Expired entries are
//! not swept in the background; a lookup that finds one removes it and
//! reports a miss.

use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Time source for expiry checks, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the live value for `key`, evicting it first if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(key) {
            Some(entry) if now > entry.expires_at => {
                entries.remove(key);
                debug!("Evicted expired cache entry ({} left)", entries.len());
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        let expires_at = self.clock.now() + self.ttl;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.into(),
            CacheEntry {
                value: value.into(),
                expires_at,
            },
        );
    }

    /// Number of stored entries, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock(ttl_ms: u64) -> (ResponseCache, ManualClock) {
        let clock = ManualClock::new();
        let cache =
            ResponseCache::with_clock(Duration::from_millis(ttl_ms), Arc::new(clock.clone()));
        (cache, clock)
    }

    #[test]
    fn test_hit_within_ttl() {
        let (cache, clock) = cache_with_clock(1000);
        cache.insert("k", "v");

        clock.advance(Duration::from_millis(999));
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        // Exactly at the expiry instant the entry is still live.
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_lookup() {
        let (cache, clock) = cache_with_clock(1000);
        cache.insert("k", "v");
        clock.advance(Duration::from_millis(1001));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_refreshes_expiry() {
        let (cache, clock) = cache_with_clock(1000);
        cache.insert("k", "old");
        clock.advance(Duration::from_millis(800));
        cache.insert("k", "new");
        clock.advance(Duration::from_millis(800));

        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }

    #[test]
    fn test_missing_key() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        assert_eq!(cache.get("nope"), None);
        assert_eq!(cache.ttl(), Duration::from_secs(60));
    }
}
