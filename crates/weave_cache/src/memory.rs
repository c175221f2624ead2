use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::provider::CacheProvider;
use crate::value::{CacheValue, EvictionMode, StoreOptions};

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
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

#[derive(Debug, Clone)]
struct Expiry {
    mode: EvictionMode,
    lifetime: Duration,
    deadline: Instant,
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    expiry: Option<Expiry>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expiry
            .as_ref()
            .is_some_and(|expiry| now >= expiry.deadline)
    }

    fn touch(&mut self, now: Instant) {
        if let Some(expiry) = self.expiry.as_mut() {
            if expiry.mode == EvictionMode::Sliding {
                expiry.deadline = now + expiry.lifetime;
            }
        }
    }
}

/// In-process cache honouring the `Duration` and `Eviction` store options.
///
/// Expired entries are dropped lazily, on the next access to their key or
/// on the next `keys` enumeration.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every key starting with `prefix`, returning how many went.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub fn clear_count(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Remove `key`, reporting whether a live entry was present.
    pub fn take(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now();
        self.entries
            .write()
            .remove(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    fn live(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let entry = entries.get_mut(key)?;
        if entry.is_expired(now) {
            entries.remove(key);
            return None;
        }
        entry.touch(now);
        Some(entry.value.clone())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl CacheProvider for MemoryCache {
    fn contains(&self, key: &str) -> bool {
        self.live(key).is_some()
    }

    fn retrieve(&self, key: &str) -> Option<CacheValue> {
        self.live(key)
    }

    fn store(&self, key: &str, value: CacheValue, options: &StoreOptions) {
        let now = self.clock.now();
        let expiry = options.duration().map(|lifetime| Expiry {
            mode: options.eviction(),
            lifetime,
            deadline: now + lifetime,
        });
        self.entries
            .write()
            .insert(key.to_string(), Entry { value, expiry });
    }

    fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn keys(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String> {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EVICTION_OPTION;

    fn cache_with_clock() -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (MemoryCache::with_clock(clock.clone()), clock)
    }

    #[test]
    fn entries_without_duration_never_expire() {
        let (cache, clock) = cache_with_clock();
        cache.store("k", CacheValue::I32(1), &StoreOptions::new());
        clock.advance(Duration::from_secs(86_400));
        assert_eq!(cache.retrieve("k"), Some(CacheValue::I32(1)));
    }

    #[test]
    fn absolute_expiry_drops_entry_after_duration() {
        let (cache, clock) = cache_with_clock();
        cache.store("k", CacheValue::I32(1), &StoreOptions::with_duration(10));

        clock.advance(Duration::from_secs(9));
        assert!(cache.contains("k"));
        clock.advance(Duration::from_secs(1));
        assert!(!cache.contains("k"));
        assert!(cache.is_empty());
    }

    #[test]
    fn sliding_expiry_is_refreshed_by_reads() {
        let (cache, clock) = cache_with_clock();
        let mut options = StoreOptions::with_duration(10);
        options.insert(EVICTION_OPTION, CacheValue::Str("sliding".into()));
        cache.store("k", CacheValue::Bool(true), &options);

        for _ in 0..3 {
            clock.advance(Duration::from_secs(8));
            assert!(cache.contains("k"), "read within the window keeps entry alive");
        }
        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.retrieve("k"), None);
    }

    #[test]
    fn remove_prefix_counts_evictions() {
        let (cache, _) = cache_with_clock();
        for key in ["Calc.Add_1", "Calc.Add_2", "Other.Get"] {
            cache.store(key, CacheValue::Null, &StoreOptions::new());
        }
        assert_eq!(cache.remove_prefix("Calc."), 2);
        assert_eq!(cache.keys(&|_| true), vec!["Other.Get".to_string()]);
    }
}
