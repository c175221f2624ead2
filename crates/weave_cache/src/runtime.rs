use std::collections::HashMap;

use parking_lot::RwLock;

use crate::provider::CacheProvider;
use crate::value::{CacheValue, StoreOptions};

/// Unbounded in-process map. Store options are accepted and ignored.
#[derive(Debug, Default)]
pub struct RuntimeCache {
    storage: RwLock<HashMap<String, CacheValue>>,
}

impl RuntimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.read().is_empty()
    }
}

impl CacheProvider for RuntimeCache {
    fn contains(&self, key: &str) -> bool {
        self.storage.read().contains_key(key)
    }

    fn retrieve(&self, key: &str) -> Option<CacheValue> {
        self.storage.read().get(key).cloned()
    }

    fn store(&self, key: &str, value: CacheValue, _options: &StoreOptions) {
        self.storage.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.storage.write().remove(key);
    }

    fn clear(&self) {
        self.storage.write().clear();
    }

    fn keys(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String> {
        self.storage
            .read()
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect()
    }

    fn name(&self) -> &'static str {
        "runtime"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_remove() {
        let cache = RuntimeCache::new();
        cache.store("a.b_1", CacheValue::I32(7), &StoreOptions::with_duration(5));
        assert!(cache.contains("a.b_1"));
        assert_eq!(cache.retrieve("a.b_1"), Some(CacheValue::I32(7)));

        cache.remove("a.b_1");
        assert!(!cache.contains("a.b_1"));
        assert!(cache.is_empty());
    }

    #[test]
    fn keys_filters_by_predicate() {
        let cache = RuntimeCache::new();
        for key in ["user.1", "user.2", "order.1"] {
            cache.store(key, CacheValue::Null, &StoreOptions::new());
        }
        let mut keys = cache.keys(&|key| key.starts_with("user."));
        keys.sort();
        assert_eq!(keys, vec!["user.1".to_string(), "user.2".to_string()]);
    }
}
