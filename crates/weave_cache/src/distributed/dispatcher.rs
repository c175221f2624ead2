use tracing::debug;

use super::{CacheSyncMsg, DistributedMemoryCache};
use crate::provider::CacheProvider;
use crate::value::StoreOptions;

/// Out-of-band maintenance operations on a distributed cache.
///
/// Each operation acts on the local store first and, when `sync` is set,
/// publishes the matching message so peers follow.
#[derive(Debug, Clone, Copy)]
pub struct SyncDispatcher<'a> {
    cache: &'a DistributedMemoryCache,
}

impl<'a> SyncDispatcher<'a> {
    pub fn new(cache: &'a DistributedMemoryCache) -> Self {
        Self { cache }
    }

    pub fn clean_key(&self, key: &str, sync: bool) {
        self.cache.local().remove(key);
        if sync {
            self.cache
                .publish(Ok(CacheSyncMsg::remove(self.cache.sender(), key)));
        }
    }

    pub fn clean_batch(&self, prefix: &str, sync: bool) -> usize {
        let evicted = self.cache.local().remove_prefix(prefix);
        debug!(prefix, evicted, "cleaned cache batch");
        if sync {
            self.cache
                .publish(Ok(CacheSyncMsg::remove_batch(self.cache.sender(), prefix)));
        }
        evicted
    }

    pub fn clear(&self, sync: bool) {
        self.cache.local().clear();
        if sync {
            self.cache.publish(Ok(CacheSyncMsg::clear(self.cache.sender())));
        }
    }

    /// Re-store `key` with a new lifetime. Returns `false` if the key is absent.
    pub fn update_expire(&self, key: &str, seconds: u32, sync: bool) -> bool {
        let local = self.cache.local();
        let Some(value) = local.take(key) else {
            return false;
        };
        local.store(key, value, &StoreOptions::with_duration(seconds));
        if sync {
            self.cache.publish(Ok(CacheSyncMsg::update_expire(
                self.cache.sender(),
                key,
                seconds,
            )));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::distributed::{CacheAction, LocalBus, SyncTransport};
    use crate::value::CacheValue;

    #[test]
    fn operations_publish_only_when_syncing() {
        let bus = LocalBus::new();
        let observer = bus.subscribe();
        let cache = DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap();
        for key in ["A.one", "A.two", "B.one"] {
            cache.local().store(key, CacheValue::I32(1), &StoreOptions::new());
        }
        let dispatcher = cache.dispatcher();

        dispatcher.clean_key("B.one", false);
        assert!(observer.try_recv().is_err());

        assert_eq!(dispatcher.clean_batch("A.", true), 2);
        let payload = observer
            .recv_timeout(Duration::from_secs(1))
            .expect("batch remove should be published");
        let msg = CacheSyncMsg::from_json(&payload).unwrap();
        assert_eq!(msg.action, CacheAction::Remove);
        assert!(msg.is_batch());
        assert_eq!(msg.cache_key.as_deref(), Some("A."));
        assert!(cache.local().is_empty());
    }

    #[test]
    fn update_expire_restores_with_duration() {
        let bus = LocalBus::new();
        let observer = bus.subscribe();
        let cache = DistributedMemoryCache::new(Arc::new(bus.clone())).unwrap();
        let dispatcher = cache.dispatcher();

        assert!(!dispatcher.update_expire("missing", 30, true));
        assert!(observer.try_recv().is_err());

        cache.local().store("k", CacheValue::Bool(true), &StoreOptions::new());
        assert!(dispatcher.update_expire("k", 30, true));
        let msg = CacheSyncMsg::from_json(&observer.recv_timeout(Duration::from_secs(1)).unwrap())
            .unwrap();
        assert_eq!(msg.action, CacheAction::UpdateExpire);
        assert_eq!(msg.duration, 30);
        assert_eq!(cache.retrieve("k"), Some(CacheValue::Bool(true)));
    }
}
