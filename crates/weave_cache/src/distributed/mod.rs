//! Memory cache replicated across nodes through invalidation broadcasts.

mod dispatcher;
mod message;
mod transport;

pub use dispatcher::SyncDispatcher;
pub use message::{CacheAction, CacheSyncMsg, STALENESS_WINDOW_SECS};
pub use transport::{LocalBus, SyncTransport};

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::memory::MemoryCache;
use crate::provider::{CacheProvider, ProviderError};
use crate::value::{CacheValue, StoreOptions};

/// What applying an inbound message did to the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { evicted: usize },
    Stale,
    Echo,
    Malformed(String),
}

/// Applies remote messages to the local store only; nothing is republished.
#[derive(Clone)]
struct RemoteApplier {
    local: Arc<MemoryCache>,
    sender: Uuid,
}

impl RemoteApplier {
    fn apply(&self, msg: &CacheSyncMsg, now: DateTime<Utc>) -> ApplyOutcome {
        if msg.sender == self.sender {
            return ApplyOutcome::Echo;
        }
        if msg.is_stale(now) {
            return ApplyOutcome::Stale;
        }

        let key = msg.cache_key.as_deref().unwrap_or_default();
        match msg.action {
            CacheAction::Remove if msg.is_batch() => {
                let evicted = if key.trim().is_empty() {
                    self.local.clear_count()
                } else {
                    self.local.remove_prefix(key)
                };
                ApplyOutcome::Applied { evicted }
            }
            CacheAction::Remove => {
                let evicted = usize::from(self.local.take(key).is_some());
                ApplyOutcome::Applied { evicted }
            }
            CacheAction::UpdateExpire => {
                if let Some(value) = self.local.take(key) {
                    self.local
                        .store(key, value, &StoreOptions::with_duration(msg.duration));
                }
                ApplyOutcome::Applied { evicted: 0 }
            }
            CacheAction::Store => match msg.payload() {
                Ok(Some((value, options))) => {
                    self.local.store(key, value, &options);
                    ApplyOutcome::Applied { evicted: 0 }
                }
                Ok(None) => ApplyOutcome::Applied { evicted: 0 },
                Err(err) => ApplyOutcome::Malformed(err.to_string()),
            },
        }
    }

    fn run(self, inbound: Receiver<String>, shutdown: Receiver<()>) {
        loop {
            select! {
                recv(inbound) -> payload => {
                    let Ok(payload) = payload else { break };
                    match CacheSyncMsg::from_json(&payload) {
                        Ok(msg) => {
                            let outcome = self.apply(&msg, Utc::now());
                            debug!(action = ?msg.action, key = ?msg.cache_key, ?outcome, "applied cache sync message");
                        }
                        Err(err) => warn!("dropping undecodable cache sync message: {err}"),
                    }
                }
                recv(shutdown) -> _ => break,
            }
        }
    }
}

/// A [`MemoryCache`] whose local mutations are broadcast over a
/// [`SyncTransport`] and whose peers' broadcasts are applied by a
/// background worker.
pub struct DistributedMemoryCache {
    applier: RemoteApplier,
    transport: Arc<dyn SyncTransport>,
    shutdown: Sender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedMemoryCache {
    pub fn new(transport: Arc<dyn SyncTransport>) -> Result<Self, ProviderError> {
        Self::with_store(transport, MemoryCache::new())
    }

    pub fn with_store(
        transport: Arc<dyn SyncTransport>,
        store: MemoryCache,
    ) -> Result<Self, ProviderError> {
        let applier = RemoteApplier {
            local: Arc::new(store),
            sender: Uuid::new_v4(),
        };
        let inbound = transport.subscribe();
        let (shutdown_tx, shutdown_rx) = bounded(1);

        let worker_applier = applier.clone();
        let worker = thread::Builder::new()
            .name(format!("cache-sync-{}", applier.sender))
            .spawn(move || worker_applier.run(inbound, shutdown_rx))?;

        Ok(Self {
            applier,
            transport,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Identity stamped on every message this node publishes.
    pub fn sender(&self) -> Uuid {
        self.applier.sender
    }

    pub fn local(&self) -> &MemoryCache {
        &self.applier.local
    }

    pub fn dispatcher(&self) -> SyncDispatcher<'_> {
        SyncDispatcher::new(self)
    }

    /// Apply an inbound message synchronously, as the worker would.
    pub fn apply(&self, msg: &CacheSyncMsg) -> ApplyOutcome {
        self.applier.apply(msg, Utc::now())
    }

    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };
        let _ = self.shutdown.send(());
        if worker.join().is_err() {
            warn!("cache sync worker panicked");
        }
    }

    fn publish(&self, msg: Result<CacheSyncMsg, ProviderError>) {
        let result = msg
            .and_then(|msg| msg.to_json())
            .and_then(|payload| self.transport.publish(payload));
        if let Err(err) = result {
            warn!("failed to publish cache sync message: {err}");
        }
    }
}

impl Drop for DistributedMemoryCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DistributedMemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedMemoryCache")
            .field("sender", &self.applier.sender)
            .field("local", &self.applier.local)
            .finish()
    }
}

impl CacheProvider for DistributedMemoryCache {
    fn contains(&self, key: &str) -> bool {
        self.local().contains(key)
    }

    fn retrieve(&self, key: &str) -> Option<CacheValue> {
        self.local().retrieve(key)
    }

    fn store(&self, key: &str, value: CacheValue, options: &StoreOptions) {
        let msg = CacheSyncMsg::store(self.sender(), key, &value, options);
        self.local().store(key, value, options);
        self.publish(msg);
    }

    fn remove(&self, key: &str) {
        self.local().remove(key);
        self.publish(Ok(CacheSyncMsg::remove(self.sender(), key)));
    }

    fn clear(&self) {
        self.local().clear();
        self.publish(Ok(CacheSyncMsg::clear(self.sender())));
    }

    fn keys(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String> {
        self.local().keys(predicate)
    }

    fn name(&self) -> &'static str {
        "distributed-memory"
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn node(bus: &LocalBus) -> DistributedMemoryCache {
        DistributedMemoryCache::new(Arc::new(bus.clone())).expect("worker should start")
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn own_messages_are_echoes() {
        let bus = LocalBus::new();
        let cache = node(&bus);
        let msg = CacheSyncMsg::remove(cache.sender(), "k");
        assert_eq!(cache.apply(&msg), ApplyOutcome::Echo);
    }

    #[test]
    fn stale_remove_leaves_entry_and_fresh_remove_evicts_once() {
        let bus = LocalBus::new();
        let cache = node(&bus);
        cache
            .local()
            .store("Calc.Add_1_2", CacheValue::I32(3), &StoreOptions::new());

        let mut stale = CacheSyncMsg::remove(Uuid::new_v4(), "Calc.Add_1_2");
        stale.created_at = Utc::now() - chrono::Duration::seconds(STALENESS_WINDOW_SECS + 60);
        assert_eq!(cache.apply(&stale), ApplyOutcome::Stale);
        assert!(cache.contains("Calc.Add_1_2"));

        let fresh = CacheSyncMsg::remove(Uuid::new_v4(), "Calc.Add_1_2");
        assert_eq!(cache.apply(&fresh), ApplyOutcome::Applied { evicted: 1 });
        assert_eq!(cache.apply(&fresh), ApplyOutcome::Applied { evicted: 0 });
        assert!(!cache.contains("Calc.Add_1_2"));
    }

    #[test]
    fn batch_remove_with_prefix_and_clear() {
        let bus = LocalBus::new();
        let cache = node(&bus);
        for key in ["Calc.Add_1", "Calc.Add_2", "User.Name"] {
            cache.local().store(key, CacheValue::Null, &StoreOptions::new());
        }

        let batch = CacheSyncMsg::remove_batch(Uuid::new_v4(), "Calc.");
        assert_eq!(cache.apply(&batch), ApplyOutcome::Applied { evicted: 2 });

        let clear = CacheSyncMsg::clear(Uuid::new_v4());
        assert_eq!(cache.apply(&clear), ApplyOutcome::Applied { evicted: 1 });
        assert!(cache.local().is_empty());
    }

    #[test]
    fn malformed_store_is_reported() {
        let bus = LocalBus::new();
        let cache = node(&bus);
        let mut msg =
            CacheSyncMsg::store(Uuid::new_v4(), "k", &CacheValue::I32(1), &StoreOptions::new())
                .unwrap();
        msg.options
            .insert("DataType".into(), serde_json::Value::String("string".into()));
        assert!(matches!(cache.apply(&msg), ApplyOutcome::Malformed(_)));
        assert!(!cache.contains("k"));
    }

    #[test]
    fn peers_replicate_stores_and_removals() {
        let bus = LocalBus::new();
        let left = node(&bus);
        let right = node(&bus);

        left.store("Calc.Add_1_2", CacheValue::I32(3), &StoreOptions::new());
        assert!(wait_until(|| right.retrieve("Calc.Add_1_2") == Some(CacheValue::I32(3))));

        right.remove("Calc.Add_1_2");
        assert!(wait_until(|| !left.contains("Calc.Add_1_2")));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let bus = LocalBus::new();
        let cache = node(&bus);
        cache.shutdown();
        cache.shutdown();
    }
}
