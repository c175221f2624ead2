use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::provider::ProviderError;

/// Pub/sub channel carrying serialized [`CacheSyncMsg`](super::CacheSyncMsg)s.
pub trait SyncTransport: Send + Sync {
    fn publish(&self, payload: String) -> Result<(), ProviderError>;

    fn subscribe(&self) -> Receiver<String>;
}

/// In-process broadcast bus. Every subscriber, the publisher included,
/// receives every payload.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    subscribers: Arc<Mutex<Vec<Sender<String>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl SyncTransport for LocalBus {
    fn publish(&self, payload: String) -> Result<(), ProviderError> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| subscriber.send(payload.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Receiver<String> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned_on_publish() {
        let bus = LocalBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish("hello".into()).unwrap();
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), "hello");
    }
}
