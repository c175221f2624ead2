use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::value::{CacheValue, StoreOptions};

/// The capability contract every cache provider implements.
///
/// Implementations are shared between all woven call sites and must be safe
/// to call concurrently. The probe-then-store sequence performed by woven
/// code is not atomic across these calls.
pub trait CacheProvider: Send + Sync {
    fn contains(&self, key: &str) -> bool;

    fn retrieve(&self, key: &str) -> Option<CacheValue>;

    fn store(&self, key: &str, value: CacheValue, options: &StoreOptions);

    fn remove(&self, key: &str);

    fn clear(&self);

    fn keys(&self, predicate: &dyn Fn(&str) -> bool) -> Vec<String>;

    fn name(&self) -> &'static str {
        "provider"
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("no cache provider configured")]
    NotConfigured,
    #[error("failed to encode cache sync message: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("cache sync payload is invalid: {0}")]
    Payload(String),
    #[error("cache sync transport closed")]
    TransportClosed,
    #[error("failed to start cache sync worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Handle to the provider woven code resolves on first use.
///
/// The registry is passed explicitly to whoever executes woven code; clones
/// share the same slot.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    slot: Arc<RwLock<Option<Arc<dyn CacheProvider>>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(provider: Arc<dyn CacheProvider>) -> Self {
        let registry = Self::new();
        registry.install(provider);
        registry
    }

    /// Install `provider`, returning the one it replaces.
    pub fn install(&self, provider: Arc<dyn CacheProvider>) -> Option<Arc<dyn CacheProvider>> {
        self.slot.write().replace(provider)
    }

    pub fn uninstall(&self) -> Option<Arc<dyn CacheProvider>> {
        self.slot.write().take()
    }

    pub fn provider(&self) -> Result<Arc<dyn CacheProvider>, ProviderError> {
        self.slot.read().clone().ok_or(ProviderError::NotConfigured)
    }

    pub fn is_configured(&self) -> bool {
        self.slot.read().is_some()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provider = self.slot.read().as_ref().map(|provider| provider.name());
        f.debug_struct("ProviderRegistry")
            .field("provider", &provider)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeCache;

    #[test]
    fn empty_registry_reports_not_configured() {
        let registry = ProviderRegistry::new();
        assert!(matches!(registry.provider(), Err(ProviderError::NotConfigured)));
    }

    #[test]
    fn clones_share_the_installed_provider() {
        let registry = ProviderRegistry::new();
        let shared = registry.clone();
        registry.install(Arc::new(RuntimeCache::new()));

        let provider = shared.provider().expect("provider installed through clone");
        provider.store("k", CacheValue::I32(1), &StoreOptions::new());
        assert!(registry.provider().unwrap().contains("k"));
    }
}
