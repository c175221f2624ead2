//! Cache providers consumed by woven code.
//!
//! Woven members only ever talk to a provider through [`CacheProvider`]:
//! `contains`, `retrieve`, `store` and `remove`, plus `clear` and `keys` for
//! providers that support bulk eviction.

pub mod distributed;
pub mod memory;
pub mod provider;
pub mod runtime;
pub mod value;

pub use distributed::{
    ApplyOutcome, CacheAction, CacheSyncMsg, DistributedMemoryCache, LocalBus, SyncDispatcher,
    SyncTransport, STALENESS_WINDOW_SECS,
};
pub use memory::{Clock, ManualClock, MemoryCache, SystemClock};
pub use provider::{CacheProvider, ProviderError, ProviderRegistry};
pub use runtime::RuntimeCache;
pub use value::{CacheValue, DURATION_OPTION, EVICTION_OPTION, EvictionMode, StoreOptions};
