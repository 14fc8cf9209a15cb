//! Block cache configuration.
//!
//! Controls whether blocks consult the store at all, the default expiry, and
//! the capacity of the in-memory store via `blockcache.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

const DEFAULT_TTL_SECONDS: u64 = 300;
const DEFAULT_STORE_CAPACITY: usize = 1024;

/// Block cache configuration from `blockcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlockCacheConfig {
    /// Master switch. When off every block renders as an uncached miss.
    pub enabled: bool,
    /// Expiry applied when a block does not set its own.
    pub default_ttl_seconds: u64,
    /// Maximum entries held by the in-memory store.
    pub store_capacity: usize,
    /// Wrap replayed blocks in HTML comments naming their key.
    pub debug_markers: bool,
}

impl Default for BlockCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            store_capacity: DEFAULT_STORE_CAPACITY,
            debug_markers: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for BlockCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            default_ttl_seconds: settings.default_ttl_seconds,
            store_capacity: settings.store_capacity.get(),
            debug_markers: settings.debug_markers,
        }
    }
}

impl BlockCacheConfig {
    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}
