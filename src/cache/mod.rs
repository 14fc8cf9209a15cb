//! Block output cache.
//!
//! Callers wrap a region of rendered output in a named block. On a hit the
//! stored bytes are replayed; on a miss the block renders, its output is
//! captured, emitted once and stored with a TTL.
//!
//! - **Keys**: explicit suffix, composable [`KeyBuilder`]s, or the block name,
//!   digested and prefixed with the current generation stamp.
//! - **Invalidation**: [`GenerationStamps::rotate`] orphans every stored block
//!   at once.
//! - **Policies**: per-block predicates that veto caching for a request.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 300
//! store_capacity = 1024
//! debug_markers = false
//! ```

mod capture;
mod config;
mod engine;
mod keys;
mod lock;
mod pending;
mod policy;
mod stamp;
mod store;

pub use capture::{CaptureHandle, OutputBuffer};
pub use config::BlockCacheConfig;
pub use engine::{BlockCache, BlockEngine, BlockFrame, BlockOptions};
pub use keys::{
    KEY_DIGEST_LEN, KeyBuilder, QueryContextKeyBuilder, ViewerIdentityKeyBuilder, effective_key,
    hash_hex, key_material,
};
pub use pending::{
    ApprovalEvent, Author, PendingApprovalKeyBuilder, PendingApprovals, PendingContentPolicy,
    PendingSource,
};
pub use policy::{AuthenticatedViewerPolicy, CachePolicy, PolicyRegistry};
pub use stamp::{ConfigStore, GenerationStamps, MemoryConfigStore, STAMP_OPTION};
pub use store::{CacheStore, MemoryStore, StoreError};

pub(crate) use engine::{
    METRIC_BLOCK_BYPASS, METRIC_BLOCK_HIT, METRIC_BLOCK_MISS, METRIC_PROTOCOL_MISUSE,
    METRIC_STORE_ERROR,
};
pub(crate) use stamp::METRIC_GENERATION_ROTATE;
