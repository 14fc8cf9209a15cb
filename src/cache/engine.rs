//! Block engine.
//!
//! [`BlockCache`] is the shared, cloneable service: store, generation stamps,
//! policies and config. Each render takes its own [`BlockEngine`] from it,
//! which owns the frame stack and the output buffer for that render only.
//!
//! ```ignore
//! let mut page = cache.engine(ctx);
//! if page.begin("sidebar", BlockOptions::new().ttl_seconds(60)).await {
//!     page.emit("<div>A</div>");
//! }
//! page.end().await;
//! let html = page.into_output();
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use tracing::{debug, warn};

use super::capture::{CaptureHandle, OutputBuffer};
use super::config::BlockCacheConfig;
use super::keys::{KeyBuilder, effective_key, key_material};
use super::policy::PolicyRegistry;
use super::stamp::GenerationStamps;
use super::store::{CacheStore, StoreError};
use crate::context::RequestContext;

pub(crate) const METRIC_BLOCK_HIT: &str = "blockcache_block_hit_total";
pub(crate) const METRIC_BLOCK_MISS: &str = "blockcache_block_miss_total";
pub(crate) const METRIC_BLOCK_BYPASS: &str = "blockcache_block_bypass_total";
pub(crate) const METRIC_STORE_ERROR: &str = "blockcache_store_error_total";
pub(crate) const METRIC_PROTOCOL_MISUSE: &str = "blockcache_protocol_misuse_total";

/// Per-block options.
#[derive(Clone, Default)]
pub struct BlockOptions {
    unique_key: String,
    key_builders: Vec<Arc<dyn KeyBuilder>>,
    ttl_seconds: Option<u64>,
}

impl BlockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit key suffix. Takes precedence over key builders.
    pub fn unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = key.into();
        self
    }

    /// Append a key builder. Builder order is part of the key.
    pub fn key_builder(mut self, builder: Arc<dyn KeyBuilder>) -> Self {
        self.key_builders.push(builder);
        self
    }

    /// Expiry of a freshly captured block. `0` never expires.
    pub fn ttl_seconds(mut self, ttl: u64) -> Self {
        self.ttl_seconds = Some(ttl);
        self
    }
}

impl fmt::Debug for BlockOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockOptions")
            .field("unique_key", &self.unique_key)
            .field("key_builders", &self.key_builders.len())
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

/// One in-flight block.
#[derive(Debug)]
pub struct BlockFrame {
    pub name: String,
    pub effective_key: String,
    /// Stored content found at begin time.
    pub cached_output: Option<Bytes>,
    /// Whether policies let this block read and write the store.
    pub use_cache: bool,
    pub ttl_seconds: u64,
    capture: Option<CaptureHandle>,
}

/// Shared block cache service.
#[derive(Clone)]
pub struct BlockCache {
    config: BlockCacheConfig,
    store: Arc<dyn CacheStore>,
    stamps: Arc<GenerationStamps>,
    policies: Arc<PolicyRegistry>,
}

impl BlockCache {
    pub fn new(
        config: BlockCacheConfig,
        store: Arc<dyn CacheStore>,
        stamps: Arc<GenerationStamps>,
        policies: PolicyRegistry,
    ) -> Self {
        Self {
            config,
            store,
            stamps,
            policies: Arc::new(policies),
        }
    }

    /// Start a render for `ctx`.
    pub fn engine(&self, ctx: RequestContext) -> BlockEngine {
        BlockEngine {
            cache: self.clone(),
            ctx,
            frames: Vec::new(),
            output: OutputBuffer::new(),
        }
    }

    /// Logically drop every cached block by rotating the generation stamp.
    pub async fn clear_cache(&self) -> Result<Arc<str>, StoreError> {
        self.stamps.rotate().await
    }

    pub fn config(&self) -> &BlockCacheConfig {
        &self.config
    }

    pub fn stamps(&self) -> &Arc<GenerationStamps> {
        &self.stamps
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}

/// Block stack and output of a single render.
///
/// Not shared between renders. Dropping an engine with open blocks discards
/// them along with their captured output.
pub struct BlockEngine {
    cache: BlockCache,
    ctx: RequestContext,
    frames: Vec<BlockFrame>,
    output: OutputBuffer,
}

impl BlockEngine {
    /// Open a block.
    ///
    /// Returns `true` when the caller must render the block's content, and
    /// `false` when cached content will be replayed by the matching
    /// [`end`](Self::end) and the caller must skip rendering.
    pub async fn begin(&mut self, name: &str, options: BlockOptions) -> bool {
        let BlockOptions {
            unique_key,
            key_builders,
            ttl_seconds,
        } = options;
        let ttl_seconds = ttl_seconds.unwrap_or(self.cache.config.default_ttl_seconds);

        let material = key_material(name, &unique_key, &key_builders, &self.ctx).await;
        let stamp = self.cache.stamps.current();
        let key = effective_key(&stamp, &material);

        let use_cache =
            self.cache.config.enabled && self.cache.policies.allows(name, &self.ctx).await;

        let cached_output = if use_cache {
            self.lookup(name, &key).await
        } else {
            counter!(METRIC_BLOCK_BYPASS).increment(1);
            debug!(block = name, key = %key, outcome = "bypass", "cache block bypassed");
            None
        };

        let hit = cached_output.is_some();
        let capture = (!hit).then(|| self.output.begin_capture());

        self.frames.push(BlockFrame {
            name: name.to_string(),
            effective_key: key,
            cached_output,
            use_cache,
            ttl_seconds,
            capture,
        });

        !hit
    }

    /// Close the innermost open block.
    ///
    /// Returns `false`, and does nothing else, when no block is open.
    pub async fn end(&mut self) -> bool {
        let Some(frame) = self.frames.pop() else {
            counter!(METRIC_PROTOCOL_MISUSE).increment(1);
            warn!("cache block end called without a matching begin");
            return false;
        };

        let BlockFrame {
            name,
            effective_key,
            cached_output,
            use_cache,
            ttl_seconds,
            capture,
        } = frame;

        if let Some(cached) = cached_output {
            self.replay(&effective_key, &cached);
            return true;
        }

        let captured = capture
            .map(|handle| self.output.end_capture(handle))
            .unwrap_or_default();
        self.output.write(&captured);

        if use_cache {
            if let Err(err) = self
                .cache
                .store
                .set(&effective_key, captured, ttl_seconds)
                .await
            {
                counter!(METRIC_STORE_ERROR, "op" => "set").increment(1);
                warn!(
                    block = %name,
                    key = %effective_key,
                    error = %err,
                    "failed to store cache block"
                );
            } else {
                debug!(block = %name, key = %effective_key, ttl_seconds, "stored cache block");
            }
        }
        true
    }

    /// Rotate the generation stamp. Open blocks keep the key they began with.
    pub async fn clear_cache(&self) -> Result<Arc<str>, StoreError> {
        self.cache.clear_cache().await
    }

    /// Write rendered content into the innermost open capture.
    pub fn emit(&mut self, content: impl AsRef<[u8]>) {
        self.output.write(content.as_ref());
    }

    /// Number of open blocks.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost open block.
    pub fn current_frame(&self) -> Option<&BlockFrame> {
        self.frames.last()
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Output that has left every block so far.
    pub fn output(&self) -> &[u8] {
        self.output.root()
    }

    /// Finish the render. Content of blocks left open is kept in order.
    pub fn into_output(self) -> Bytes {
        if !self.frames.is_empty() {
            warn!(
                open_blocks = self.frames.len(),
                "render finished with open cache blocks"
            );
        }
        self.output.into_bytes()
    }

    async fn lookup(&self, name: &str, key: &str) -> Option<Bytes> {
        match self.cache.store.get(key).await {
            Ok(Some(content)) => {
                counter!(METRIC_BLOCK_HIT).increment(1);
                debug!(block = name, key, outcome = "hit", "cache block hit");
                Some(content)
            }
            Ok(None) => {
                counter!(METRIC_BLOCK_MISS).increment(1);
                debug!(block = name, key, outcome = "miss", "cache block miss");
                None
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR, "op" => "get").increment(1);
                counter!(METRIC_BLOCK_MISS).increment(1);
                warn!(block = name, key, error = %err, "cache block lookup failed");
                None
            }
        }
    }

    fn replay(&mut self, key: &str, cached: &[u8]) {
        if self.cache.config.debug_markers {
            self.output
                .write(format!("<!-- blockcache from key {key} -->\n").as_bytes());
            self.output.write(cached);
            self.output
                .write(format!("<!-- end blockcache from key {key} -->\n").as_bytes());
        } else {
            self.output.write(cached);
        }
    }
}

impl fmt::Write for BlockEngine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.emit(s);
        Ok(())
    }
}
