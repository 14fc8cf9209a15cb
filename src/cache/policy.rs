//! Conditional caching policies.
//!
//! Collaborators register predicates per block name at startup. Before a
//! block touches the store, its predicates run in registration order and
//! any of them can switch caching off for that render.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;

/// Decides whether a block may use the cache for the current request.
///
/// Receives the running decision and returns the new one.
#[async_trait]
pub trait CachePolicy: Send + Sync {
    async fn decide(&self, wants_cache: bool, ctx: &RequestContext) -> bool;
}

#[async_trait]
impl<F> CachePolicy for F
where
    F: Fn(bool, &RequestContext) -> bool + Send + Sync,
{
    async fn decide(&self, wants_cache: bool, ctx: &RequestContext) -> bool {
        self(wants_cache, ctx)
    }
}

/// Predicates keyed by block name.
#[derive(Default, Clone)]
pub struct PolicyRegistry {
    policies: HashMap<String, Vec<Arc<dyn CachePolicy>>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `policy` to the predicates consulted for `block`.
    pub fn register(
        &mut self,
        block: impl Into<String>,
        policy: Arc<dyn CachePolicy>,
    ) -> &mut Self {
        self.policies.entry(block.into()).or_default().push(policy);
        self
    }

    /// Run every predicate registered for `block`, starting from `true`.
    ///
    /// A predicate can turn caching off but never back on.
    pub async fn allows(&self, block: &str, ctx: &RequestContext) -> bool {
        let Some(policies) = self.policies.get(block) else {
            return true;
        };

        let mut wants_cache = true;
        for policy in policies {
            wants_cache = policy.decide(wants_cache, ctx).await && wants_cache;
        }
        wants_cache
    }

    /// Number of predicates registered for `block`.
    pub fn len_for(&self, block: &str) -> usize {
        self.policies.get(block).map_or(0, Vec::len)
    }
}

/// Caches a block for anonymous viewers only.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedViewerPolicy;

#[async_trait]
impl CachePolicy for AuthenticatedViewerPolicy {
    async fn decide(&self, wants_cache: bool, ctx: &RequestContext) -> bool {
        wants_cache && !ctx.viewer().is_authenticated()
    }
}
