//! Cache key derivation.
//!
//! A block's effective key is the current generation stamp followed by a
//! truncated digest of its key material. Key material is either an explicit
//! suffix, the concatenated fragments of its key builders, or the block name.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::context::RequestContext;

/// Hex characters of the material digest kept in an effective key.
pub const KEY_DIGEST_LEN: usize = 30;

/// Produces one fragment of key material from the request context.
///
/// A builder that cannot resolve its context returns an empty string, which
/// leaves cache identity unchanged. Fragments are concatenated in the order the
/// caller lists the builders, so that order is part of the key.
#[async_trait]
pub trait KeyBuilder: Send + Sync {
    async fn key_fragment(&self, ctx: &RequestContext) -> String;
}

/// Hex-encoded sha256 of `input`.
pub fn hash_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest.as_slice())
}

/// Effective key for `material` under `stamp`.
pub fn effective_key(stamp: &str, material: &str) -> String {
    let mut digest = hash_hex(material);
    digest.truncate(KEY_DIGEST_LEN);
    format!("{stamp}{digest}")
}

/// Resolve the pre-stamp key material for a block.
///
/// First match wins: explicit suffix, then builders, then the bare name.
/// Builders that all come back empty fall through to the bare name, so an
/// empty fragment never distinguishes a key.
pub async fn key_material(
    name: &str,
    unique_key: &str,
    builders: &[Arc<dyn KeyBuilder>],
    ctx: &RequestContext,
) -> String {
    if !unique_key.is_empty() {
        return format!("{name}_{unique_key}");
    }

    let mut material = String::new();
    for builder in builders {
        material.push_str(&builder.key_fragment(ctx).await);
    }

    if material.is_empty() {
        name.to_string()
    } else {
        material
    }
}

/// Varies the key by selected query variables.
///
/// Only present, non-empty variables count. The fragment hashes the ordered
/// `[name, value]` pairs so `?page=2` and `?tag=2` never collide.
#[derive(Debug, Clone)]
pub struct QueryContextKeyBuilder {
    vars: Vec<String>,
}

impl QueryContextKeyBuilder {
    pub fn new<I, S>(vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl KeyBuilder for QueryContextKeyBuilder {
    async fn key_fragment(&self, ctx: &RequestContext) -> String {
        let present: Vec<(&str, &str)> = self
            .vars
            .iter()
            .filter_map(|name| ctx.query_var(name).map(|value| (name.as_str(), value)))
            .collect();

        if present.is_empty() {
            return String::new();
        }

        match serde_json::to_string(&present) {
            Ok(encoded) => hash_hex(&encoded),
            Err(_) => String::new(),
        }
    }
}

/// Gives each signed-in viewer a separate copy; anonymous viewers share one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewerIdentityKeyBuilder;

#[async_trait]
impl KeyBuilder for ViewerIdentityKeyBuilder {
    async fn key_fragment(&self, ctx: &RequestContext) -> String {
        ctx.viewer()
            .account_id()
            .map(|id| format!("viewer_{id}"))
            .unwrap_or_default()
    }
}
