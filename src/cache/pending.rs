//! Pending-approval awareness.
//!
//! A viewer who just submitted something that still awaits moderation should
//! see it on the item they submitted it to, while everyone else keeps sharing
//! the cached copy. Two strategies are offered on top of a shared count:
//! [`PendingApprovalKeyBuilder`] gives such viewers their own key, and
//! [`PendingContentPolicy`] bypasses the cache for them entirely.
//!
//! Counts are cached in a [`CacheStore`] without expiry. Moderation events
//! must clear them through [`PendingApprovals::handle`] or
//! [`PendingApprovals::invalidate`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::keys::{KeyBuilder, hash_hex};
use super::policy::CachePolicy;
use super::store::{CacheStore, StoreError};
use crate::context::{AccountId, Contributor, ItemId, RequestContext, Viewer};

/// Who a pending submission is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Author {
    Account(AccountId),
    Contributor(Contributor),
}

impl Author {
    /// Author identity of the current viewer, if any.
    pub fn from_viewer(viewer: &Viewer) -> Option<Self> {
        match viewer {
            Viewer::Authenticated { account_id } => Some(Self::Account(*account_id)),
            Viewer::Contributor(contributor) if !contributor.name.is_empty() => {
                Some(Self::Contributor(contributor.clone()))
            }
            _ => None,
        }
    }

    /// Store key holding this author's pending count on `item`.
    pub fn count_key(&self, item: ItemId) -> String {
        match self {
            Self::Account(id) => format!("pending_comments_{id}_{item}"),
            Self::Contributor(c) => format!("pending_comments_{}_{}_{item}", c.name, c.email),
        }
    }
}

/// Source of truth for pending submissions.
#[async_trait]
pub trait PendingSource: Send + Sync {
    async fn count_pending(&self, author: &Author, item: ItemId) -> Result<u64, StoreError>;
}

/// Moderation events that change an author's pending count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalEvent {
    /// A new submission was stored.
    Inserted { author: Author, item: ItemId },
    /// A submission was approved, rejected or otherwise re-moderated.
    StatusChanged { author: Author, item: ItemId },
}

/// Cached pending counts plus their invalidation entry points.
#[derive(Clone)]
pub struct PendingApprovals {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn PendingSource>,
}

impl PendingApprovals {
    pub fn new(store: Arc<dyn CacheStore>, source: Arc<dyn PendingSource>) -> Self {
        Self { store, source }
    }

    /// Pending count for `author` on `item`, served from the store when cached.
    ///
    /// A failing source counts as zero so rendering never depends on it.
    pub async fn count(&self, author: &Author, item: ItemId) -> u64 {
        let key = author.count_key(item);

        match self.store.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(count) = parse_count(&raw) {
                    return count;
                }
                warn!(key = %key, "Discarding malformed pending count");
            }
            Ok(None) => {}
            Err(err) => warn!(key = %key, error = %err, "Pending count lookup failed"),
        }

        let count = match self.source.count_pending(author, item).await {
            Ok(count) => count,
            Err(err) => {
                warn!(key = %key, error = %err, "Pending source unavailable");
                return 0;
            }
        };

        if let Err(err) = self
            .store
            .set(&key, Bytes::from(count.to_string()), 0)
            .await
        {
            warn!(key = %key, error = %err, "Failed to cache pending count");
        }
        count
    }

    /// Pending count for the current viewer on the displayed item.
    ///
    /// `None` when the render is not a single-item view or the viewer cannot
    /// be identified.
    pub async fn count_for(&self, ctx: &RequestContext) -> Option<(Author, ItemId, u64)> {
        let item = ctx.item()?;
        let author = Author::from_viewer(ctx.viewer())?;
        let count = self.count(&author, item).await;
        Some((author, item, count))
    }

    /// Forget the cached count for `author` on `item`.
    pub async fn invalidate(&self, author: &Author, item: ItemId) {
        let key = author.count_key(item);
        match self.store.delete(&key).await {
            Ok(()) => debug!(key = %key, "Cleared pending count"),
            Err(err) => warn!(key = %key, error = %err, "Failed to clear pending count"),
        }
    }

    /// Entry point for moderation event handlers.
    pub async fn handle(&self, event: ApprovalEvent) {
        match event {
            ApprovalEvent::Inserted { author, item }
            | ApprovalEvent::StatusChanged { author, item } => {
                self.invalidate(&author, item).await;
            }
        }
    }
}

fn parse_count(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

/// Gives viewers with pending submissions on the displayed item their own key.
#[derive(Clone)]
pub struct PendingApprovalKeyBuilder {
    approvals: PendingApprovals,
}

impl PendingApprovalKeyBuilder {
    pub fn new(approvals: PendingApprovals) -> Self {
        Self { approvals }
    }
}

#[async_trait]
impl KeyBuilder for PendingApprovalKeyBuilder {
    async fn key_fragment(&self, ctx: &RequestContext) -> String {
        match self.approvals.count_for(ctx).await {
            Some((author, item, count)) if count > 0 => {
                let tagged = HashMap::from([(author.count_key(item), count)]);
                serde_json::to_string(&tagged)
                    .map(|encoded| hash_hex(&encoded))
                    .unwrap_or_default()
            }
            _ => String::new(),
        }
    }
}

/// Bypasses the cache for viewers with pending submissions on the displayed item.
#[derive(Clone)]
pub struct PendingContentPolicy {
    approvals: PendingApprovals,
}

impl PendingContentPolicy {
    pub fn new(approvals: PendingApprovals) -> Self {
        Self { approvals }
    }
}

#[async_trait]
impl CachePolicy for PendingContentPolicy {
    async fn decide(&self, wants_cache: bool, ctx: &RequestContext) -> bool {
        if !wants_cache {
            return false;
        }
        !matches!(self.approvals.count_for(ctx).await, Some((_, _, count)) if count > 0)
    }
}
