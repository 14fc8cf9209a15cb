//! Administrative cache actions.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{GenerationStamps, StoreError};

/// Permissions an administrative actor may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageCache,
}

/// Whoever requests an administrative action.
#[derive(Debug, Clone)]
pub struct Actor {
    pub name: String,
    pub capabilities: Vec<Capability>,
}

impl Actor {
    pub fn new(
        name: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("`{actor}` lacks the {capability:?} capability")]
    Forbidden {
        actor: String,
        capability: Capability,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Cache flush entry point for admin surfaces (CLI, HTTP, ...).
#[derive(Clone)]
pub struct CacheAdmin {
    stamps: Arc<GenerationStamps>,
}

impl CacheAdmin {
    pub fn new(stamps: Arc<GenerationStamps>) -> Self {
        Self { stamps }
    }

    /// Invalidate every cached block. Returns the new generation stamp.
    pub async fn clear_cache(&self, actor: &Actor) -> Result<Arc<str>, AdminError> {
        if !actor.can(Capability::ManageCache) {
            warn!(actor = %actor.name, "Rejected cache flush");
            return Err(AdminError::Forbidden {
                actor: actor.name.clone(),
                capability: Capability::ManageCache,
            });
        }

        let stamp = self.stamps.rotate().await?;
        info!(actor = %actor.name, stamp = %stamp, "Cache flushed");
        Ok(stamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryConfigStore;

    async fn admin() -> (CacheAdmin, Arc<GenerationStamps>) {
        let stamps = Arc::new(
            GenerationStamps::load(Arc::new(MemoryConfigStore::new()))
                .await
                .expect("stamps"),
        );
        (CacheAdmin::new(stamps.clone()), stamps)
    }

    #[tokio::test]
    async fn authorized_actor_rotates_stamp() {
        let (admin, stamps) = admin().await;
        let before = stamps.current();

        let after = admin
            .clear_cache(&Actor::new("ops", [Capability::ManageCache]))
            .await
            .expect("flush");

        assert_ne!(before, after);
        assert_eq!(stamps.current(), after);
    }

    #[tokio::test]
    async fn unauthorized_actor_is_rejected() {
        let (admin, stamps) = admin().await;
        let before = stamps.current();

        let err = admin
            .clear_cache(&Actor::new("guest", Vec::<Capability>::new()))
            .await
            .expect_err("must be forbidden");

        assert!(matches!(err, AdminError::Forbidden { .. }));
        assert_eq!(stamps.current(), before);
    }
}
