//! Request context handed to key builders and cache policies.
//!
//! The host application fills this in once per render. The cache layer only
//! reads it as key material and never interprets it beyond that.

use serde::{Deserialize, Serialize};

/// Identifier of a content item (post, page, product, ...).
pub type ItemId = u64;

/// Identifier of an authenticated account.
pub type AccountId = u64;

/// Name and contact address left behind by an anonymous contributor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contributor {
    pub name: String,
    pub email: String,
}

/// Who is looking at the rendered output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Viewer {
    #[default]
    Anonymous,
    /// Not signed in, but remembered from an earlier submission.
    Contributor(Contributor),
    Authenticated { account_id: AccountId },
}

impl Viewer {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn account_id(&self) -> Option<AccountId> {
        match self {
            Self::Authenticated { account_id } => Some(*account_id),
            _ => None,
        }
    }
}

/// Snapshot of the request a render is running for.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    query: Vec<(String, String)>,
    viewer: Viewer,
    item: Option<ItemId>,
}

impl RequestContext {
    pub fn new(viewer: Viewer) -> Self {
        Self {
            viewer,
            ..Default::default()
        }
    }

    /// Add a query variable. Later values for the same name replace earlier ones.
    pub fn with_query_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.query.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.query.push((name, value)),
        }
        self
    }

    /// Mark the render as a single-item view of `item`.
    pub fn with_item(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    /// Returns the value of a query variable, treating empty values as absent.
    pub fn query_var(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.is_empty())
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    /// The content item when the render is a single-item view.
    pub fn item(&self) -> Option<ItemId> {
        self.item
    }
}
