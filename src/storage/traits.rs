use async_trait::async_trait;
use crate::entity::Entity;
use thiserror::Error;

/// Failure reported by a store adapter.
///
/// The distinction matters to routing: [`StoreError::Unavailable`] is
/// transient and triggers fallback to the other store where the active
/// strategy allows it, [`StoreError::Rejected`] is permanent and is always
/// surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Write rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Transient failures are safe to retry or to route around.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short label for metrics and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Which of the two participating stores an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreTarget {
    Local,
    Cloud,
}

impl StoreTarget {
    /// The other participant.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability exposed by a concrete store (on-device database, REST backend, ...).
///
/// Handles are stateless from the engine's perspective; pooling, retries
/// inside a single call and wire formats are the adapter's concern.
#[async_trait]
pub trait StoreHandle: Send + Sync {
    /// Fetch one entity. A missing entity is `Ok(None)`, not an error.
    async fn get(&self, id: &str) -> Result<Option<Entity>, StoreError>;

    /// Fetch every entity held by the store.
    async fn list(&self) -> Result<Vec<Entity>, StoreError>;

    /// Insert or replace an entity.
    async fn put(&self, entity: &Entity) -> Result<(), StoreError>;

    /// Remove an entity. Removing a missing entity is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
