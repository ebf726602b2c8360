// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use super::strategy::Strategy;
use crate::conflict::ConflictError;
use crate::storage::{StoreError, StoreTarget};
use crate::transaction::TransactionError;

/// What went wrong underneath a router call.
#[derive(Error, Debug, Clone)]
pub enum PersistFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

impl PersistFailure {
    /// Underlying store error, if the failure came from a store.
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            Self::Transaction(e) => e.store_error(),
            Self::Conflict(_) => None,
        }
    }

    /// True when the other store may be tried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Transaction(e) => e.is_transient(),
            Self::Conflict(_) => false,
        }
    }
}

/// Failure of a router call, tagged with the strategy and store that
/// produced it.
///
/// When a fallback was attempted and also failed, `fallback` carries that
/// second failure while `target`/`failure` describe the primary store.
#[derive(Error, Debug, Clone)]
#[error("{strategy} call failed on {target}: {failure}{}", fallback_suffix(.fallback))]
pub struct PersistError {
    pub strategy: Strategy,
    pub target: StoreTarget,
    #[source]
    pub failure: PersistFailure,
    pub fallback: Option<Box<PersistError>>,
}

fn fallback_suffix(fallback: &Option<Box<PersistError>>) -> String {
    match fallback {
        Some(fb) => format!(" (fallback to {} also failed: {})", fb.target, fb.failure),
        None => String::new(),
    }
}

impl PersistError {
    pub fn new(strategy: Strategy, target: StoreTarget, failure: impl Into<PersistFailure>) -> Self {
        Self {
            strategy,
            target,
            failure: failure.into(),
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: PersistError) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    /// Store error of the primary failure.
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        self.failure.store_error()
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        matches!(self.store_error(), Some(StoreError::Rejected(_)))
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.failure, PersistFailure::Transaction(TransactionError::Timeout { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_fallback() {
        let err = PersistError::new(
            Strategy::LocalFirst,
            StoreTarget::Local,
            StoreError::Unavailable("disk".into()),
        )
        .with_fallback(PersistError::new(
            Strategy::LocalFirst,
            StoreTarget::Cloud,
            StoreError::Unavailable("network".into()),
        ));

        let message = err.to_string();
        assert!(message.starts_with("local_first call failed on local"));
        assert!(message.contains("fallback to cloud also failed"));
        assert!(err.failure.is_transient());
    }

    #[test]
    fn test_rejected_is_not_transient() {
        let err = PersistError::new(Strategy::CloudOnly, StoreTarget::Cloud, StoreError::Rejected("schema".into()));
        assert!(err.is_rejected());
        assert!(!err.failure.is_transient());
        assert!(err.fallback.is_none());
    }
}
