// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Transaction data types.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::Entity;
use crate::storage::{StoreError, StoreTarget};

/// Transaction identifier, also used to tag in-flight store calls.
pub type TxnId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Put,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }
}

/// A single store mutation inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Put { target: StoreTarget, entity: Entity },
    Delete { target: StoreTarget, id: String },
}

impl Operation {
    pub fn put(target: StoreTarget, entity: Entity) -> Self {
        Self::Put { target, entity }
    }

    pub fn delete(target: StoreTarget, id: impl Into<String>) -> Self {
        Self::Delete { target, id: id.into() }
    }

    #[must_use]
    pub fn target(&self) -> StoreTarget {
        match self {
            Self::Put { target, .. } | Self::Delete { target, .. } => *target,
        }
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Put { entity, .. } => &entity.id,
            Self::Delete { id, .. } => id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Put { .. } => OperationKind::Put,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// Whether a journal record describes the forward mutation or its undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPhase {
    Apply,
    Compensation,
}

/// Immutable journal entry for one attempted store mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRecord {
    pub txn_id: TxnId,
    pub kind: OperationKind,
    pub target: StoreTarget,
    pub entity_id: String,
    /// Value held by the store before the mutation
    pub payload_snapshot: Option<Entity>,
    /// Epoch millis
    pub timestamp: i64,
    pub succeeded: bool,
    pub phase: RecordPhase,
}

/// Transaction lifecycle.
///
/// ```text
/// Pending → Applying → Committed
///                    ↘ RollingBack → RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Applying,
    Committed,
    RollingBack,
    RolledBack,
}

impl TransactionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Applying => write!(f, "Applying"),
            Self::Committed => write!(f, "Committed"),
            Self::RollingBack => write!(f, "RollingBack"),
            Self::RolledBack => write!(f, "RolledBack"),
        }
    }
}

/// Summary of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionReport {
    pub id: TxnId,
    pub state: TransactionState,
    /// Number of operations applied
    pub applied: usize,
}

#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    /// A store call failed; everything applied before it was rolled back.
    #[error("Transaction {txn} aborted at operation {index} on {target}: {source}")]
    Aborted {
        txn: TxnId,
        index: usize,
        target: StoreTarget,
        #[source]
        source: StoreError,
    },

    /// The deadline passed; everything applied so far, including the
    /// operation in flight, was rolled back.
    #[error("Transaction {txn} timed out after {elapsed:?} at operation {index} on {target}")]
    Timeout {
        txn: TxnId,
        index: usize,
        target: StoreTarget,
        elapsed: Duration,
    },

    /// Compensation itself failed; stores may be inconsistent.
    #[error("Transaction {txn} rollback failed ({compensation}) after: {cause}")]
    RollbackFailure {
        txn: TxnId,
        #[source]
        cause: Box<TransactionError>,
        compensation: StoreError,
    },
}

impl TransactionError {
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        match self {
            Self::Aborted { txn, .. } | Self::Timeout { txn, .. } | Self::RollbackFailure { txn, .. } => *txn,
        }
    }

    /// Store error that caused the abort, if any.
    #[must_use]
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Aborted { source, .. } => Some(source),
            Self::Timeout { .. } => None,
            Self::RollbackFailure { cause, .. } => cause.store_error(),
        }
    }

    /// Store that produced the failure.
    #[must_use]
    pub fn target(&self) -> StoreTarget {
        match self {
            Self::Aborted { target, .. } | Self::Timeout { target, .. } => *target,
            Self::RollbackFailure { cause, .. } => cause.target(),
        }
    }

    /// True when the failure was transient and routing may try the other store.
    ///
    /// Timeouts count as transient. A failed rollback never does.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Aborted { source, .. } => source.is_retryable(),
            Self::Timeout { .. } => true,
            Self::RollbackFailure { .. } => false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Aborted { .. } => "aborted",
            Self::Timeout { .. } => "timeout",
            Self::RollbackFailure { .. } => "rollback_failure",
        }
    }
}

/// Counters over the manager's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionStats {
    pub committed: u64,
    pub rolled_back: u64,
    pub timeouts: u64,
    pub rollback_failures: u64,
    pub late_responses: u64,
}
