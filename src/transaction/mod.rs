// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! All-or-nothing execution of store mutations.
//!
//! A transaction is an ordered list of [`Operation`]s. Before each mutation
//! the prior value is read from the target store; if a later operation fails
//! or the deadline passes, every applied operation is undone in reverse
//! order:
//!
//! | Operation | Prior      | Compensation   |
//! |-----------|------------|----------------|
//! | put       | `Some(p)`  | put `p`        |
//! | put       | `None`     | delete         |
//! | delete    | `Some(p)`  | put `p`        |
//! | delete    | `None`     | nothing        |
//!
//! Each mutation runs as a spawned task raced against the deadline. When the
//! deadline wins, the in-flight operation is compensated together with the
//! rest, and a watcher keeps listening for its response: a late success is
//! dropped and compensated again so the write never survives. If another
//! commit has replaced the late value by then, the store is left alone.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use adaptive_sync::{Entity, InMemoryStore, Operation, StoreTarget, TransactionManager};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let local = Arc::new(InMemoryStore::new("local"));
//! let cloud = Arc::new(InMemoryStore::new("cloud"));
//! let manager = TransactionManager::new(local.clone(), cloud, 64, Duration::from_secs(5));
//!
//! let report = manager
//!     .execute(vec![
//!         Operation::put(StoreTarget::Local, Entity::new("a", json!({}))),
//!         Operation::put(StoreTarget::Local, Entity::new("b", json!({}))),
//!     ])
//!     .await
//!     .unwrap();
//!
//! assert_eq!(report.applied, 2);
//! assert_eq!(local.len(), 2);
//! # }
//! ```

pub mod journal;
pub mod types;

pub use journal::Journal;
pub use types::{
    Operation, OperationKind, OperationRecord, RecordPhase, TransactionError, TransactionReport,
    TransactionState, TransactionStats, TxnId,
};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entity::{now_millis, Entity};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::{StoreError, StoreHandle, StoreTarget};

/// An operation that reached its store, with the value it replaced.
#[derive(Debug, Clone)]
struct Applied {
    operation: Operation,
    prior: Option<Entity>,
    compensated: bool,
}

#[derive(Debug, Default)]
struct Counters {
    committed: AtomicU64,
    rolled_back: AtomicU64,
    timeouts: AtomicU64,
    rollback_failures: AtomicU64,
    late_responses: AtomicU64,
}

/// Shared pieces a late-response watcher needs after `execute` returned.
#[derive(Clone)]
struct Shared {
    local: Arc<dyn StoreHandle>,
    cloud: Arc<dyn StoreHandle>,
    journal: Arc<Journal>,
    counters: Arc<Counters>,
    compensation_retry: RetryConfig,
}

impl Shared {
    fn store(&self, target: StoreTarget) -> &Arc<dyn StoreHandle> {
        match target {
            StoreTarget::Local => &self.local,
            StoreTarget::Cloud => &self.cloud,
        }
    }

    fn journal_record(&self, txn: TxnId, operation: &Operation, prior: &Option<Entity>, succeeded: bool, phase: RecordPhase) {
        self.journal.append(OperationRecord {
            txn_id: txn,
            kind: operation.kind(),
            target: operation.target(),
            entity_id: operation.entity_id().to_string(),
            payload_snapshot: prior.clone(),
            timestamp: now_millis(),
            succeeded,
            phase,
        });
    }

    /// Undo one applied operation. No-op when already compensated.
    async fn compensate(&self, txn: TxnId, applied: &mut Applied) -> Result<(), StoreError> {
        if applied.compensated {
            return Ok(());
        }

        let target = applied.operation.target();
        let id = applied.operation.entity_id().to_string();
        let result = self.undo(target, &id, &applied.operation, &applied.prior).await;

        let success = result.is_ok();
        self.journal_record(txn, &applied.operation, &applied.prior, success, RecordPhase::Compensation);
        crate::metrics::record_compensation(target.as_str(), success);

        match result {
            Ok(()) => {
                applied.compensated = true;
                debug!(txn = %txn, id = %id, target = %target, "Compensated");
                Ok(())
            }
            Err(e) => {
                error!(txn = %txn, id = %id, target = %target, error = %e, "Compensation failed");
                Err(e)
            }
        }
    }

    /// Whether the store still shows the effect of `operation`. A later
    /// commit to the same id means there is nothing left to undo.
    async fn still_holds(&self, operation: &Operation) -> bool {
        let current = match self.store(operation.target()).get(operation.entity_id()).await {
            Ok(current) => current,
            Err(StoreError::NotFound(_)) => None,
            Err(_) => return true,
        };
        match (operation, current) {
            (Operation::Put { entity, .. }, Some(current)) => current.same_version(entity),
            (Operation::Put { .. }, None) => false,
            (Operation::Delete { .. }, current) => current.is_none(),
        }
    }

    async fn undo(&self, target: StoreTarget, id: &str, operation: &Operation, prior: &Option<Entity>) -> Result<(), StoreError> {
        let store = self.store(target);
        let label = format!("compensate_{}_{}", operation.kind().as_str(), target);

        match (operation.kind(), prior) {
            (_, Some(prior)) => {
                retry(&label, &self.compensation_retry, StoreError::is_retryable, || store.put(prior)).await
            }
            (OperationKind::Put, None) => {
                retry(&label, &self.compensation_retry, StoreError::is_retryable, || async move {
                    match store.delete(id).await {
                        Err(StoreError::NotFound(_)) => Ok(()),
                        other => other,
                    }
                })
                .await
            }
            (OperationKind::Delete, None) => Ok(()),
        }
    }
}

/// Executes operation lists against the local and cloud stores as units.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Shared,
    default_timeout: Duration,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("default_timeout", &self.default_timeout)
            .field("journal_len", &self.shared.journal.len())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn new(
        local: Arc<dyn StoreHandle>,
        cloud: Arc<dyn StoreHandle>,
        journal_capacity: usize,
        default_timeout: Duration,
    ) -> Self {
        Self {
            shared: Shared {
                local,
                cloud,
                journal: Arc::new(Journal::new(journal_capacity)),
                counters: Arc::new(Counters::default()),
                compensation_retry: RetryConfig::query(),
            },
            default_timeout,
        }
    }

    /// Override the backoff used when a compensation hits an unavailable store.
    #[must_use]
    pub fn with_compensation_retry(mut self, config: RetryConfig) -> Self {
        self.shared.compensation_retry = config;
        self
    }

    pub fn store(&self, target: StoreTarget) -> &Arc<dyn StoreHandle> {
        self.shared.store(target)
    }

    pub fn journal(&self) -> &Journal {
        &self.shared.journal
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn stats(&self) -> TransactionStats {
        let c = &self.shared.counters;
        TransactionStats {
            committed: c.committed.load(Ordering::Relaxed),
            rolled_back: c.rolled_back.load(Ordering::Relaxed),
            timeouts: c.timeouts.load(Ordering::Relaxed),
            rollback_failures: c.rollback_failures.load(Ordering::Relaxed),
            late_responses: c.late_responses.load(Ordering::Relaxed),
        }
    }

    /// Execute with the default timeout.
    pub async fn execute(&self, operations: Vec<Operation>) -> Result<TransactionReport, TransactionError> {
        self.execute_with_timeout(operations, self.default_timeout).await
    }

    /// Execute all operations or none of them.
    pub async fn execute_with_timeout(
        &self,
        operations: Vec<Operation>,
        timeout: Duration,
    ) -> Result<TransactionReport, TransactionError> {
        let txn: TxnId = Uuid::new_v4();
        let started = Instant::now();
        let deadline = started + timeout;
        let total = operations.len();

        debug!(txn = %txn, operations = total, state = %TransactionState::Applying, "Transaction started");

        let mut applied: Vec<Applied> = Vec::with_capacity(total);

        for (index, operation) in operations.into_iter().enumerate() {
            let target = operation.target();
            let store = self.shared.store(target).clone();

            let prior = match timeout_at(deadline, store.get(operation.entity_id())).await {
                Ok(Ok(prior)) => prior,
                Ok(Err(StoreError::NotFound(_))) => None,
                Ok(Err(source)) => {
                    self.shared.journal_record(txn, &operation, &None, false, RecordPhase::Apply);
                    let cause = TransactionError::Aborted { txn, index, target, source };
                    return Err(self.roll_back(txn, applied, cause).await);
                }
                Err(_) => {
                    let cause = TransactionError::Timeout { txn, index, target, elapsed: started.elapsed() };
                    return Err(self.roll_back(txn, applied, cause).await);
                }
            };

            let mut handle = spawn_mutation(store, operation.clone());
            let outcome = timeout_at(deadline, &mut handle).await;

            match outcome {
                Ok(Ok(Ok(()))) => {
                    self.shared.journal_record(txn, &operation, &prior, true, RecordPhase::Apply);
                    applied.push(Applied { operation, prior, compensated: false });
                }
                Ok(Ok(Err(source))) => {
                    self.shared.journal_record(txn, &operation, &prior, false, RecordPhase::Apply);
                    let cause = TransactionError::Aborted { txn, index, target, source };
                    return Err(self.roll_back(txn, applied, cause).await);
                }
                Ok(Err(join_error)) => {
                    self.shared.journal_record(txn, &operation, &prior, false, RecordPhase::Apply);
                    let source = StoreError::Unavailable(format!("store task failed: {}", join_error));
                    let cause = TransactionError::Aborted { txn, index, target, source };
                    return Err(self.roll_back(txn, applied, cause).await);
                }
                Err(_) => {
                    let in_flight = Applied { operation, prior, compensated: false };
                    self.watch_late_response(txn, in_flight.clone(), handle);
                    applied.push(in_flight);

                    let cause = TransactionError::Timeout { txn, index, target, elapsed: started.elapsed() };
                    return Err(self.roll_back(txn, applied, cause).await);
                }
            }
        }

        let state = TransactionState::Committed;
        self.shared.counters.committed.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_transaction("committed", total);
        info!(txn = %txn, operations = total, state = %state, "Transaction committed");

        Ok(TransactionReport {
            id: txn,
            state,
            applied: applied.len(),
        })
    }

    /// Undo `applied` in reverse and return the error the caller should see.
    async fn roll_back(&self, txn: TxnId, mut applied: Vec<Applied>, cause: TransactionError) -> TransactionError {
        let state = TransactionState::RollingBack;
        warn!(txn = %txn, error = %cause, applied = applied.len(), state = %state, "Rolling back transaction");

        let mut compensation_error = None;
        for entry in applied.iter_mut().rev() {
            if let Err(e) = self.shared.compensate(txn, entry).await {
                compensation_error.get_or_insert(e);
            }
        }

        let counters = &self.shared.counters;
        if matches!(cause, TransactionError::Timeout { .. }) {
            counters.timeouts.fetch_add(1, Ordering::Relaxed);
        }

        match compensation_error {
            None => {
                counters.rolled_back.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_transaction("rolled_back", applied.len());
                info!(txn = %txn, state = %TransactionState::RolledBack, "Transaction rolled back");
                cause
            }
            Some(compensation) => {
                counters.rollback_failures.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_transaction("rollback_failed", applied.len());
                error!(txn = %txn, error = %compensation, "Rollback incomplete, stores may diverge");
                TransactionError::RollbackFailure {
                    txn,
                    cause: Box::new(cause),
                    compensation,
                }
            }
        }
    }

    /// Keep listening for a timed-out call and undo it if it lands anyway.
    fn watch_late_response(&self, txn: TxnId, mut in_flight: Applied, handle: JoinHandle<Result<(), StoreError>>) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let target = in_flight.operation.target();
            let id = in_flight.operation.entity_id().to_string();

            match handle.await {
                Ok(Ok(())) => {
                    shared.counters.late_responses.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_late_response(target.as_str());

                    if !shared.still_holds(&in_flight.operation).await {
                        debug!(txn = %txn, id = %id, target = %target, "Late write already superseded, leaving store as is");
                        return;
                    }
                    warn!(txn = %txn, id = %id, target = %target, "Late write landed after rollback, compensating again");
                    if shared.compensate(txn, &mut in_flight).await.is_err() {
                        shared.counters.rollback_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(Err(e)) => {
                    shared.counters.late_responses.fetch_add(1, Ordering::Relaxed);
                    crate::metrics::record_late_response(target.as_str());
                    debug!(txn = %txn, id = %id, error = %e, "Dropped late failure response");
                }
                Err(e) => {
                    warn!(txn = %txn, id = %id, error = %e, "In-flight store task did not complete");
                }
            }
        });
    }
}

fn spawn_mutation(store: Arc<dyn StoreHandle>, operation: Operation) -> JoinHandle<Result<(), StoreError>> {
    tokio::spawn(async move {
        match &operation {
            Operation::Put { entity, .. } => store.put(entity).await,
            Operation::Delete { id, .. } => match store.delete(id).await {
                Err(StoreError::NotFound(_)) => Ok(()),
                other => other,
            },
        }
    })
}
