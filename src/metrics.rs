// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for adaptive-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `adaptive_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `store`: local, cloud
//! - `operation`: get, list, transaction
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// STORE I/O
// ═══════════════════════════════════════════════════════════════════════════

/// Record a store call outcome
pub fn record_store_operation(store: &str, operation: &str, status: &str) {
    counter!(
        "adaptive_sync_store_operations_total",
        "store" => store.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record store call latency
pub fn record_store_latency(store: &str, operation: &str, duration: Duration) {
    histogram!(
        "adaptive_sync_store_operation_seconds",
        "store" => store.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a categorized store error for alerting
pub fn record_store_error(store: &str, operation: &str, error_type: &str) {
    counter!(
        "adaptive_sync_store_errors_total",
        "store" => store.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// ROUTING
// ═══════════════════════════════════════════════════════════════════════════

/// Record a fallback from one store to the other
pub fn record_fallback(strategy: &str, from: &str, to: &str) {
    counter!(
        "adaptive_sync_fallbacks_total",
        "strategy" => strategy.to_string(),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a failed best-effort write-through (left for the next migration)
pub fn record_write_through_failure(store: &str) {
    counter!(
        "adaptive_sync_write_through_failures_total",
        "store" => store.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record cache lookup outcome (hit, miss, expired)
pub fn record_cache_lookup(outcome: &'static str) {
    counter!(
        "adaptive_sync_cache_lookups_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Record cache removals not requested by a caller (capacity, ttl)
pub fn record_cache_eviction(reason: &'static str, count: usize) {
    counter!(
        "adaptive_sync_cache_evictions_total",
        "reason" => reason
    )
    .increment(count as u64);
}

/// Set current cache entry count
pub fn set_cache_entries(count: usize) {
    gauge!("adaptive_sync_cache_entries").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// TRANSACTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Record a transaction reaching a terminal state
pub fn record_transaction(outcome: &'static str, operations: usize) {
    counter!(
        "adaptive_sync_transactions_total",
        "outcome" => outcome
    )
    .increment(1);
    histogram!("adaptive_sync_transaction_operations").record(operations as f64);
}

/// Record a compensation attempt
pub fn record_compensation(store: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "adaptive_sync_compensations_total",
        "store" => store.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a store response that arrived after its transaction was rolled back
pub fn record_late_response(store: &str) {
    counter!(
        "adaptive_sync_late_responses_total",
        "store" => store.to_string()
    )
    .increment(1);
}

/// Set journal depth
pub fn set_journal_len(len: usize) {
    gauge!("adaptive_sync_journal_records").set(len as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFLICTS & MIGRATION
// ═══════════════════════════════════════════════════════════════════════════

/// Record a conflict resolution by applied strategy
pub fn record_conflict(strategy: &str) {
    counter!(
        "adaptive_sync_conflicts_total",
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

/// Record one migrated entity
pub fn record_migration_entity(bucket: &'static str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "adaptive_sync_migration_entities_total",
        "bucket" => bucket,
        "status" => status
    )
    .increment(1);
}

/// Record a finished migration run
pub fn record_migration_run(outcome: &'static str, duration: Duration) {
    counter!(
        "adaptive_sync_migration_runs_total",
        "outcome" => outcome
    )
    .increment(1);
    histogram!("adaptive_sync_migration_seconds").record(duration.as_secs_f64());
}

/// Set pending user decisions
pub fn set_pending_decisions(count: usize) {
    gauge!("adaptive_sync_pending_decisions").set(count as f64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER
// ═══════════════════════════════════════════════════════════════════════════

/// Record circuit breaker call outcome
pub fn record_circuit_breaker_call(circuit: &str, outcome: &str) {
    counter!(
        "adaptive_sync_circuit_breaker_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// A timing guard that records store latency on drop
pub struct LatencyTimer {
    store: &'static str,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(store: &'static str, operation: &'static str) -> Self {
        Self {
            store,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_store_latency(self.store, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing store operations
#[macro_export]
macro_rules! time_operation {
    ($store:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($store, $op)
    };
}
