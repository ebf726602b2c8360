// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Runs a migration whenever connectivity comes back.
//!
//! Planning reads both stores, so a cloud that is reachable but still
//! warming up fails it. Transient planning failures are retried with
//! [`RetryConfig::daemon`] for as long as the connection stays up; shutdown
//! interrupts the wait.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::MigrationEngine;
use crate::connectivity::ConnectivitySignal;
use crate::resilience::retry::{retry, RetryConfig};
use crate::router::PersistError;

/// Polls the connectivity signal and migrates on every offline → online edge.
pub struct ReconnectTrigger {
    migration: Arc<MigrationEngine>,
    connectivity: Arc<dyn ConnectivitySignal>,
    poll_interval: Duration,
    plan_retry: RetryConfig,
}

impl ReconnectTrigger {
    pub fn new(
        migration: Arc<MigrationEngine>,
        connectivity: Arc<dyn ConnectivitySignal>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            migration,
            connectivity,
            poll_interval,
            plan_retry: RetryConfig::daemon(),
        }
    }

    /// Override the backoff used when planning fails after a reconnect.
    #[must_use]
    pub fn with_plan_retry(mut self, config: RetryConfig) -> Self {
        self.plan_retry = config;
        self
    }

    /// Run in the background until `shutdown` becomes true.
    ///
    /// The handle resolves to the number of migrations that completed.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut was_online = self.connectivity.is_online();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0u64;

        info!(poll_ms = self.poll_interval.as_millis() as u64, online = was_online, "Reconnect trigger started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let online = self.connectivity.is_online();
                    if online && !was_online {
                        info!("Connectivity restored, starting migration");
                        let connectivity = &self.connectivity;
                        let planned = tokio::select! {
                            planned = retry(
                                "reconnect_plan",
                                &self.plan_retry,
                                |e: &PersistError| e.failure.is_transient() && connectivity.is_online(),
                                || self.migration.plan(),
                            ) => planned,
                            _ = stop_requested(shutdown.clone()) => break,
                        };

                        match planned {
                            Ok(plan) => {
                                let result = self
                                    .migration
                                    .apply(
                                        plan,
                                        |current, total| debug!(current, total, "Migration progress"),
                                        |case| info!(key = %case.key, "Conflict awaiting decision"),
                                        Some(shutdown.clone()),
                                    )
                                    .await;
                                runs += 1;
                                info!(
                                    written = result.written(),
                                    failures = result.failures.len(),
                                    cancelled = result.cancelled,
                                    "Reconnect migration finished"
                                );
                            }
                            Err(e) => warn!(error = %e, "Reconnect migration could not plan"),
                        }
                    }
                    was_online = online;
                }
            }
        }

        info!(runs, "Reconnect trigger stopped");
        runs
    }
}

/// Resolves once `shutdown` is true or its sender is gone.
async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}
