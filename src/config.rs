// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the persistence engine.
//!
//! # Example
//!
//! ```
//! use adaptive_sync::{ConflictStrategy, EngineConfig, Strategy};
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.cache_max_entries, 1024);
//! assert_eq!(config.default_strategy, Strategy::Adaptive);
//!
//! // Overrides
//! let config = EngineConfig {
//!     cache_ttl_ms: 30_000,
//!     conflict_strategy: ConflictStrategy::MergeCompatible,
//!     ..Default::default()
//! };
//! assert_eq!(config.cache_ttl().as_secs(), 30);
//! ```

use std::time::Duration;
use serde::Deserialize;

use crate::conflict::ConflictStrategy;
use crate::resilience::circuit_breaker::{CircuitConfig, CircuitPreset};
use crate::router::Strategy;

/// Configuration for the persistence engine.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Cache capacity in entries; 0 disables the cache (default: 1024)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Cache entry lifetime (default: 5 minutes)
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Operation records kept for diagnostics
    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    /// Transaction deadline unless overridden per call (default: 5s)
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,

    /// Strategy used by the engine's convenience methods
    #[serde(default)]
    pub default_strategy: Strategy,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,

    /// Connectivity polling period for the reconnect trigger (default: 5s)
    #[serde(default = "default_reconnect_poll_ms")]
    pub reconnect_poll_ms: u64,

    /// Circuit breaker tuning for the cloud store
    #[serde(default)]
    pub cloud_circuit: CircuitPreset,
}

fn default_cache_max_entries() -> usize { 1024 }
fn default_cache_ttl_ms() -> u64 { 300_000 } // 5 min
fn default_journal_capacity() -> usize { 512 }
fn default_transaction_timeout_ms() -> u64 { 5_000 }
fn default_reconnect_poll_ms() -> u64 { 5_000 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_ms: default_cache_ttl_ms(),
            journal_capacity: default_journal_capacity(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            default_strategy: Strategy::default(),
            conflict_strategy: ConflictStrategy::default(),
            reconnect_poll_ms: default_reconnect_poll_ms(),
            cloud_circuit: CircuitPreset::default(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    #[must_use]
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    #[must_use]
    pub fn reconnect_poll(&self) -> Duration {
        Duration::from_millis(self.reconnect_poll_ms)
    }

    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig::from_preset(self.cloud_circuit)
    }
}
