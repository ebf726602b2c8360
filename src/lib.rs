//! # Adaptive Sync
//!
//! An offline-first persistence and synchronization engine for applications
//! that keep a local store and a cloud store in step.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     PersistenceRouter                       │
//! │  • Strategy per call: LocalOnly, CloudOnly, LocalFirst,     │
//! │    CloudFirst, Adaptive (connectivity decides)              │
//! │  • Fallback to the secondary store on transient failure     │
//! └─────────────────────────────────────────────────────────────┘
//!            │ reads                         │ writes
//!            ▼                               ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │       CacheLayer         │   │     TransactionManager       │
//! │  • LRU + per-entry TTL   │   │  • All-or-nothing batches    │
//! │  • Invalidated on write  │   │  • Reverse-order compensation│
//! └──────────────────────────┘   │  • Deadline + late responses │
//!                                └──────────────────────────────┘
//!                                     │               │
//!                                     ▼               ▼
//!                                ┌─────────┐   ┌──────────────────┐
//!                                │  local  │   │ cloud (breaker)  │
//!                                └─────────┘   └──────────────────┘
//!                                     ▲               ▲
//!                                     └───────┬───────┘
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     MigrationEngine                         │
//! │  • Plans create / update / retire buckets per store         │
//! │  • DeduplicationEngine + ConflictResolver pick winners      │
//! │  • User-choice conflicts wait in the DecisionQueue          │
//! │  • ReconnectTrigger runs it on every reconnect              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use adaptive_sync::{Entity, EngineConfig, InMemoryStore, ManualConnectivity, PersistenceEngine};
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() {
//!     let local = Arc::new(InMemoryStore::new("local"));
//!     let cloud = Arc::new(InMemoryStore::new("cloud"));
//!     let connectivity = Arc::new(ManualConnectivity::new(true));
//!
//!     let engine = PersistenceEngine::new(EngineConfig::default(), local, cloud, connectivity);
//!
//!     let (shutdown, rx) = watch::channel(false);
//!     let trigger = engine.spawn_reconnect_trigger(rx);
//!
//!     engine.write(Entity::new("note.1", json!({"text": "hello"}))).await.expect("write");
//!     if let Some(note) = engine.read("note.1").await.expect("read") {
//!         println!("Found: {}", note.payload);
//!     }
//!
//!     shutdown.send(true).ok();
//!     trigger.await.ok();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: The assembled [`PersistenceEngine`]
//! - [`router`]: Strategy routing and fallback
//! - [`cache`]: Bounded LRU cache with TTL
//! - [`transaction`]: Compensating transactions and the operation journal
//! - [`conflict`]: Conflict strategies and the user decision queue
//! - [`dedup`]: Identity-based deduplication
//! - [`migration`]: Bulk reconciliation and the reconnect trigger
//! - [`storage`]: The store capability and an in-memory adapter
//! - [`resilience`]: Circuit breaker and retry

pub mod config;
pub mod entity;
pub mod storage;
pub mod connectivity;
pub mod cache;
pub mod conflict;
pub mod dedup;
pub mod transaction;
pub mod router;
pub mod migration;
pub mod resilience;
pub mod engine;
pub mod metrics;

pub use config::EngineConfig;
pub use engine::{EngineHooks, PersistenceEngine};
pub use entity::Entity;
pub use storage::{InMemoryStore, StoreError, StoreHandle, StoreTarget};
pub use connectivity::{ConnectivitySignal, ManualConnectivity};
pub use cache::{CacheLayer, CacheStats};
pub use conflict::{
    AppliedRule, ConflictCase, ConflictError, ConflictResolver, ConflictStrategy, Decision, DecisionId,
    DecisionQueue, FieldMerger, Resolution, ResolvedConflict,
};
pub use dedup::{DedupOutcome, DeduplicationEngine, IdentityFn};
pub use transaction::{
    Journal, Operation, OperationRecord, TransactionError, TransactionManager, TransactionReport,
    TransactionState, TransactionStats,
};
pub use router::{PersistError, PersistFailure, PersistenceRouter, Strategy};
pub use migration::{MigrationEngine, MigrationPlan, MigrationResult, ReconnectTrigger};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitPreset};
pub use resilience::retry::RetryConfig;
