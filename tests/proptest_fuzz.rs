//! Property-based tests for the persistence engine.
//!
//! Uses proptest to generate random store contents, batches and failure
//! points, and checks the engine's guarantees hold for all of them.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use proptest::prelude::*;
use serde_json::{json, Value};

use adaptive_sync::conflict::resolve;
use adaptive_sync::{
    ConflictResolver, ConflictStrategy, DeduplicationEngine, EngineConfig, Entity, InMemoryStore,
    ManualConnectivity, Operation, PersistenceEngine, Resolution, StoreHandle, StoreTarget,
    TransactionManager,
};
use adaptive_sync::Strategy as Route;

fn block_on<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
        .block_on(future)
}

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Small id space so generated entities collide often
fn id_strategy() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|n| format!("e{}", n))
}

fn payload_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(|n| json!({"n": n})),
        "[a-z]{0,8}".prop_map(|s| json!({"s": s})),
        prop::collection::vec(0u8..5, 0..4).prop_map(|v| json!({"tags": v})),
    ]
}

fn entity_strategy() -> impl Strategy<Value = Entity> {
    (id_strategy(), payload_strategy(), 0i64..1_000)
        .prop_map(|(id, payload, updated_at)| Entity::with_timestamps(id, payload, 0, updated_at))
}

/// Store contents keyed by id, as a store would hold them
fn store_strategy() -> impl Strategy<Value = BTreeMap<String, Entity>> {
    prop::collection::vec(entity_strategy(), 0..8)
        .prop_map(|entities| entities.into_iter().map(|e| (e.id.clone(), e)).collect())
}

fn operation_strategy() -> impl Strategy<Value = Operation> {
    let target = prop_oneof![Just(StoreTarget::Local), Just(StoreTarget::Cloud)];
    (target, entity_strategy(), any::<bool>()).prop_map(|(target, entity, delete)| {
        if delete {
            Operation::delete(target, entity.id)
        } else {
            Operation::put(target, entity)
        }
    })
}

// =============================================================================
// Transaction Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A failed transaction leaves both stores exactly as they were.
    #[test]
    fn prop_failed_transaction_is_invisible(
        local in store_strategy(),
        cloud in store_strategy(),
        operations in prop::collection::vec(operation_strategy(), 1..8),
        fail_at in any::<prop::sample::Index>(),
    ) {
        let fail_at = fail_at.index(operations.len());
        let poisoned = operations[fail_at].entity_id().to_string();
        let fail_target = operations[fail_at].target();

        block_on(async move {
            let local_store = Arc::new(InMemoryStore::with_entities("local", local.into_values()));
            let cloud_store = Arc::new(InMemoryStore::with_entities("cloud", cloud.into_values()));
            let before = (local_store.snapshot(), cloud_store.snapshot());

            match fail_target {
                StoreTarget::Local => local_store.reject_writes_for(poisoned, "poisoned"),
                StoreTarget::Cloud => cloud_store.reject_writes_for(poisoned, "poisoned"),
            }
            let txm = TransactionManager::new(local_store.clone(), cloud_store.clone(), 64, Duration::from_secs(5));

            let result = txm.execute(operations).await;

            prop_assert!(result.is_err());
            prop_assert_eq!((local_store.snapshot(), cloud_store.snapshot()), before);
            Ok(())
        })?;
    }
}

// =============================================================================
// Conflict and Deduplication Invariants
// =============================================================================

proptest! {
    /// Same inputs, same strategy, same answer.
    #[test]
    fn prop_resolution_is_deterministic(local in entity_strategy(), cloud in entity_strategy()) {
        for strategy in [
            ConflictStrategy::LastWriteWins,
            ConflictStrategy::CloudPriority,
            ConflictStrategy::LocalPriority,
            ConflictStrategy::MergeCompatible,
        ] {
            let first = resolve(&local, &cloud, strategy);
            let second = resolve(&local, &cloud, strategy);
            prop_assert_eq!(first, second);
        }
    }

    /// Last-write-wins never picks the older version.
    #[test]
    fn prop_last_write_wins_picks_newest(local in entity_strategy(), cloud in entity_strategy()) {
        match resolve(&local, &cloud, ConflictStrategy::LastWriteWins) {
            Resolution::Resolved { winner, .. } => {
                prop_assert_eq!(winner.updated_at, local.updated_at.max(cloud.updated_at));
            }
            Resolution::Deferred(_) => prop_assert!(false, "last-write-wins never defers"),
        }
    }

    /// Every key appears exactly once and every input is accounted for.
    #[test]
    fn prop_dedup_is_total(entities in prop::collection::vec(entity_strategy(), 0..20)) {
        let engine = DeduplicationEngine::new(ConflictResolver::default());

        let outcome = engine.deduplicate(&entities);

        let keys: HashSet<&str> = entities.iter().map(|e| e.id.as_str()).collect();
        let unique: HashSet<&str> = outcome.unique.iter().map(|e| e.id.as_str()).collect();
        prop_assert_eq!(outcome.unique.len(), unique.len());
        prop_assert_eq!(unique, keys);
        prop_assert_eq!(outcome.group_sizes.iter().sum::<usize>(), entities.len());
        prop_assert!(outcome.deferred.is_empty());
    }
}

// =============================================================================
// Migration and Cache Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// After one migration the stores match and the next plan is empty.
    #[test]
    fn prop_migration_converges(local in store_strategy(), cloud in store_strategy()) {
        block_on(async move {
            let local_store = Arc::new(InMemoryStore::with_entities("local", local.into_values()));
            let cloud_store = Arc::new(InMemoryStore::with_entities("cloud", cloud.into_values()));
            let engine = PersistenceEngine::new(
                EngineConfig::default(),
                local_store.clone(),
                cloud_store.clone(),
                Arc::new(ManualConnectivity::new(true)),
            );

            let result = engine.migrate().await.expect("plan");
            prop_assert!(result.is_clean());
            prop_assert_eq!(local_store.snapshot(), cloud_store.snapshot());

            let plan = engine.plan_migration().await.expect("plan");
            prop_assert!(plan.is_empty());
            Ok(())
        })?;
    }

    /// Reads never serve a value older than the last write.
    #[test]
    fn prop_cache_never_serves_stale(writes in prop::collection::vec(entity_strategy(), 1..16)) {
        block_on(async move {
            let local_store = Arc::new(InMemoryStore::new("local"));
            let config = EngineConfig { default_strategy: Route::LocalOnly, ..Default::default() };
            let engine = PersistenceEngine::new(
                config,
                local_store.clone(),
                Arc::new(InMemoryStore::new("cloud")),
                Arc::new(ManualConnectivity::new(true)),
            );

            for entity in writes {
                engine.read(&entity.id).await.expect("read");
                engine.write(entity.clone()).await.expect("write");
                prop_assert_eq!(engine.read(&entity.id).await.expect("read"), Some(entity.clone()));
                prop_assert_eq!(local_store.get(&entity.id).await.expect("get"), Some(entity));
            }
            Ok(())
        })?;
    }
}
