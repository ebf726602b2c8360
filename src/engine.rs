// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The assembled engine.
//!
//! [`PersistenceEngine`] wires the cache, transaction manager, router,
//! deduplication and migration together from an [`EngineConfig`]. The cloud
//! store is wrapped in a circuit breaker before anything else sees it.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::CacheLayer;
use crate::config::EngineConfig;
use crate::conflict::{ConflictCase, ConflictError, ConflictResolver, Decision, DecisionId, DecisionQueue, FieldMerger};
use crate::connectivity::ConnectivitySignal;
use crate::dedup::{DeduplicationEngine, IdentityFn};
use crate::entity::Entity;
use crate::migration::{MigrationEngine, MigrationPlan, MigrationResult, ReconnectTrigger};
use crate::resilience::circuit_breaker::{CircuitBreaker, GuardedStore};
use crate::router::{PersistError, PersistenceRouter};
use crate::storage::StoreHandle;
use crate::transaction::TransactionManager;

/// Optional caller hooks.
#[derive(Clone, Default)]
pub struct EngineHooks {
    /// Merges fields `MergeCompatible` cannot merge generically
    pub field_merger: Option<FieldMerger>,
    /// Business identity for deduplication; defaults to `entity.id`
    pub identity: Option<IdentityFn>,
}

/// Entry point: strategy-routed persistence plus reconciliation.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use adaptive_sync::{Entity, EngineConfig, InMemoryStore, ManualConnectivity, PersistenceEngine};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let local = Arc::new(InMemoryStore::new("local"));
/// let cloud = Arc::new(InMemoryStore::new("cloud"));
/// let connectivity = Arc::new(ManualConnectivity::new(false));
///
/// let engine = PersistenceEngine::new(EngineConfig::default(), local.clone(), cloud.clone(), connectivity.clone());
///
/// // Offline: Adaptive writes land locally only
/// engine.write(Entity::new("list.1", json!({"title": "Groceries"}))).await.unwrap();
/// assert!(cloud.is_empty());
///
/// // Back online: reconcile
/// connectivity.set_online(true);
/// let result = engine.migrate().await.unwrap();
/// assert_eq!(result.created_cloud, 1);
/// assert_eq!(local.snapshot(), cloud.snapshot());
/// # }
/// ```
pub struct PersistenceEngine {
    config: EngineConfig,
    cloud: Arc<GuardedStore>,
    router: PersistenceRouter,
    migration: Arc<MigrationEngine>,
    decisions: Arc<DecisionQueue>,
    connectivity: Arc<dyn ConnectivitySignal>,
}

impl std::fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("migration", &self.migration)
            .finish_non_exhaustive()
    }
}

impl PersistenceEngine {
    pub fn new(
        config: EngineConfig,
        local: Arc<dyn StoreHandle>,
        cloud: Arc<dyn StoreHandle>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        Self::with_hooks(config, local, cloud, connectivity, EngineHooks::default())
    }

    pub fn with_hooks(
        config: EngineConfig,
        local: Arc<dyn StoreHandle>,
        cloud: Arc<dyn StoreHandle>,
        connectivity: Arc<dyn ConnectivitySignal>,
        hooks: EngineHooks,
    ) -> Self {
        let cloud = Arc::new(GuardedStore::new(
            cloud,
            CircuitBreaker::new("cloud", config.circuit_config()),
        ));

        let cache = Arc::new(CacheLayer::new(config.cache_max_entries, config.cache_ttl()));
        let transactions = TransactionManager::new(
            local,
            cloud.clone(),
            config.journal_capacity,
            config.transaction_timeout(),
        );
        let router = PersistenceRouter::new(cache, transactions, connectivity.clone());

        let mut resolver = ConflictResolver::new(config.conflict_strategy);
        if let Some(merger) = hooks.field_merger {
            resolver = resolver.with_field_merger(merger);
        }
        let mut dedup = DeduplicationEngine::new(resolver);
        if let Some(identity) = hooks.identity {
            dedup = dedup.with_identity(identity);
        }

        let decisions = Arc::new(DecisionQueue::new());
        let migration = Arc::new(MigrationEngine::new(router.clone(), dedup, decisions.clone()));

        info!(
            strategy = %config.default_strategy,
            conflicts = %config.conflict_strategy,
            cache_max_entries = config.cache_max_entries,
            "Persistence engine ready"
        );

        Self {
            config,
            cloud,
            router,
            migration,
            decisions,
            connectivity,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Router for calls with an explicit strategy.
    pub fn router(&self) -> &PersistenceRouter {
        &self.router
    }

    pub fn migration(&self) -> &Arc<MigrationEngine> {
        &self.migration
    }

    pub fn decisions(&self) -> &DecisionQueue {
        &self.decisions
    }

    pub fn cache(&self) -> &CacheLayer {
        self.router.cache()
    }

    pub fn transactions(&self) -> &TransactionManager {
        self.router.transactions()
    }

    pub fn cloud_breaker(&self) -> &CircuitBreaker {
        self.cloud.breaker()
    }

    pub async fn read(&self, id: &str) -> Result<Option<Entity>, PersistError> {
        self.router.read(id, self.config.default_strategy).await
    }

    pub async fn read_all(&self) -> Result<Vec<Entity>, PersistError> {
        self.router.read_all(self.config.default_strategy).await
    }

    pub async fn write(&self, entity: Entity) -> Result<(), PersistError> {
        self.router.write(entity, self.config.default_strategy).await
    }

    pub async fn write_all(&self, entities: Vec<Entity>) -> Result<(), PersistError> {
        self.router.write_all(entities, self.config.default_strategy).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), PersistError> {
        self.router.delete(id, self.config.default_strategy).await
    }

    pub async fn plan_migration(&self) -> Result<MigrationPlan, PersistError> {
        self.migration.plan().await
    }

    /// Full reconciliation without callbacks.
    pub async fn migrate(&self) -> Result<MigrationResult, PersistError> {
        self.migration.run(|_, _| {}, |_| {}, None).await
    }

    /// Full reconciliation with progress, conflict and cancellation hooks.
    pub async fn migrate_with<P, C>(
        &self,
        on_progress: P,
        on_conflict: C,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationResult, PersistError>
    where
        P: FnMut(u32, u32),
        C: FnMut(&ConflictCase),
    {
        self.migration.run(on_progress, on_conflict, cancel).await
    }

    pub async fn reconcile(&self, id: &str) -> Result<Option<Entity>, PersistError> {
        self.migration.reconcile_one(id).await
    }

    pub fn pending_conflicts(&self) -> Vec<(DecisionId, ConflictCase)> {
        self.decisions.pending()
    }

    pub fn decide(&self, id: DecisionId, decision: Decision) -> Result<(), ConflictError> {
        self.decisions.decide(id, decision)
    }

    /// Write out every answered conflict.
    pub async fn apply_decisions(&self) -> Result<MigrationResult, PersistError> {
        let plan = self.migration.plan_decided().await?;
        Ok(self.migration.apply(plan, |_, _| {}, |_| {}, None).await)
    }

    /// Migrate automatically on every reconnect until `shutdown` flips.
    pub fn spawn_reconnect_trigger(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<u64> {
        ReconnectTrigger::new(self.migration.clone(), self.connectivity.clone(), self.config.reconnect_poll())
            .spawn(shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictStrategy;
    use crate::connectivity::ManualConnectivity;
    use crate::router::Strategy;
    use crate::storage::InMemoryStore;
    use serde_json::{json, Value};

    fn engine_with(config: EngineConfig, hooks: EngineHooks) -> (Arc<InMemoryStore>, Arc<InMemoryStore>, Arc<ManualConnectivity>, PersistenceEngine) {
        let local = Arc::new(InMemoryStore::new("local"));
        let cloud = Arc::new(InMemoryStore::new("cloud"));
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let engine = PersistenceEngine::with_hooks(config, local.clone(), cloud.clone(), connectivity.clone(), hooks);
        (local, cloud, connectivity, engine)
    }

    #[tokio::test]
    async fn test_default_strategy_is_used() {
        let config = EngineConfig {
            default_strategy: Strategy::LocalOnly,
            ..Default::default()
        };
        let (local, cloud, _, engine) = engine_with(config, EngineHooks::default());

        engine.write(Entity::new("a", json!({}))).await.unwrap();

        assert_eq!(local.len(), 1);
        assert!(cloud.is_empty());
        assert_eq!(engine.read_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cloud_goes_through_breaker() {
        let (_, cloud, _, engine) = engine_with(EngineConfig::default(), EngineHooks::default());
        cloud.set_online(false);

        // Adaptive online: cloud fails, local takes the write
        engine.write(Entity::new("a", json!({}))).await.unwrap();

        assert!(engine.cloud_breaker().failures() >= 1);
        assert_eq!(engine.router().read("a", Strategy::LocalOnly).await.unwrap().map(|e| e.id), Some("a".into()));
    }

    #[tokio::test]
    async fn test_field_merger_hook_reaches_resolver() {
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::MergeCompatible,
            ..Default::default()
        };
        let hooks = EngineHooks {
            field_merger: Some(Arc::new(|_: &str, l: &Value, _: &Value| Some(l.clone()))),
            identity: None,
        };
        let (local, cloud, _, engine) = engine_with(config, hooks);
        local.put(&Entity::with_timestamps("a", json!({"x": [1]}), 1, 10)).await.unwrap();
        cloud.put(&Entity::with_timestamps("a", json!({"x": "one"}), 1, 20)).await.unwrap();

        let winner = engine.reconcile("a").await.unwrap().unwrap();

        assert_eq!(winner.payload, json!({"x": [1]}));
        assert_eq!(winner.updated_at, 20);
    }

    #[tokio::test]
    async fn test_decide_and_apply() {
        let config = EngineConfig {
            conflict_strategy: ConflictStrategy::UserChoice,
            ..Default::default()
        };
        let (local, cloud, _, engine) = engine_with(config, EngineHooks::default());
        local.put(&Entity::with_timestamps("a", json!({"v": "mine"}), 1, 10)).await.unwrap();
        cloud.put(&Entity::with_timestamps("a", json!({"v": "theirs"}), 1, 20)).await.unwrap();

        let result = engine.migrate().await.unwrap();
        assert_eq!(result.conflicts.len(), 1);

        let (id, _) = engine.pending_conflicts().remove(0);
        engine.decide(id, Decision::KeepLocal).unwrap();
        let result = engine.apply_decisions().await.unwrap();

        assert!(result.is_clean());
        assert_eq!(cloud.snapshot()["a"].payload, json!({"v": "mine"}));
        assert!(engine.decide(id, Decision::KeepCloud).is_err());
    }
}
