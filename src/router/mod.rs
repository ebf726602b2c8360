// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Strategy-driven routing of reads and writes between the two stores.
//!
//! ```text
//!            read                          write / delete / write_all
//!              │                                     │
//!        ┌─────▼─────┐                     ┌─────────▼─────────┐
//!        │   cache   │── hit ──► return    │ TransactionManager │── primary
//!        └─────┬─────┘                     └─────────┬─────────┘
//!         miss │                          Unavailable │ (fallback allowed)
//!        ┌─────▼─────┐                     ┌─────────▼─────────┐
//!        │  primary  │── Unavailable ──►   │     fallback      │
//!        └─────┬─────┘      fallback       └─────────┬─────────┘
//!              │                                     │
//!   populate cache unless                    invalidate cache
//!   invalidated meanwhile
//!                                      + write-through (Adaptive online)
//! ```
//!
//! `Rejected` never triggers fallback.

pub mod error;
pub mod strategy;

pub use error::{PersistError, PersistFailure};
pub use strategy::{Route, Strategy};

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::CacheLayer;
use crate::connectivity::ConnectivitySignal;
use crate::entity::Entity;
use crate::storage::{StoreError, StoreTarget};
use crate::transaction::{Operation, TransactionManager};

/// Chooses store(s) per call and keeps the cache coherent with writes.
#[derive(Clone)]
pub struct PersistenceRouter {
    cache: Arc<CacheLayer>,
    transactions: TransactionManager,
    connectivity: Arc<dyn ConnectivitySignal>,
}

impl std::fmt::Debug for PersistenceRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceRouter")
            .field("cache_entries", &self.cache.len())
            .field("transactions", &self.transactions)
            .finish_non_exhaustive()
    }
}

impl PersistenceRouter {
    pub fn new(
        cache: Arc<CacheLayer>,
        transactions: TransactionManager,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        Self {
            cache,
            transactions,
            connectivity,
        }
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    fn route(&self, strategy: Strategy) -> Route {
        let route = match strategy {
            Strategy::Adaptive => strategy.route(self.connectivity.is_online()),
            _ => strategy.route(true),
        };
        debug!(strategy = %strategy, primary = %route.primary, "Route resolved");
        route
    }

    /// Read one entity, cache first.
    #[tracing::instrument(skip(self), fields(source))]
    pub async fn read(&self, id: &str, strategy: Strategy) -> Result<Option<Entity>, PersistError> {
        if let Some(entity) = self.cache.get(id) {
            tracing::Span::current().record("source", "cache");
            return Ok(Some(entity));
        }

        let generation = self.cache.generation();
        let route = self.route(strategy);
        let (target, found) = self
            .with_fallback(strategy, route, "get", |target| async move {
                match self.transactions.store(target).get(id).await {
                    Err(StoreError::NotFound(_)) => Ok(None),
                    other => other,
                }
            })
            .await?;

        tracing::Span::current().record("source", target.as_str());
        // A write that committed during the fetch has invalidated the key.
        if let Some(entity) = &found {
            self.cache.put_if_current(id, entity.clone(), generation);
        }
        Ok(found)
    }

    /// Read every entity from the routed store. Not cached.
    pub async fn read_all(&self, strategy: Strategy) -> Result<Vec<Entity>, PersistError> {
        let route = self.route(strategy);
        let (target, entities) = self
            .with_fallback(strategy, route, "list", |target| async move {
                self.transactions.store(target).list().await
            })
            .await?;

        debug!(strategy = %strategy, target = %target, count = entities.len(), "Listed entities");
        Ok(entities)
    }

    /// Persist one entity as a single-operation transaction.
    pub async fn write(&self, entity: Entity, strategy: Strategy) -> Result<(), PersistError> {
        let ids = vec![entity.id.clone()];
        self.transact(strategy, &ids, |target| vec![Operation::put(target, entity.clone())])
            .await
    }

    /// Delete one entity as a single-operation transaction.
    pub async fn delete(&self, id: &str, strategy: Strategy) -> Result<(), PersistError> {
        let ids = vec![id.to_string()];
        self.transact(strategy, &ids, |target| vec![Operation::delete(target, id)])
            .await
    }

    /// Persist many entities as one transaction on the routed store.
    pub async fn write_all(&self, entities: Vec<Entity>, strategy: Strategy) -> Result<(), PersistError> {
        let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
        self.transact(strategy, &ids, |target| {
            entities
                .iter()
                .cloned()
                .map(|entity| Operation::put(target, entity))
                .collect()
        })
        .await
    }

    async fn transact<B>(&self, strategy: Strategy, ids: &[String], build: B) -> Result<(), PersistError>
    where
        B: Fn(StoreTarget) -> Vec<Operation>,
    {
        let route = self.route(strategy);
        let result = self
            .with_fallback(strategy, route, "transaction", |target| {
                let operations = build(target);
                async move { self.transactions.execute(operations).await }
            })
            .await;

        for id in ids {
            self.cache.invalidate(id);
        }

        let (target, report) = result?;
        debug!(strategy = %strategy, target = %target, txn = %report.id, "Write committed");

        if let Some(copy_to) = route.write_through.filter(|t| *t != target) {
            match self.transactions.execute(build(copy_to)).await {
                Ok(_) => debug!(target = %copy_to, "Write-through applied"),
                Err(e) => {
                    crate::metrics::record_write_through_failure(copy_to.as_str());
                    warn!(target = %copy_to, error = %e, "Write-through failed, left for next migration");
                }
            }
            for id in ids {
                self.cache.invalidate(id);
            }
        }

        Ok(())
    }

    /// Run `call` on the primary, then on the fallback if the primary was
    /// unavailable. Returns the store that answered.
    async fn with_fallback<T, E, F, Fut>(
        &self,
        strategy: Strategy,
        route: Route,
        operation: &'static str,
        call: F,
    ) -> Result<(StoreTarget, T), PersistError>
    where
        F: Fn(StoreTarget) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Into<PersistFailure>,
    {
        let primary_failure: PersistFailure = match observed(route.primary, operation, call(route.primary)).await {
            Ok(value) => return Ok((route.primary, value)),
            Err(e) => e.into(),
        };
        record_failure(route.primary, operation, &primary_failure);

        let primary_error = PersistError::new(strategy, route.primary, primary_failure);
        let Some(fallback) = route.fallback.filter(|_| primary_error.failure.is_transient()) else {
            return Err(primary_error);
        };

        crate::metrics::record_fallback(strategy.as_str(), route.primary.as_str(), fallback.as_str());
        warn!(
            strategy = %strategy,
            from = %route.primary,
            to = %fallback,
            error = %primary_error.failure,
            "Primary store unavailable, falling back"
        );

        match observed(fallback, operation, call(fallback)).await {
            Ok(value) => Ok((fallback, value)),
            Err(e) => {
                let failure: PersistFailure = e.into();
                record_failure(fallback, operation, &failure);
                Err(primary_error.with_fallback(PersistError::new(strategy, fallback, failure)))
            }
        }
    }
}

/// Time one store call and count its outcome.
async fn observed<T, E, Fut>(target: StoreTarget, operation: &'static str, call: Fut) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let _timer = crate::time_operation!(target.as_str(), operation);
    let result = call.await;
    let status = if result.is_ok() { "success" } else { "error" };
    crate::metrics::record_store_operation(target.as_str(), operation, status);
    result
}

fn record_failure(target: StoreTarget, operation: &str, failure: &PersistFailure) {
    let kind = match failure {
        PersistFailure::Store(e) => e.kind(),
        PersistFailure::Transaction(e) => e.kind(),
        PersistFailure::Conflict(_) => "conflict",
    };
    crate::metrics::record_store_error(target.as_str(), operation, kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ManualConnectivity;
    use crate::storage::{InMemoryStore, StoreHandle};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        local: Arc<InMemoryStore>,
        cloud: Arc<InMemoryStore>,
        connectivity: Arc<ManualConnectivity>,
        router: PersistenceRouter,
    }

    fn fixture() -> Fixture {
        let local = Arc::new(InMemoryStore::new("local"));
        let cloud = Arc::new(InMemoryStore::new("cloud"));
        let connectivity = Arc::new(ManualConnectivity::new(true));
        let transactions = TransactionManager::new(local.clone(), cloud.clone(), 128, Duration::from_secs(5));
        let router = PersistenceRouter::new(
            Arc::new(CacheLayer::new(16, Duration::from_secs(60))),
            transactions,
            connectivity.clone(),
        );
        Fixture { local, cloud, connectivity, router }
    }

    fn entity(id: &str, updated_at: i64) -> Entity {
        Entity::with_timestamps(id, json!({"rev": updated_at}), 1, updated_at)
    }

    #[tokio::test]
    async fn test_local_only_write_and_read() {
        let f = fixture();

        f.router.write(entity("a", 1), Strategy::LocalOnly).await.unwrap();

        assert_eq!(f.local.len(), 1);
        assert!(f.cloud.is_empty());
        assert_eq!(f.router.read("a", Strategy::LocalOnly).await.unwrap(), Some(entity("a", 1)));
    }

    #[tokio::test]
    async fn test_read_populates_cache_and_hits_short_circuit() {
        let f = fixture();
        f.local.put(&entity("a", 1)).await.unwrap();

        f.router.read("a", Strategy::LocalOnly).await.unwrap();
        f.local.set_online(false);

        // Served from cache even though the store is down
        assert_eq!(f.router.read("a", Strategy::LocalOnly).await.unwrap(), Some(entity("a", 1)));
        assert_eq!(f.router.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_write_invalidates_cached_entry() {
        let f = fixture();
        f.router.write(entity("a", 1), Strategy::CloudOnly).await.unwrap();
        f.router.read("a", Strategy::CloudOnly).await.unwrap();

        f.router.write(entity("a", 2), Strategy::CloudOnly).await.unwrap();

        let read = f.router.read("a", Strategy::CloudOnly).await.unwrap().unwrap();
        assert_eq!(read.updated_at, 2);
    }

    /// Reads take `delay`; everything else goes straight through.
    struct SlowReads {
        inner: Arc<InMemoryStore>,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl StoreHandle for SlowReads {
        async fn get(&self, id: &str) -> Result<Option<Entity>, StoreError> {
            let found = self.inner.get(id).await;
            tokio::time::sleep(self.delay).await;
            found
        }
        async fn list(&self) -> Result<Vec<Entity>, StoreError> {
            self.inner.list().await
        }
        async fn put(&self, entity: &Entity) -> Result<(), StoreError> {
            self.inner.put(entity).await
        }
        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_racing_a_write_does_not_cache_stale_value() {
        let local = Arc::new(InMemoryStore::with_entities("local", [entity("x", 1)]));
        let slow = Arc::new(SlowReads { inner: local.clone(), delay: Duration::from_millis(100) });
        let router = PersistenceRouter::new(
            Arc::new(CacheLayer::new(16, Duration::from_secs(300))),
            TransactionManager::new(slow, Arc::new(InMemoryStore::new("cloud")), 64, Duration::from_secs(5)),
            Arc::new(ManualConnectivity::new(true)),
        );

        // The read fetches x@1; x@2 commits and invalidates before it returns
        let (read, ()) = tokio::join!(router.read("x", Strategy::LocalOnly), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            local.put(&entity("x", 2)).await.unwrap();
            router.cache().invalidate("x");
        });
        assert_eq!(read.unwrap().map(|e| e.updated_at), Some(1));
        assert_eq!(local.snapshot()["x"].updated_at, 2);

        let again = router.read("x", Strategy::LocalOnly).await.unwrap().unwrap();
        assert_eq!(again.updated_at, 2);
    }

    #[tokio::test]
    async fn test_local_first_falls_back_to_cloud() {
        let f = fixture();
        f.local.set_online(false);

        f.router.write(entity("a", 1), Strategy::LocalFirst).await.unwrap();

        assert_eq!(f.cloud.len(), 1);
    }

    #[tokio::test]
    async fn test_both_stores_down_reports_primary_with_fallback_context() {
        let f = fixture();
        f.local.set_online(false);
        f.cloud.set_online(false);

        let err = f.router.read("a", Strategy::CloudFirst).await.unwrap_err();

        assert_eq!(err.target, StoreTarget::Cloud);
        assert!(matches!(err.store_error(), Some(StoreError::Unavailable(_))));
        let fallback = err.fallback.as_deref().unwrap();
        assert_eq!(fallback.target, StoreTarget::Local);
    }

    #[tokio::test]
    async fn test_rejected_does_not_fall_back() {
        let f = fixture();
        f.local.reject_writes_for("a", "invalid");

        let err = f.router.write(entity("a", 1), Strategy::LocalFirst).await.unwrap_err();

        assert!(err.is_rejected());
        assert!(err.fallback.is_none());
        assert!(f.cloud.is_empty());
    }

    #[tokio::test]
    async fn test_single_store_strategies_never_fall_back() {
        let f = fixture();
        f.cloud.set_online(false);

        let err = f.router.write(entity("a", 1), Strategy::CloudOnly).await.unwrap_err();

        assert!(err.fallback.is_none());
        assert!(f.local.is_empty());
    }

    #[tokio::test]
    async fn test_adaptive_online_writes_through_to_local() {
        let f = fixture();

        f.router.write(entity("a", 1), Strategy::Adaptive).await.unwrap();

        assert_eq!(f.cloud.snapshot().get("a"), Some(&entity("a", 1)));
        assert_eq!(f.local.snapshot().get("a"), Some(&entity("a", 1)));
    }

    #[tokio::test]
    async fn test_adaptive_write_through_failure_is_not_fatal() {
        let f = fixture();
        f.local.reject_writes_for("a", "disk full");

        f.router.write(entity("a", 1), Strategy::Adaptive).await.unwrap();

        assert_eq!(f.cloud.len(), 1);
        assert!(f.local.is_empty());
    }

    #[tokio::test]
    async fn test_adaptive_offline_is_local_only() {
        let f = fixture();
        f.connectivity.set_online(false);

        f.router.write(entity("a", 1), Strategy::Adaptive).await.unwrap();

        assert_eq!(f.local.len(), 1);
        assert!(f.cloud.is_empty());
    }

    #[tokio::test]
    async fn test_write_all_is_atomic() {
        let f = fixture();
        f.local.reject_writes_for("c", "invalid");

        let err = f
            .router
            .write_all(vec![entity("a", 1), entity("b", 1), entity("c", 1)], Strategy::LocalOnly)
            .await
            .unwrap_err();

        assert!(err.is_rejected());
        assert!(f.local.is_empty());
    }

    #[tokio::test]
    async fn test_delete_and_read_all() {
        let f = fixture();
        f.router
            .write_all(vec![entity("a", 1), entity("b", 1)], Strategy::LocalOnly)
            .await
            .unwrap();

        f.router.delete("a", Strategy::LocalOnly).await.unwrap();

        let all = f.router.read_all(Strategy::LocalOnly).await.unwrap();
        assert_eq!(all, vec![entity("b", 1)]);
        assert_eq!(f.router.read("a", Strategy::LocalOnly).await.unwrap(), None);
    }
}
