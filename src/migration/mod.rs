// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk reconciliation between the local and cloud stores.
//!
//! # Planning
//!
//! Both stores are listed and grouped by identity key. Each store's group is
//! first folded to one representative (a store can hold several technical
//! ids for one logical record when a custom identity function is used), then
//! the two representatives are resolved:
//!
//! | Local | Cloud | Result                                              |
//! |-------|-------|-----------------------------------------------------|
//! | yes   | no    | `create_cloud`                                      |
//! | no    | yes   | `create_local`                                      |
//! | equal | equal | nothing                                             |
//! | yes   | yes   | winner to `update_*` wherever it differs            |
//! | yes   | yes   | user choice pending: `conflicts` + decision queue   |
//!
//! Ids in a group other than the winner's id are retired from their store.
//!
//! # Applying
//!
//! Buckets run in order `create_local`, `create_cloud`, `update_local`,
//! `update_cloud`, `retire_local`, `retire_cloud`, then `conflicts`, which
//! are only reported. Every entity is its own transaction; a failure is
//! recorded and the run continues. Applying a plan and planning again yields
//! an empty plan.

pub mod plan;
pub mod trigger;

pub use plan::{Bucket, MigrationFailure, MigrationPlan, MigrationResult};
pub use trigger::ReconnectTrigger;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::conflict::{AppliedRule, ConflictCase, ConflictError, DecisionQueue, Resolution, ResolvedConflict};
use crate::dedup::DeduplicationEngine;
use crate::entity::Entity;
use crate::router::{PersistError, PersistenceRouter, Strategy};
use crate::storage::{StoreError, StoreTarget};

/// One identity key's versions in each store.
#[derive(Debug, Default)]
struct KeyGroup {
    key: String,
    local: Vec<Entity>,
    cloud: Vec<Entity>,
}

enum Step {
    Put(Entity),
    Delete(String),
}

impl Step {
    fn id(&self) -> &str {
        match self {
            Self::Put(entity) => &entity.id,
            Self::Delete(id) => id,
        }
    }
}

/// Plans and applies reconciliation runs.
pub struct MigrationEngine {
    router: PersistenceRouter,
    dedup: DeduplicationEngine,
    decisions: Arc<DecisionQueue>,
    running: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("dedup", &self.dedup)
            .field("pending_decisions", &self.decisions.len())
            .finish_non_exhaustive()
    }
}

impl MigrationEngine {
    pub fn new(router: PersistenceRouter, dedup: DeduplicationEngine, decisions: Arc<DecisionQueue>) -> Self {
        Self {
            router,
            dedup,
            decisions,
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn decisions(&self) -> &Arc<DecisionQueue> {
        &self.decisions
    }

    pub fn router(&self) -> &PersistenceRouter {
        &self.router
    }

    /// Compare both stores and work out what to write.
    ///
    /// A user-choice conflict the caller already answered is resolved with
    /// that answer, which is consumed from the decision queue.
    pub async fn plan(&self) -> Result<MigrationPlan, PersistError> {
        let groups = self.snapshot().await?;
        let mut plan = MigrationPlan::default();

        for group in &groups {
            self.plan_group(&mut plan, group);
        }

        info!(
            create_local = plan.create_local.len(),
            create_cloud = plan.create_cloud.len(),
            update_local = plan.update_local.len(),
            update_cloud = plan.update_cloud.len(),
            retire = plan.retire_local.len() + plan.retire_cloud.len(),
            conflicts = plan.conflicts.len(),
            "Migration planned"
        );
        Ok(plan)
    }

    /// Plan only the conflicts answered through the decision queue.
    pub async fn plan_decided(&self) -> Result<MigrationPlan, PersistError> {
        let decided = self.decisions.take_decided();
        if decided.is_empty() {
            return Ok(MigrationPlan::default());
        }

        let groups = self.snapshot().await?;
        let by_key: HashMap<&str, &KeyGroup> = groups.iter().map(|g| (g.key.as_str(), g)).collect();
        let mut plan = MigrationPlan::default();

        for resolved in decided {
            match by_key.get(resolved.case.key.as_str()) {
                Some(group) => {
                    place(&mut plan, &resolved.winner, &group.local, StoreTarget::Local);
                    place(&mut plan, &resolved.winner, &group.cloud, StoreTarget::Cloud);
                }
                None => debug!(key = %resolved.case.key, "Decided entity no longer in either store"),
            }
            plan.resolutions.push(resolved);
        }

        info!(writes = plan.write_count(), "Decided conflicts planned");
        Ok(plan)
    }

    /// Reconcile a single id across both stores right away.
    ///
    /// Returns the winning version (`None` when neither store has it). A
    /// pending user choice fails with [`ConflictError::Unresolved`] until the
    /// queued decision is answered.
    pub async fn reconcile_one(&self, id: &str) -> Result<Option<Entity>, PersistError> {
        let _running = self.running.lock().await;

        let mut group = KeyGroup {
            key: id.to_string(),
            ..Default::default()
        };
        for target in [StoreTarget::Local, StoreTarget::Cloud] {
            let found = match self.router.transactions().store(target).get(id).await {
                Ok(found) => found,
                Err(StoreError::NotFound(_)) => None,
                Err(e) => return Err(PersistError::new(single_store(target), target, e)),
            };
            match target {
                StoreTarget::Local => group.local.extend(found),
                StoreTarget::Cloud => group.cloud.extend(found),
            }
        }

        let mut plan = MigrationPlan::default();
        self.plan_group(&mut plan, &group);

        if let Some(case) = plan.conflicts.first() {
            let decision = self.decisions.enqueue(case.clone());
            return Err(PersistError::new(
                Strategy::CloudFirst,
                StoreTarget::Cloud,
                ConflictError::Unresolved {
                    key: case.key.clone(),
                    decision,
                },
            ));
        }

        let winner = plan
            .update_local
            .first()
            .or(plan.update_cloud.first())
            .or(plan.create_local.first())
            .or(plan.create_cloud.first())
            .cloned()
            .or_else(|| group.local.first().cloned());

        let result = self.apply_plan(plan, |_, _| {}, |_| {}, None).await;
        if let Some(failure) = result.failures.into_iter().next() {
            return Err(failure.error);
        }
        Ok(winner)
    }

    /// `plan` followed by `apply`.
    pub async fn run<P, C>(
        &self,
        on_progress: P,
        on_conflict: C,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<MigrationResult, PersistError>
    where
        P: FnMut(u32, u32),
        C: FnMut(&ConflictCase),
    {
        let _running = self.running.lock().await;
        let plan = self.plan().await?;
        Ok(self.apply_plan(plan, on_progress, on_conflict, cancel).await)
    }

    /// Write a plan out. Never fails as a whole: per-entity failures are
    /// collected in the result.
    pub async fn apply<P, C>(
        &self,
        plan: MigrationPlan,
        on_progress: P,
        on_conflict: C,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MigrationResult
    where
        P: FnMut(u32, u32),
        C: FnMut(&ConflictCase),
    {
        let _running = self.running.lock().await;
        self.apply_plan(plan, on_progress, on_conflict, cancel).await
    }

    async fn apply_plan<P, C>(
        &self,
        plan: MigrationPlan,
        mut on_progress: P,
        mut on_conflict: C,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MigrationResult
    where
        P: FnMut(u32, u32),
        C: FnMut(&ConflictCase),
    {
        let started = std::time::Instant::now();
        let total = u32::try_from(plan.total_steps()).unwrap_or(u32::MAX);
        let mut result = MigrationResult {
            total,
            ..Default::default()
        };
        info!(total, "Migration started");

        let MigrationPlan {
            create_local,
            create_cloud,
            update_local,
            update_cloud,
            retire_local,
            retire_cloud,
            conflicts,
            ..
        } = plan;

        let puts = [
            (Bucket::CreateLocal, create_local),
            (Bucket::CreateCloud, create_cloud),
            (Bucket::UpdateLocal, update_local),
            (Bucket::UpdateCloud, update_cloud),
        ]
        .into_iter()
        .flat_map(|(bucket, entities)| entities.into_iter().map(move |e| (bucket, Step::Put(e))));
        let deletes = [(Bucket::RetireLocal, retire_local), (Bucket::RetireCloud, retire_cloud)]
            .into_iter()
            .flat_map(|(bucket, ids)| ids.into_iter().map(move |id| (bucket, Step::Delete(id))));
        let steps: Vec<(Bucket, Step)> = puts.chain(deletes).collect();

        for (bucket, step) in steps {
            if is_cancelled(cancel.as_ref()) {
                result.cancelled = true;
                break;
            }

            let id = step.id().to_string();
            let strategy = single_store(bucket.target());
            let outcome = match step {
                Step::Put(entity) => self.router.write(entity, strategy).await,
                Step::Delete(id) => self.router.delete(&id, strategy).await,
            };

            match outcome {
                Ok(()) => {
                    crate::metrics::record_migration_entity(bucket.as_str(), true);
                    result.record_success(bucket);
                }
                Err(e) => {
                    crate::metrics::record_migration_entity(bucket.as_str(), false);
                    warn!(id = %id, bucket = bucket.as_str(), error = %e, "Migration write failed");
                    result.failures.push(MigrationFailure {
                        bucket,
                        entity_id: id,
                        error: e,
                    });
                }
            }

            result.processed += 1;
            report_progress(&mut on_progress, result.processed, total);
        }

        if !result.cancelled {
            for case in conflicts {
                if is_cancelled(cancel.as_ref()) {
                    result.cancelled = true;
                    break;
                }
                notify_conflict(&mut on_conflict, &case);
                result.conflicts.push(case);
                result.processed += 1;
                report_progress(&mut on_progress, result.processed, total);
            }
        }

        let outcome = if result.cancelled {
            "cancelled"
        } else if result.failures.is_empty() {
            "completed"
        } else {
            "partial"
        };
        crate::metrics::record_migration_run(outcome, started.elapsed());
        info!(
            outcome,
            processed = result.processed,
            written = result.written(),
            failures = result.failures.len(),
            conflicts = result.conflicts.len(),
            "Migration finished"
        );

        result
    }

    async fn snapshot(&self) -> Result<Vec<KeyGroup>, PersistError> {
        let local = self.router.read_all(Strategy::LocalOnly).await?;
        let cloud = self.router.read_all(Strategy::CloudOnly).await?;

        let mut groups: Vec<KeyGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let sides = local
            .into_iter()
            .map(|e| (StoreTarget::Local, e))
            .chain(cloud.into_iter().map(|e| (StoreTarget::Cloud, e)));

        for (target, entity) in sides {
            let key = self.dedup.identity_key(&entity);
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                groups.push(KeyGroup {
                    key,
                    ..Default::default()
                });
                groups.len() - 1
            });
            match target {
                StoreTarget::Local => groups[slot].local.push(entity),
                StoreTarget::Cloud => groups[slot].cloud.push(entity),
            }
        }

        Ok(groups)
    }

    fn plan_group(&self, plan: &mut MigrationPlan, group: &KeyGroup) {
        let Some(local) = self.representative(plan, &group.key, &group.local) else {
            return;
        };
        let Some(cloud) = self.representative(plan, &group.key, &group.cloud) else {
            return;
        };

        let winner = match (local, cloud) {
            (None, None) => return,
            (Some(only), None) | (None, Some(only)) => only,
            (Some(local), Some(cloud)) => match self.dedup.resolver().resolve_keyed(&group.key, &local, &cloud) {
                Resolution::Resolved { winner, rule } => {
                    if rule != AppliedRule::Identical {
                        plan.resolutions.push(ResolvedConflict {
                            case: ConflictCase::new(group.key.clone(), local, cloud),
                            winner: winner.clone(),
                            rule,
                        });
                    }
                    winner
                }
                Resolution::Deferred(case) => match self.decided_or_queue(plan, case) {
                    Some(winner) => winner,
                    None => return,
                },
            },
        };

        place(plan, &winner, &group.local, StoreTarget::Local);
        place(plan, &winner, &group.cloud, StoreTarget::Cloud);
    }

    /// Fold one store's versions of a key. `None` means the key is blocked on
    /// a user decision; `Some(None)` means the store has no version.
    fn representative(&self, plan: &mut MigrationPlan, key: &str, versions: &[Entity]) -> Option<Option<Entity>> {
        if versions.is_empty() {
            return Some(None);
        }

        let outcome = self.dedup.deduplicate(versions);
        plan.resolutions.extend(outcome.resolved);

        if let Some(case) = outcome.deferred.into_iter().next() {
            debug!(key, "Duplicate versions within one store need a decision");
            return self.decided_or_queue(plan, case).map(Some);
        }
        Some(outcome.unique.into_iter().next())
    }

    fn decided_or_queue(&self, plan: &mut MigrationPlan, case: ConflictCase) -> Option<Entity> {
        let id = self.decisions.enqueue(case.clone());

        match self.decisions.winner(id) {
            Ok(Some(winner)) => {
                self.decisions.remove(id);
                plan.resolutions.push(ResolvedConflict {
                    case,
                    winner: winner.clone(),
                    rule: AppliedRule::UserDecision,
                });
                Some(winner)
            }
            _ => {
                plan.conflicts.push(case);
                None
            }
        }
    }
}

/// Queue whatever `target` needs so its copy of the group becomes `winner`.
fn place(plan: &mut MigrationPlan, winner: &Entity, versions: &[Entity], target: StoreTarget) {
    let (create, update, retire) = match target {
        StoreTarget::Local => (&mut plan.create_local, &mut plan.update_local, &mut plan.retire_local),
        StoreTarget::Cloud => (&mut plan.create_cloud, &mut plan.update_cloud, &mut plan.retire_cloud),
    };

    match versions.iter().find(|e| e.id == winner.id) {
        Some(current) if current.same_version(winner) => {}
        Some(_) => update.push(winner.clone()),
        None if versions.is_empty() => create.push(winner.clone()),
        None => update.push(winner.clone()),
    }

    retire.extend(versions.iter().filter(|e| e.id != winner.id).map(|e| e.id.clone()));
}

fn single_store(target: StoreTarget) -> Strategy {
    match target {
        StoreTarget::Local => Strategy::LocalOnly,
        StoreTarget::Cloud => Strategy::CloudOnly,
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

fn report_progress<P: FnMut(u32, u32)>(on_progress: &mut P, current: u32, total: u32) {
    if catch_unwind(AssertUnwindSafe(|| on_progress(current, total))).is_err() {
        error!(current, total, "Progress callback panicked");
    }
}

fn notify_conflict<C: FnMut(&ConflictCase)>(on_conflict: &mut C, case: &ConflictCase) {
    if catch_unwind(AssertUnwindSafe(|| on_conflict(case))).is_err() {
        error!(key = %case.key, "Conflict callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheLayer;
    use crate::conflict::{ConflictResolver, ConflictStrategy, Decision};
    use crate::connectivity::ManualConnectivity;
    use crate::router::PersistFailure;
    use crate::storage::{InMemoryStore, StoreHandle};
    use crate::transaction::TransactionManager;
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        local: Arc<InMemoryStore>,
        cloud: Arc<InMemoryStore>,
        engine: MigrationEngine,
    }

    fn fixture(strategy: ConflictStrategy) -> Fixture {
        let local = Arc::new(InMemoryStore::new("local"));
        let cloud = Arc::new(InMemoryStore::new("cloud"));
        let router = PersistenceRouter::new(
            Arc::new(CacheLayer::new(64, Duration::from_secs(60))),
            TransactionManager::new(local.clone(), cloud.clone(), 256, Duration::from_secs(5)),
            Arc::new(ManualConnectivity::new(true)),
        );
        let dedup = DeduplicationEngine::new(ConflictResolver::new(strategy));
        let engine = MigrationEngine::new(router, dedup, Arc::new(DecisionQueue::new()));
        Fixture { local, cloud, engine }
    }

    fn entity(id: &str, updated_at: i64) -> Entity {
        Entity::with_timestamps(id, json!({"rev": updated_at}), 1, updated_at)
    }

    async fn seed(store: &InMemoryStore, entities: &[Entity]) {
        for e in entities {
            store.put(e).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_plan_partitions_by_presence() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[entity("only-local", 1), entity("both", 10), entity("same", 5)]).await;
        seed(&f.cloud, &[entity("only-cloud", 1), entity("both", 20), entity("same", 5)]).await;

        let plan = f.engine.plan().await.unwrap();

        assert_eq!(plan.create_cloud, vec![entity("only-local", 1)]);
        assert_eq!(plan.create_local, vec![entity("only-cloud", 1)]);
        assert_eq!(plan.update_local, vec![entity("both", 20)]);
        assert!(plan.update_cloud.is_empty());
        assert_eq!(plan.resolutions.len(), 1);
        assert!(plan.conflicts.is_empty());
    }

    #[tokio::test]
    async fn test_apply_reconciles_and_second_plan_is_empty() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[entity("a", 1), entity("b", 30)]).await;
        seed(&f.cloud, &[entity("b", 20), entity("c", 1)]).await;

        let mut progress = Vec::new();
        let plan = f.engine.plan().await.unwrap();
        let result = f.engine.apply(plan, |c, t| progress.push((c, t)), |_| {}, None).await;

        assert!(result.is_clean());
        assert_eq!(result.written(), 3);
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(f.local.snapshot(), f.cloud.snapshot());
        assert!(f.engine.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copies_differing_only_in_created_at_are_reconciled() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[Entity::with_timestamps("a", json!({"rev": 5}), 3, 5)]).await;
        seed(&f.cloud, &[Entity::with_timestamps("a", json!({"rev": 5}), 1, 5)]).await;

        let plan = f.engine.plan().await.unwrap();
        assert_eq!(plan.update_local.len(), 1);

        let result = f.engine.apply(plan, |_, _| {}, |_| {}, None).await;

        assert!(result.is_clean());
        assert_eq!(f.local.snapshot()["a"].created_at, 1);
        assert!(f.engine.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failures_accumulate_without_aborting() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[entity("a", 1), entity("b", 1)]).await;
        f.cloud.reject_writes_for("a", "invalid");

        let result = f.engine.run(|_, _| {}, |_| {}, None).await.unwrap();

        assert_eq!(result.created_cloud, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].entity_id, "a");
        assert_eq!(result.failures[0].bucket, Bucket::CreateCloud);
        assert!(result.failures[0].error.is_rejected());
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_entities() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[entity("a", 1), entity("b", 1), entity("c", 1)]).await;
        let (tx, rx) = watch::channel(false);

        let plan = f.engine.plan().await.unwrap();
        let result = f
            .engine
            .apply(
                plan,
                |current, _| {
                    if current == 1 {
                        let _ = tx.send(true);
                    }
                },
                |_| {},
                Some(rx),
            )
            .await;

        assert!(result.cancelled);
        assert_eq!(result.processed, 1);
        assert_eq!(f.cloud.len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_callbacks_are_contained() {
        let f = fixture(ConflictStrategy::UserChoice);
        seed(&f.local, &[entity("a", 1), entity("x", 1)]).await;
        seed(&f.cloud, &[entity("x", 2)]).await;

        let result = f
            .engine
            .run(|_, _| panic!("progress bar broke"), |_| panic!("dialog broke"), None)
            .await
            .unwrap();

        assert_eq!(result.created_cloud, 1);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.processed, 2);
    }

    #[tokio::test]
    async fn test_user_choice_round_trip() {
        let f = fixture(ConflictStrategy::UserChoice);
        seed(&f.local, &[entity("x", 10), entity("y", 1)]).await;
        seed(&f.cloud, &[entity("x", 20)]).await;

        let mut seen = Vec::new();
        let result = f.engine.run(|_, _| {}, |case| seen.push(case.key.clone()), None).await.unwrap();

        // The unrelated entity is not blocked
        assert_eq!(result.created_cloud, 1);
        assert_eq!(seen, vec!["x"]);
        assert_eq!(f.local.snapshot()["x"], entity("x", 10));

        let decisions = f.engine.decisions();
        let (id, _) = decisions.pending().into_iter().next().unwrap();
        decisions.decide(id, Decision::KeepLocal).unwrap();

        let plan = f.engine.plan_decided().await.unwrap();
        assert_eq!(plan.update_cloud.len(), 1);
        let result = f.engine.apply(plan, |_, _| {}, |_| {}, None).await;
        assert!(result.is_clean());

        let winner = f.cloud.snapshot()["x"].clone();
        assert_eq!(winner.payload, json!({"rev": 10}));
        assert_eq!(winner.updated_at, 20);
        assert_eq!(f.local.snapshot(), f.cloud.snapshot());
        assert!(f.engine.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decided_conflict_is_used_by_next_plan() {
        let f = fixture(ConflictStrategy::UserChoice);
        seed(&f.local, &[entity("x", 10)]).await;
        seed(&f.cloud, &[entity("x", 20)]).await;

        let first = f.engine.plan().await.unwrap();
        assert_eq!(first.conflicts.len(), 1);
        let id = f.engine.decisions().id_for("x").unwrap();
        f.engine.decisions().decide(id, Decision::KeepCloud).unwrap();

        let second = f.engine.plan().await.unwrap();

        assert!(second.conflicts.is_empty());
        assert_eq!(second.update_local.len(), 1);
        assert_eq!(second.resolutions[0].rule, AppliedRule::UserDecision);
        assert!(f.engine.decisions().id_for("x").is_none());
    }

    #[tokio::test]
    async fn test_custom_identity_retires_superseded_ids() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        let by_title: crate::dedup::IdentityFn =
            Arc::new(|e: &Entity| e.payload["title"].as_str().unwrap_or_default().to_lowercase());
        let engine = MigrationEngine::new(
            f.engine.router().clone(),
            DeduplicationEngine::new(ConflictResolver::default()).with_identity(by_title),
            Arc::new(DecisionQueue::new()),
        );
        seed(&f.local, &[Entity::with_timestamps("l-1", json!({"title": "Groceries"}), 1, 10)]).await;
        seed(&f.cloud, &[Entity::with_timestamps("c-9", json!({"title": "groceries"}), 1, 20)]).await;

        let plan = engine.plan().await.unwrap();
        assert_eq!(plan.update_local.len(), 1);
        assert_eq!(plan.retire_local, vec!["l-1".to_string()]);

        let result = engine.apply(plan, |_, _| {}, |_| {}, None).await;

        assert!(result.is_clean());
        assert_eq!(f.local.snapshot(), f.cloud.snapshot());
        assert!(engine.plan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_one() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        seed(&f.local, &[entity("a", 30), entity("b", 1)]).await;
        seed(&f.cloud, &[entity("a", 10)]).await;

        let winner = f.engine.reconcile_one("a").await.unwrap();

        assert_eq!(winner, Some(entity("a", 30)));
        assert_eq!(f.cloud.snapshot()["a"], entity("a", 30));
        assert!(!f.cloud.snapshot().contains_key("b"));
        assert_eq!(f.engine.reconcile_one("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reconcile_one_blocks_on_user_choice() {
        let f = fixture(ConflictStrategy::UserChoice);
        seed(&f.local, &[entity("a", 30)]).await;
        seed(&f.cloud, &[entity("a", 10)]).await;

        let err = f.engine.reconcile_one("a").await.unwrap_err();
        let PersistFailure::Conflict(ConflictError::Unresolved { key, decision }) = &err.failure else {
            panic!("expected unresolved conflict, got {err:?}");
        };
        assert_eq!(key, "a");

        f.engine.decisions().decide(*decision, Decision::KeepCloud).unwrap();
        let winner = f.engine.reconcile_one("a").await.unwrap().unwrap();

        assert_eq!(winner.payload, json!({"rev": 10}));
        assert_eq!(f.local.snapshot(), f.cloud.snapshot());
    }

    #[tokio::test]
    async fn test_plan_fails_when_a_store_is_down() {
        let f = fixture(ConflictStrategy::LastWriteWins);
        f.cloud.set_online(false);

        let err = f.engine.plan().await.unwrap_err();

        assert_eq!(err.target, StoreTarget::Cloud);
        assert!(err.fallback.is_none());
    }
}
