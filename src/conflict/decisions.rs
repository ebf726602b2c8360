// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue of conflicts waiting for a user decision.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{AppliedRule, ConflictCase, ConflictError, ResolvedConflict};
use crate::entity::Entity;

/// Handle for one queued conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DecisionId(pub u64);

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decision-{}", self.0)
    }
}

/// What the user picked.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    KeepLocal,
    KeepCloud,
    /// Use a hand-edited version instead of either side
    Replace(Entity),
}

#[derive(Debug)]
struct Entry {
    case: ConflictCase,
    decision: Option<Decision>,
}

/// Pending and decided user-choice conflicts, keyed by [`DecisionId`].
///
/// A key has at most one entry. Re-queueing the same key (for example when
/// a second migration plan runs before the user answered) keeps the original
/// id; if either version changed meanwhile, any earlier answer is discarded.
#[derive(Debug, Default)]
pub struct DecisionQueue {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<DecisionId, Entry>>,
}

impl DecisionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, case: ConflictCase) -> DecisionId {
        let mut entries = self.entries.lock();

        let existing = entries
            .iter()
            .find(|(_, entry)| entry.case.key == case.key)
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => {
                if let Some(entry) = entries.get_mut(&id) {
                    // An answer stays valid only while both versions are unchanged.
                    if entry.case != case {
                        debug!(key = %case.key, decision = %id, "Refreshing queued conflict");
                        entry.case = case;
                        entry.decision = None;
                    }
                }
                id
            }
            None => {
                let id = DecisionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
                info!(key = %case.key, decision = %id, "Conflict queued for user decision");
                entries.insert(id, Entry { case, decision: None });
                id
            }
        };

        crate::metrics::set_pending_decisions(Self::count_pending(&entries));
        id
    }

    /// Undecided conflicts in queue order.
    pub fn pending(&self) -> Vec<(DecisionId, ConflictCase)> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.decision.is_none())
            .map(|(id, entry)| (*id, entry.case.clone()))
            .collect()
    }

    /// Id of the queued conflict for `key`, decided or not.
    pub fn id_for(&self, key: &str) -> Option<DecisionId> {
        self.entries
            .lock()
            .iter()
            .find(|(_, entry)| entry.case.key == key)
            .map(|(id, _)| *id)
    }

    /// Record the user's answer. Deciding twice overwrites the first answer.
    ///
    /// A [`Decision::Replace`] must carry the id of one of the two versions.
    pub fn decide(&self, id: DecisionId, decision: Decision) -> Result<(), ConflictError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(ConflictError::UnknownDecision(id))?;

        if let Decision::Replace(replacement) = &decision {
            if replacement.id != entry.case.local.id && replacement.id != entry.case.cloud.id {
                return Err(ConflictError::ForeignReplacement {
                    key: entry.case.key.clone(),
                    id: replacement.id.clone(),
                    decision: id,
                });
            }
        }

        info!(key = %entry.case.key, decision = %id, "Conflict decided");
        entry.decision = Some(decision);

        crate::metrics::set_pending_decisions(Self::count_pending(&entries));
        Ok(())
    }

    /// Winner for a decided conflict, `None` while still pending.
    pub fn winner(&self, id: DecisionId) -> Result<Option<Entity>, ConflictError> {
        let entries = self.entries.lock();
        let entry = entries.get(&id).ok_or(ConflictError::UnknownDecision(id))?;
        Ok(entry
            .decision
            .as_ref()
            .map(|decision| decided_winner(&entry.case, decision)))
    }

    /// Drop a conflict whose winner has been consumed.
    pub fn remove(&self, id: DecisionId) -> Option<ConflictCase> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(&id).map(|entry| entry.case);
        crate::metrics::set_pending_decisions(Self::count_pending(&entries));
        removed
    }

    /// Remove every decided conflict and return its resolution.
    pub fn take_decided(&self) -> Vec<ResolvedConflict> {
        let mut entries = self.entries.lock();

        let decided: Vec<DecisionId> = entries
            .iter()
            .filter(|(_, entry)| entry.decision.is_some())
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(decided.len());
        for id in decided {
            if let Some(Entry { case, decision: Some(decision) }) = entries.remove(&id) {
                let winner = decided_winner(&case, &decision);
                crate::metrics::record_conflict(AppliedRule::UserDecision.as_str());
                out.push(ResolvedConflict {
                    case,
                    winner,
                    rule: AppliedRule::UserDecision,
                });
            }
        }
        out
    }

    /// Undecided conflicts.
    pub fn len(&self) -> usize {
        Self::count_pending(&self.entries.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_pending(entries: &BTreeMap<DecisionId, Entry>) -> usize {
        entries.values().filter(|entry| entry.decision.is_none()).count()
    }
}

/// The picked version, re-stamped so neither store sees `updated_at` go back.
fn decided_winner(case: &ConflictCase, decision: &Decision) -> Entity {
    let mut updated_at = case.local.updated_at.max(case.cloud.updated_at);
    let mut winner = match decision {
        Decision::KeepLocal => case.local.clone(),
        Decision::KeepCloud => case.cloud.clone(),
        Decision::Replace(entity) => {
            updated_at = updated_at.max(entity.updated_at);
            entity.clone()
        }
    };
    winner.updated_at = updated_at;
    winner.created_at = winner.created_at.min(case.local.created_at.min(case.cloud.created_at));
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn case(key: &str) -> ConflictCase {
        ConflictCase::new(
            key,
            Entity::with_timestamps(key, json!({"side": "local"}), 5, 30),
            Entity::with_timestamps(key, json!({"side": "cloud"}), 3, 20),
        )
    }

    #[test]
    fn test_enqueue_and_pending() {
        let queue = DecisionQueue::new();

        let a = queue.enqueue(case("a"));
        let b = queue.enqueue(case("b"));

        assert_ne!(a, b);
        assert_eq!(queue.len(), 2);
        let keys: Vec<_> = queue.pending().into_iter().map(|(_, c)| c.key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_requeue_same_key_keeps_id() {
        let queue = DecisionQueue::new();

        let first = queue.enqueue(case("a"));
        let second = queue.enqueue(case("a"));

        assert_eq!(first, second);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.id_for("a"), Some(first));
    }

    #[test]
    fn test_requeue_keeps_answer_until_versions_change() {
        let queue = DecisionQueue::new();
        let id = queue.enqueue(case("a"));
        queue.decide(id, Decision::KeepLocal).unwrap();

        queue.enqueue(case("a"));
        assert!(queue.winner(id).unwrap().is_some());

        let mut changed = case("a");
        changed.cloud.updated_at = 50;
        queue.enqueue(changed);
        assert!(queue.winner(id).unwrap().is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove() {
        let queue = DecisionQueue::new();
        let id = queue.enqueue(case("a"));

        assert_eq!(queue.remove(id).map(|c| c.key), Some("a".to_string()));
        assert!(queue.is_empty());
        assert!(queue.remove(id).is_none());
    }

    #[test]
    fn test_decide_unknown_id() {
        let queue = DecisionQueue::new();

        let err = queue.decide(DecisionId(42), Decision::KeepLocal).unwrap_err();

        assert_eq!(err, ConflictError::UnknownDecision(DecisionId(42)));
    }

    #[test]
    fn test_keep_cloud_is_restamped() {
        let queue = DecisionQueue::new();
        let id = queue.enqueue(case("a"));

        assert_eq!(queue.winner(id).unwrap(), None);
        queue.decide(id, Decision::KeepCloud).unwrap();

        let winner = queue.winner(id).unwrap().unwrap();
        assert_eq!(winner.payload, json!({"side": "cloud"}));
        assert_eq!(winner.updated_at, 30);
        assert_eq!(winner.created_at, 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_replace_uses_given_payload() {
        let queue = DecisionQueue::new();
        let id = queue.enqueue(case("a"));
        let edited = Entity::with_timestamps("a", json!({"side": "both"}), 5, 40);

        queue.decide(id, Decision::Replace(edited)).unwrap();

        let winner = queue.winner(id).unwrap().unwrap();
        assert_eq!(winner.payload, json!({"side": "both"}));
        assert_eq!(winner.updated_at, 40);
    }

    #[test]
    fn test_replace_with_foreign_id_is_rejected() {
        let queue = DecisionQueue::new();
        let id = queue.enqueue(case("a"));
        let foreign = Entity::with_timestamps("b", json!({"side": "both"}), 5, 40);

        let err = queue.decide(id, Decision::Replace(foreign)).unwrap_err();

        assert!(matches!(err, ConflictError::ForeignReplacement { ref id, .. } if id == "b"));
        assert_eq!(queue.len(), 1, "still pending");
        assert!(queue.winner(id).unwrap().is_none());
    }

    #[test]
    fn test_take_decided_leaves_pending() {
        let queue = DecisionQueue::new();
        let a = queue.enqueue(case("a"));
        let _b = queue.enqueue(case("b"));
        queue.decide(a, Decision::KeepLocal).unwrap();

        let decided = queue.take_decided();

        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].case.key, "a");
        assert_eq!(decided[0].rule, AppliedRule::UserDecision);
        assert_eq!(decided[0].winner.payload, json!({"side": "local"}));
        assert_eq!(queue.len(), 1);
        assert!(queue.take_decided().is_empty());
        assert!(queue.winner(a).is_err());
    }
}
