// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict resolution between two versions of one logical entity.
//!
//! Resolution is pure: inputs are borrowed immutably and every outcome is a
//! freshly built value. The same inputs and strategy always produce the same
//! winner.
//!
//! # Strategies
//!
//! | Strategy          | Winner                                                     |
//! |-------------------|------------------------------------------------------------|
//! | `LastWriteWins`   | larger `updated_at`, cloud on ties                         |
//! | `MergeCompatible` | field-level merge (see [`merge`]), else `LastWriteWins`    |
//! | `CloudPriority`   | cloud                                                      |
//! | `LocalPriority`   | local                                                      |
//! | `UserChoice`      | none yet: the case is deferred to a [`DecisionQueue`]      |
//!
//! # Example
//!
//! ```
//! use adaptive_sync::{ConflictResolver, ConflictStrategy, Entity, Resolution};
//! use serde_json::json;
//!
//! let local = Entity::with_timestamps("1", json!({"title": "old"}), 1, 10);
//! let cloud = Entity::with_timestamps("1", json!({"title": "new"}), 1, 20);
//!
//! let resolver = ConflictResolver::new(ConflictStrategy::LastWriteWins);
//! match resolver.resolve(&local, &cloud) {
//!     Resolution::Resolved { winner, .. } => assert_eq!(winner, cloud),
//!     Resolution::Deferred(_) => unreachable!(),
//! }
//! ```

pub mod merge;
mod decisions;

pub use decisions::{Decision, DecisionId, DecisionQueue};

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::entity::Entity;

/// Policy for choosing between divergent versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    #[default]
    LastWriteWins,
    MergeCompatible,
    CloudPriority,
    LocalPriority,
    UserChoice,
}

impl ConflictStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastWriteWins => "last_write_wins",
            Self::MergeCompatible => "merge_compatible",
            Self::CloudPriority => "cloud_priority",
            Self::LocalPriority => "local_priority",
            Self::UserChoice => "user_choice",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two differing versions of the same logical entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictCase {
    /// Identity key shared by both versions
    pub key: String,
    pub local: Entity,
    pub cloud: Entity,
}

impl ConflictCase {
    pub fn new(key: impl Into<String>, local: Entity, cloud: Entity) -> Self {
        Self {
            key: key.into(),
            local,
            cloud,
        }
    }
}

/// The rule that actually produced a winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppliedRule {
    /// Both sides were the same version
    Identical,
    LastWriteWins,
    Merged,
    /// `MergeCompatible` could not merge and fell back to last-write-wins
    MergeFallback,
    CloudPriority,
    LocalPriority,
    /// Picked by the user through the decision queue
    UserDecision,
}

impl AppliedRule {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identical => "identical",
            Self::LastWriteWins => "last_write_wins",
            Self::Merged => "merged",
            Self::MergeFallback => "merge_fallback",
            Self::CloudPriority => "cloud_priority",
            Self::LocalPriority => "local_priority",
            Self::UserDecision => "user_decision",
        }
    }
}

/// A conflict with its winner and the rule that chose it (audit trail).
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConflict {
    pub case: ConflictCase,
    pub winner: Entity,
    pub rule: AppliedRule,
}

/// Outcome of a single resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved { winner: Entity, rule: AppliedRule },
    /// Needs an external decision before this entity can be reconciled
    Deferred(ConflictCase),
}

impl Resolution {
    /// Winner when resolved synchronously.
    #[must_use]
    pub fn winner(&self) -> Option<&Entity> {
        match self {
            Self::Resolved { winner, .. } => Some(winner),
            Self::Deferred(_) => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConflictError {
    #[error("Conflict for '{key}' awaits a user decision ({decision})")]
    Unresolved { key: String, decision: DecisionId },
    #[error("Unknown decision {0}")]
    UnknownDecision(DecisionId),
    #[error("Replacement '{id}' does not belong to conflict '{key}' ({decision})")]
    ForeignReplacement { key: String, id: String, decision: DecisionId },
}

/// Caller-supplied merge for fields outside the generic contract.
///
/// Receives the dotted field path and both values; `None` declines, which
/// makes the whole resolution fall back to last-write-wins.
pub type FieldMerger = Arc<dyn Fn(&str, &Value, &Value) -> Option<Value> + Send + Sync>;

/// Resolves conflicts with one configured strategy.
#[derive(Clone, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    field_merger: Option<FieldMerger>,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("strategy", &self.strategy)
            .field("field_merger", &self.field_merger.is_some())
            .finish()
    }
}

impl ConflictResolver {
    #[must_use]
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self {
            strategy,
            field_merger: None,
        }
    }

    #[must_use]
    pub fn with_field_merger(mut self, merger: FieldMerger) -> Self {
        self.field_merger = Some(merger);
        self
    }

    #[must_use]
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve using `cloud.id` as the case key.
    #[must_use]
    pub fn resolve(&self, local: &Entity, cloud: &Entity) -> Resolution {
        self.resolve_keyed(&cloud.id, local, cloud)
    }

    /// Resolve two versions sharing identity `key`.
    #[must_use]
    pub fn resolve_keyed(&self, key: &str, local: &Entity, cloud: &Entity) -> Resolution {
        if local.same_version(cloud) {
            return Resolution::Resolved {
                winner: cloud.clone(),
                rule: AppliedRule::Identical,
            };
        }

        let resolution = match self.strategy {
            ConflictStrategy::LastWriteWins => Resolution::Resolved {
                winner: last_write_wins(local, cloud).clone(),
                rule: AppliedRule::LastWriteWins,
            },
            ConflictStrategy::MergeCompatible => self.merge(local, cloud),
            ConflictStrategy::CloudPriority => Resolution::Resolved {
                winner: cloud.clone(),
                rule: AppliedRule::CloudPriority,
            },
            ConflictStrategy::LocalPriority => Resolution::Resolved {
                winner: local.clone(),
                rule: AppliedRule::LocalPriority,
            },
            ConflictStrategy::UserChoice => {
                Resolution::Deferred(ConflictCase::new(key, local.clone(), cloud.clone()))
            }
        };

        if let Resolution::Resolved { rule, .. } = &resolution {
            debug!(key, rule = rule.as_str(), "Conflict resolved");
            crate::metrics::record_conflict(rule.as_str());
        }
        resolution
    }

    fn merge(&self, local: &Entity, cloud: &Entity) -> Resolution {
        let local_newer = local.updated_at > cloud.updated_at;
        let base = last_write_wins(local, cloud);

        match merge::merge_values("", &local.payload, &cloud.payload, local_newer, self.field_merger.as_ref()) {
            Some(payload) => Resolution::Resolved {
                winner: Entity {
                    id: base.id.clone(),
                    created_at: local.created_at.min(cloud.created_at),
                    updated_at: local.updated_at.max(cloud.updated_at),
                    payload,
                },
                rule: AppliedRule::Merged,
            },
            None => Resolution::Resolved {
                winner: base.clone(),
                rule: AppliedRule::MergeFallback,
            },
        }
    }
}

/// Newer of the two, cloud on ties.
fn last_write_wins<'a>(local: &'a Entity, cloud: &'a Entity) -> &'a Entity {
    if local.updated_at > cloud.updated_at {
        local
    } else {
        cloud
    }
}

/// Resolve `local` against `cloud` with `strategy` and no field merger.
#[must_use]
pub fn resolve(local: &Entity, cloud: &Entity, strategy: ConflictStrategy) -> Resolution {
    ConflictResolver::new(strategy).resolve(local, cloud)
}
