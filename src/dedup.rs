// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Duplicate detection for entity collections.
//!
//! Entities sharing an identity key are folded into a single representative
//! through the [`ConflictResolver`]. The identity defaults to `entity.id`;
//! callers with business keys (for example a normalized title) plug in their
//! own [`IdentityFn`].

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::conflict::{AppliedRule, ConflictCase, ConflictResolver, Resolution, ResolvedConflict};
use crate::entity::Entity;

/// Maps an entity to the key that identifies its logical record.
pub type IdentityFn = Arc<dyn Fn(&Entity) -> String + Send + Sync>;

/// Result of a deduplication pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    /// One representative per distinct key, in first-seen order
    pub unique: Vec<Entity>,
    /// Size of the group behind each entry of `unique`
    pub group_sizes: Vec<usize>,
    /// Reductions that chose a winner between differing values
    pub resolved: Vec<ResolvedConflict>,
    /// Reductions waiting for a user decision
    pub deferred: Vec<ConflictCase>,
}

impl DedupOutcome {
    /// Entities absorbed into another member of their group.
    #[must_use]
    pub fn absorbed(&self) -> usize {
        self.group_sizes.iter().map(|size| size.saturating_sub(1)).sum()
    }
}

#[derive(Clone)]
pub struct DeduplicationEngine {
    resolver: ConflictResolver,
    identity: IdentityFn,
}

impl std::fmt::Debug for DeduplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeduplicationEngine")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl DeduplicationEngine {
    /// Engine keyed by `entity.id`.
    pub fn new(resolver: ConflictResolver) -> Self {
        Self {
            resolver,
            identity: Arc::new(|entity: &Entity| entity.id.clone()),
        }
    }

    #[must_use]
    pub fn with_identity(mut self, identity: IdentityFn) -> Self {
        self.identity = identity;
        self
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn identity_key(&self, entity: &Entity) -> String {
        (self.identity)(entity)
    }

    /// Group by identity key and fold each group into one representative.
    ///
    /// Within a group the running winner plays the local role and the next
    /// entity the cloud role. A deferred reduction keeps the running winner.
    pub fn deduplicate(&self, entities: &[Entity]) -> DedupOutcome {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Entity>> = HashMap::new();

        for entity in entities {
            let key = self.identity_key(entity);
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(entity);
        }

        let mut outcome = DedupOutcome::default();

        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            let Some((first, rest)) = group.split_first() else {
                continue;
            };

            let mut acc = (*first).clone();
            for next in rest {
                match self.resolver.resolve_keyed(&key, &acc, next) {
                    Resolution::Resolved { winner, rule } => {
                        if rule != AppliedRule::Identical {
                            outcome.resolved.push(ResolvedConflict {
                                case: ConflictCase::new(key.clone(), acc, (*next).clone()),
                                winner: winner.clone(),
                                rule,
                            });
                        }
                        acc = winner;
                    }
                    Resolution::Deferred(case) => outcome.deferred.push(case),
                }
            }

            if group.len() > 1 {
                debug!(key = %key, group = group.len(), "Folded duplicate group");
            }
            outcome.group_sizes.push(group.len());
            outcome.unique.push(acc);
        }

        outcome
    }
}
