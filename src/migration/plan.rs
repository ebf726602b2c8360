// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Migration plans and results.

use crate::conflict::{ConflictCase, ResolvedConflict};
use crate::entity::Entity;
use crate::router::PersistError;
use crate::storage::StoreTarget;

/// Which part of a plan an entity belongs to, in apply order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    CreateLocal,
    CreateCloud,
    UpdateLocal,
    UpdateCloud,
    RetireLocal,
    RetireCloud,
}

impl Bucket {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateLocal => "create_local",
            Self::CreateCloud => "create_cloud",
            Self::UpdateLocal => "update_local",
            Self::UpdateCloud => "update_cloud",
            Self::RetireLocal => "retire_local",
            Self::RetireCloud => "retire_cloud",
        }
    }

    /// Store the bucket writes to.
    #[must_use]
    pub fn target(self) -> StoreTarget {
        match self {
            Self::CreateLocal | Self::UpdateLocal | Self::RetireLocal => StoreTarget::Local,
            Self::CreateCloud | Self::UpdateCloud | Self::RetireCloud => StoreTarget::Cloud,
        }
    }
}

/// Work needed to reconcile the two stores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationPlan {
    /// Present only in cloud
    pub create_local: Vec<Entity>,
    /// Present only locally
    pub create_cloud: Vec<Entity>,
    /// Resolved winners that differ from the local copy
    pub update_local: Vec<Entity>,
    /// Resolved winners that differ from the cloud copy
    pub update_cloud: Vec<Entity>,
    /// Local ids superseded by a winner with another id
    pub retire_local: Vec<String>,
    /// Cloud ids superseded by a winner with another id
    pub retire_cloud: Vec<String>,
    /// Waiting for a user decision; never written by `apply`
    pub conflicts: Vec<ConflictCase>,
    /// Audit trail of automatic resolutions
    pub resolutions: Vec<ResolvedConflict>,
}

impl MigrationPlan {
    /// True when there is nothing to write and nothing to decide.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.write_count() == 0 && self.conflicts.is_empty()
    }

    /// Entity writes and deletes the plan will attempt.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.create_local.len()
            + self.create_cloud.len()
            + self.update_local.len()
            + self.update_cloud.len()
            + self.retire_local.len()
            + self.retire_cloud.len()
    }

    /// Steps reported through `on_progress`: every write plus every conflict.
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.write_count() + self.conflicts.len()
    }
}

/// A single entity the migration could not write.
#[derive(Debug, Clone)]
pub struct MigrationFailure {
    pub bucket: Bucket,
    pub entity_id: String,
    pub error: PersistError,
}

/// Outcome of applying a plan. Failures never abort the run.
#[derive(Debug, Clone, Default)]
pub struct MigrationResult {
    pub created_local: usize,
    pub created_cloud: usize,
    pub updated_local: usize,
    pub updated_cloud: usize,
    pub retired_local: usize,
    pub retired_cloud: usize,
    pub failures: Vec<MigrationFailure>,
    /// Conflicts skipped and handed back to the caller
    pub conflicts: Vec<ConflictCase>,
    /// Steps completed before finishing or being cancelled
    pub processed: u32,
    pub total: u32,
    pub cancelled: bool,
}

impl MigrationResult {
    /// Successful writes across all buckets.
    #[must_use]
    pub fn written(&self) -> usize {
        self.created_local
            + self.created_cloud
            + self.updated_local
            + self.updated_cloud
            + self.retired_local
            + self.retired_cloud
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.conflicts.is_empty() && !self.cancelled
    }

    pub(crate) fn record_success(&mut self, bucket: Bucket) {
        let counter = match bucket {
            Bucket::CreateLocal => &mut self.created_local,
            Bucket::CreateCloud => &mut self.created_cloud,
            Bucket::UpdateLocal => &mut self.updated_local,
            Bucket::UpdateCloud => &mut self.updated_cloud,
            Bucket::RetireLocal => &mut self.retired_local,
            Bucket::RetireCloud => &mut self.retired_cloud,
        };
        *counter += 1;
    }
}
