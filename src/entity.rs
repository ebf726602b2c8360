// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entity data structure.
//!
//! An [`Entity`] is any persisted aggregate (a list, an item, ...) that flows
//! between the local and cloud stores. The engine only cares about its stable
//! id and its timestamps; the domain fields live in an opaque JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A persisted aggregate with a stable id and mutation timestamps.
///
/// # Example
///
/// ```
/// use adaptive_sync::Entity;
/// use serde_json::json;
///
/// let list = Entity::new("list.groceries", json!({"title": "Groceries", "items": []}));
/// assert_eq!(list.id, "list.groceries");
/// assert_eq!(list.created_at, list.updated_at);
///
/// let edited = list.touched(json!({"title": "Groceries", "items": ["milk"]}));
/// assert!(edited.updated_at > list.updated_at);
/// assert_eq!(edited.created_at, list.created_at);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable business identity. Never changes after creation.
    pub id: String,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last mutation timestamp (epoch millis), non-decreasing per store
    pub updated_at: i64,
    /// Domain fields, opaque to the engine
    pub payload: Value,
}

impl Entity {
    /// Create a new entity stamped with the current time.
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            payload,
        }
    }

    /// Create an entity with explicit timestamps (imports, tests, replays).
    pub fn with_timestamps(id: impl Into<String>, payload: Value, created_at: i64, updated_at: i64) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at,
            payload,
        }
    }

    /// Return a new version carrying `payload`.
    ///
    /// `updated_at` strictly advances even when the clock has not moved
    /// (or moved backwards) since the previous version.
    #[must_use]
    pub fn touched(&self, payload: Value) -> Self {
        Self {
            id: self.id.clone(),
            created_at: self.created_at,
            updated_at: now_millis().max(self.updated_at + 1),
            payload,
        }
    }

    /// Hex SHA-256 of the serialized payload.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let bytes = serde_json::to_vec(&self.payload).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// True when both values describe the same version of the same entity:
    /// same id, both timestamps equal and the same content hash.
    #[must_use]
    pub fn same_version(&self, other: &Entity) -> bool {
        self.id == other.id
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
            && self.content_hash() == other.content_hash()
    }
}
