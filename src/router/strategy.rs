// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};

use crate::storage::StoreTarget;

/// How a router call picks its store(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    LocalOnly,
    CloudOnly,
    /// Local, falling back to cloud when local is unavailable
    LocalFirst,
    /// Cloud, falling back to local when cloud is unavailable
    CloudFirst,
    /// Offline: local only. Online: cloud first, written through to local.
    #[default]
    Adaptive,
}

impl Strategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::CloudOnly => "cloud_only",
            Self::LocalFirst => "local_first",
            Self::CloudFirst => "cloud_first",
            Self::Adaptive => "adaptive",
        }
    }

    /// Stores to use given current connectivity.
    #[must_use]
    pub fn route(self, online: bool) -> Route {
        match self {
            Self::LocalOnly => Route::single(StoreTarget::Local),
            Self::CloudOnly => Route::single(StoreTarget::Cloud),
            Self::LocalFirst => Route::with_fallback(StoreTarget::Local),
            Self::CloudFirst => Route::with_fallback(StoreTarget::Cloud),
            Self::Adaptive if online => Route {
                write_through: Some(StoreTarget::Local),
                ..Route::with_fallback(StoreTarget::Cloud)
            },
            Self::Adaptive => Route::single(StoreTarget::Local),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved store order for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub primary: StoreTarget,
    /// Tried when the primary is unavailable
    pub fallback: Option<StoreTarget>,
    /// Best-effort copy of successful writes
    pub write_through: Option<StoreTarget>,
}

impl Route {
    fn single(primary: StoreTarget) -> Self {
        Self {
            primary,
            fallback: None,
            write_through: None,
        }
    }

    fn with_fallback(primary: StoreTarget) -> Self {
        Self {
            primary,
            fallback: Some(primary.other()),
            write_through: None,
        }
    }
}
