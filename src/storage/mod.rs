// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store adapters.
//!
//! The engine talks to exactly two stores, `local` and `cloud`, through the
//! [`StoreHandle`](traits::StoreHandle) capability. Concrete wire formats
//! (SQL dialect, REST payloads) belong to the adapters, not to this crate.

pub mod traits;
pub mod memory;

pub use memory::InMemoryStore;
pub use traits::{StoreError, StoreHandle, StoreTarget};
