use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use dashmap::DashMap;
use crate::entity::Entity;
use super::traits::{StoreHandle, StoreError};

/// DashMap-backed store with fault controls.
///
/// Serves as the on-device store in tests and demos, and as a stand-in for
/// the cloud when exercising partial connectivity: it can be switched
/// offline, slowed down, or told to reject writes for specific ids.
pub struct InMemoryStore {
    name: String,
    data: DashMap<String, Entity>,
    online: AtomicBool,
    latency_ms: AtomicU64,
    /// id -> rejection reason
    rejected: DashMap<String, String>,
    writes: AtomicU64,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: DashMap::new(),
            online: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            rejected: DashMap::new(),
            writes: AtomicU64::new(0),
        }
    }

    /// Create a store pre-populated with `entities` (bypasses fault controls).
    #[must_use]
    pub fn with_entities(name: impl Into<String>, entities: impl IntoIterator<Item = Entity>) -> Self {
        let store = Self::new(name);
        for entity in entities {
            store.data.insert(entity.id.clone(), entity);
        }
        store
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current entity count
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entities
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Toggle reachability. Offline stores answer every call with `Unavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every put/delete touching `id` fail with `Rejected(reason)`.
    pub fn reject_writes_for(&self, id: impl Into<String>, reason: impl Into<String>) {
        self.rejected.insert(id.into(), reason.into());
    }

    pub fn clear_rejections(&self) {
        self.rejected.clear();
    }

    /// Number of successful mutations since creation.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Ordered copy of the contents (bypasses fault controls).
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Entity> {
        self.data
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("{} is offline", self.name)))
        }
    }

    fn check_rejected(&self, id: &str) -> Result<(), StoreError> {
        match self.rejected.get(id) {
            Some(reason) => Err(StoreError::Rejected(reason.value().clone())),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

#[async_trait]
impl StoreHandle for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Entity>, StoreError> {
        self.gate().await?;
        Ok(self.data.get(id).map(|r| r.value().clone()))
    }

    async fn list(&self) -> Result<Vec<Entity>, StoreError> {
        self.gate().await?;
        let mut entities: Vec<Entity> = self.data.iter().map(|r| r.value().clone()).collect();
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    async fn put(&self, entity: &Entity) -> Result<(), StoreError> {
        self.gate().await?;
        self.check_rejected(&entity.id)?;
        self.data.insert(entity.id.clone(), entity.clone());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.gate().await?;
        self.check_rejected(id)?;
        if self.data.remove(id).is_some() {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
