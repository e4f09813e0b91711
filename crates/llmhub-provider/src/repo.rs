use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;

use crate::provider::Provider;

/// Read side of the provider registry. Persistence lives behind this seam.
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Enabled, non-tombstoned providers.
    async fn list_enabled(&self) -> Vec<Provider>;
    async fn by_id(&self, id: i64) -> Option<Provider>;
}

/// Snapshot-backed in-memory repository. Writers replace the whole table;
/// readers never block.
pub struct MemoryProviderRepository {
    snapshot: ArcSwap<Vec<Provider>>,
}

impl MemoryProviderRepository {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(providers),
        }
    }

    pub fn replace(&self, providers: Vec<Provider>) {
        self.snapshot.store(Arc::new(providers));
    }
}

#[async_trait]
impl ProviderRepository for MemoryProviderRepository {
    async fn list_enabled(&self) -> Vec<Provider> {
        self.snapshot
            .load()
            .iter()
            .filter(|provider| provider.enabled && !provider.is_tombstoned())
            .cloned()
            .collect()
    }

    async fn by_id(&self, id: i64) -> Option<Provider> {
        self.snapshot
            .load()
            .iter()
            .find(|provider| provider.id == id)
            .cloned()
    }
}
