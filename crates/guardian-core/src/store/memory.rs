// # Memory Registry Store
//
// In-memory implementation of RegistryStore.
//
// ## Purpose
//
// Provides a simple, fast registry store that doesn't persist across
// restarts. Useful for testing and for dry runs against a real router.
//
// ## Crash Behavior
//
// - All devices are lost on restart/crash
// - The next start bootstraps again and approves whatever is connected
// - Archives are kept in memory only

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::Error;
use crate::model::Registry;
use crate::traits::registry_store::RegistryStore;

/// In-memory registry store implementation
///
/// Stores the registry behind a RwLock and counts saves, so callers can
/// check that unchanged cycles do not write.
///
/// # Example
///
/// ```rust,no_run
/// use guardian_core::store::MemoryRegistryStore;
/// use guardian_core::traits::RegistryStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryRegistryStore::new();
///
///     let registry = store.load().await?;
///     assert!(registry.is_empty());
///     store.save(&registry).await?;
///     assert_eq!(store.save_count(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistryStore {
    inner: Arc<RwLock<Registry>>,
    archives: Arc<RwLock<Vec<Registry>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryRegistryStore {
    /// Create a new empty memory registry store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `registry`
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
            ..Self::default()
        }
    }

    /// Current contents without going through the trait
    pub async fn current(&self) -> Registry {
        self.inner.read().await.clone()
    }

    /// Number of `save` calls so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Registries archived by `archive`, oldest first
    pub async fn archived(&self) -> Vec<Registry> {
        self.archives.read().await.clone()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> Result<Registry, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, registry: &Registry) -> Result<(), Error> {
        *self.inner.write().await = registry.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn archive(&self) -> Result<Option<PathBuf>, Error> {
        let previous = std::mem::take(&mut *self.inner.write().await);
        self.archives.write().await.push(previous);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceRecord, DeviceStatus, MacAddress};

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryRegistryStore::new();
        assert!(store.load().await.unwrap().is_empty());

        let mut registry = Registry::new();
        registry.insert(
            mac("aa:bb:cc:dd:ee:01"),
            DeviceRecord::discovered("10.0.0.5", "laptop", DeviceStatus::Approved),
        );
        store.save(&registry).await.unwrap();

        assert_eq!(store.load().await.unwrap(), registry);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_archive() {
        let mut registry = Registry::new();
        registry.insert(
            mac("aa:bb:cc:dd:ee:02"),
            DeviceRecord::discovered("10.0.0.9", "tv", DeviceStatus::Blocked),
        );
        let store = MemoryRegistryStore::with_registry(registry.clone());

        assert!(store.archive().await.unwrap().is_none());
        assert!(store.current().await.is_empty());
        assert_eq!(store.archived().await, vec![registry]);
    }
}
