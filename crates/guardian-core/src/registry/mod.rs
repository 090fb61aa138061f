//! Serialized access to the device registry
//!
//! Every registry writer (the scan engine, operator actions, bulk import)
//! goes through a [`RegistryHandle`], which wraps each load-modify-save cycle
//! in two guards:
//!
//! - an in-process async mutex, so tasks inside one daemon never interleave
//! - the store's [`lease`](crate::traits::RegistryStore::lease), so the daemon
//!   and one-shot operator invocations never interleave either
//!
//! ## Usage
//!
//! ```rust,ignore
//! use guardian_core::registry::RegistryHandle;
//!
//! let handle = RegistryHandle::new(store);
//! let added = handle
//!     .update(|registry| {
//!         registry.insert(mac, record);
//!         Ok(1)
//!     })
//!     .await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::Registry;
use crate::traits::RegistryStore;

/// Shared, serialized handle to a [`RegistryStore`]
///
/// Cloning the handle shares the same guard.
#[derive(Clone)]
pub struct RegistryHandle {
    store: Arc<dyn RegistryStore>,
    guard: Arc<Mutex<()>>,
}

impl RegistryHandle {
    /// Wrap a store
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self {
            store,
            guard: Arc::new(Mutex::new(())),
        }
    }

    /// Read a consistent copy of the registry
    ///
    /// Readers take the same guards as writers so they never observe a
    /// half-applied cycle from another task.
    pub async fn snapshot(&self) -> Result<Registry> {
        let _local = self.guard.lock().await;
        let _lease = self.store.lease().await?;
        self.store.load().await
    }

    /// Run one load-modify-save cycle
    ///
    /// `apply` mutates a freshly loaded registry. The result is saved only if
    /// `apply` succeeded and the registry actually changed; otherwise the
    /// stored registry is left untouched.
    pub async fn update<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut Registry) -> Result<T>,
    {
        let _local = self.guard.lock().await;
        let _lease = self.store.lease().await?;

        let original = self.store.load().await?;
        let mut working = original.clone();
        let outcome = apply(&mut working)?;

        if working != original {
            self.store.save(&working).await?;
            tracing::debug!("Registry saved: {} devices", working.len());
        } else {
            tracing::trace!("Registry unchanged, skipping save");
        }

        Ok(outcome)
    }

    /// Archive the registry and replace it with an empty one
    pub async fn reset(&self) -> Result<Option<PathBuf>> {
        let _local = self.guard.lock().await;
        let _lease = self.store.lease().await?;
        self.store.archive().await
    }
}

impl std::fmt::Debug for RegistryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryHandle").finish_non_exhaustive()
    }
}
