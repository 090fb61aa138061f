// # Registry Store Trait
//
// Defines the interface for durable device registry storage.
//
// ## Purpose
//
// The registry store is the single source of truth for device authorization:
// - Whole-registry load and save (read-modify-write by callers)
// - Atomic replacement, so a crash mid-write never truncates the registry
// - Archival for the reset-all operation
//
// ## Implementations
//
// - File-based: pretty-printed JSON keyed by MAC (`store::FileRegistryStore`)
// - In-memory: tests and dry runs (`store::MemoryRegistryStore`)
//
// ## Usage
//
// ```rust,ignore
// use guardian_core::RegistryStore;
//
// let mut registry = store.load().await?;
// // ... mutate ...
// store.save(&registry).await?;
// ```
//
// Callers should go through `RegistryHandle`, which serializes
// load-modify-save cycles instead of calling the store directly.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::model::Registry;

/// Opaque guard held for the duration of one load-modify-save cycle
///
/// Dropping the lease releases whatever exclusion the store provides.
pub type StoreLease = Box<dyn Send + Sync>;

/// Trait for registry store implementations
///
/// # Trust Level: Trusted (Core Component)
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Provide cross-process exclusion through [`RegistryStore::lease`]
/// - ✅ Keep a last-known-good copy for corruption recovery
///
/// ## Forbidden Capabilities
/// - ❌ Decide device policy (owned by `ScanEngine` and operator actions)
/// - ❌ Talk to the router or the resolver (owned by the sync components)
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the full registry
    ///
    /// A missing backing store yields an empty registry.
    ///
    /// # Returns
    ///
    /// - `Ok(Registry)`: The current registry
    /// - `Err(Error::Persistence)`: Storage could not be read
    async fn load(&self) -> Result<Registry, crate::Error>;

    /// Replace the stored registry atomically
    ///
    /// Either the new content is fully visible afterwards or the previous
    /// content is left intact.
    async fn save(&self, registry: &Registry) -> Result<(), crate::Error>;

    /// Archive the current registry and replace it with an empty one
    ///
    /// # Returns
    ///
    /// - `Ok(Some(path))`: Location of the archived copy
    /// - `Ok(None)`: Nothing to archive, or the store keeps no archives
    async fn archive(&self) -> Result<Option<PathBuf>, crate::Error>;

    /// Acquire exclusion for a load-modify-save cycle
    ///
    /// The default provides no exclusion beyond the caller's own locking.
    async fn lease(&self) -> Result<StoreLease, crate::Error> {
        Ok(Box::new(()))
    }
}
