// # guardian-core
//
// Core library for the Guardian network-access reconciliation daemon.
//
// ## Architecture Overview
//
// This library keeps a router's firewall and a local DNS resolver in
// agreement with an authoritative device registry:
// - **RouterClient**: Trait for the router's client-management API
// - **RegistryStore**: Trait for durable registry storage
// - **ResolverControl**: Trait for reloading the DNS resolver
// - **HostnameLookup**: Trait for reverse-resolving device names
// - **RegistryHandle**: Serialized load-modify-save access to the registry
// - **ScanEngine**: Polls connected clients and applies the device policy
// - **FirewallSync / DnsOverrideSync**: Drive each enforcement surface to the
//   registry's desired state
// - **SyncCoordinator / SyncWorker**: Queue and run resync requests
//
// ## Design Principles
//
// 1. **Single Source of Truth**: Only registry writers change authorization;
//    enforcement components read snapshots
// 2. **Idempotent Enforcement**: Every sync re-derives the full desired state
// 3. **Failure Isolation**: One device's failure never aborts a batch, and a
//    failed fetch never touches the registry
// 4. **Library-First**: All core functionality can be used as a library

pub mod audit;
pub mod config;
pub mod engine;
pub mod error;
pub mod lookup;
pub mod model;
pub mod operator;
pub mod registry;
pub mod store;
pub mod sync;
pub mod traits;

// Re-export core types for convenience
pub use audit::{AuditEntry, AuditLog, Surface};
pub use config::GuardianConfig;
pub use engine::{EngineEvent, ScanEngine, TickOutcome, TickSummary};
pub use error::{Error, Result};
pub use lookup::SystemHostnameLookup;
pub use model::{DeviceRecord, DeviceStatus, MacAddress, Registry};
pub use registry::RegistryHandle;
pub use store::{FileRegistryStore, MemoryRegistryStore};
pub use sync::{
    CommandReloader, DnsOverrideSync, FirewallSync, SyncCoordinator, SyncQueue, SyncReport, SyncScope,
    SyncWorker,
};
pub use traits::{AuthContext, ClientInfo, HostnameLookup, RegistryStore, ResolverControl, RouterClient};
