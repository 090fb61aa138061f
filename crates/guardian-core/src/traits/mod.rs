//! Core traits for the Guardian system
//!
//! This module defines the seams between the reconciliation core and the
//! outside world.
//!
//! - [`RouterClient`]: Query and command the router's client-management API
//! - [`RegistryStore`]: Durable storage for the device registry
//! - [`ResolverControl`]: Reload the DNS resolver after a fragment rewrite
//! - [`HostnameLookup`]: Reverse-resolve a device IP to a host name

pub mod lookup;
pub mod registry_store;
pub mod resolver;
pub mod router;

pub use lookup::HostnameLookup;
pub use registry_store::{RegistryStore, StoreLease};
pub use resolver::ResolverControl;
pub use router::{AuthContext, ClientInfo, RouterClient};
