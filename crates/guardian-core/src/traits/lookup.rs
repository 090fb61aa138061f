// # Hostname Lookup Trait
//
// Defines how operator actions turn a device's IP address back into a
// host name.
//
// ## Implementations
//
// - System resolver (`lookup::SystemHostnameLookup`): reverse (PTR) lookup
//   through the host's configured resolver

use std::net::IpAddr;

use async_trait::async_trait;

/// Trait for reverse hostname lookup
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Query the system resolver
///
/// ## Forbidden Capabilities
/// - ❌ Access the registry
/// - ❌ Retry a failed lookup
#[async_trait]
pub trait HostnameLookup: Send + Sync {
    /// Resolve `ip` to a host name
    ///
    /// # Returns
    ///
    /// - `Some(name)`: The address has a name
    /// - `None`: Lookup failed or the address has no name
    async fn reverse(&self, ip: IpAddr) -> Option<String>;
}
