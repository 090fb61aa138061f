// # Resolver Control Trait
//
// Defines how the DNS override sync asks the resolver to pick up a freshly
// written configuration fragment.
//
// ## Implementations
//
// - Command-based (`sync::CommandReloader`): runs e.g. `systemctl restart unbound`
//
// ## Usage
//
// ```rust,ignore
// use guardian_core::ResolverControl;
//
// std::fs::write(fragment_path, rendered)?;
// resolver.reload().await?;
// ```

use async_trait::async_trait;

/// Trait for resolver control implementations
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - ✅ Spawn a bounded external process to reload/restart the resolver
///
/// ## Forbidden Capabilities
/// - ❌ Write the override fragment (owned by `DnsOverrideSync`)
/// - ❌ Retry a failed reload (the next sync will reload again)
#[async_trait]
pub trait ResolverControl: Send + Sync {
    /// Reload the resolver so it applies the current fragment
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Resolver reloaded
    /// - `Err(Error::ConfigReload)`: Reload failed; the written fragment stands
    async fn reload(&self) -> Result<(), crate::Error>;

    /// Short description of the reload mechanism (for logging)
    fn describe(&self) -> String;
}
