// # Router Client Trait
//
// Defines the interface to the router's client-management API.
//
// ## Implementations
//
// - UniFi OS: `guardian-router-unifi` crate
//
// ## Usage
//
// ```rust,ignore
// use guardian_core::RouterClient;
//
// let session = router.login().await?;
// for client in router.list_clients(&session).await? {
//     router.set_blocked(&session, &client.mac, true).await?;
// }
// ```

use async_trait::async_trait;

use crate::model::{MacAddress, UNKNOWN_NAME};

/// Authenticated session handed out by [`RouterClient::login`]
///
/// Carries the anti-forgery token that mutating calls must present. Session
/// cookies, if any, stay inside the client implementation.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Anti-forgery token captured from the login response
    pub csrf_token: Option<String>,
}

impl AuthContext {
    /// Create a context carrying the given token
    pub fn new(csrf_token: Option<String>) -> Self {
        Self { csrf_token }
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

/// A client currently connected to the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client MAC address
    pub mac: MacAddress,
    /// Current IP address, if the router reports one
    pub ip: Option<String>,
    /// Hostname, if the router knows one
    pub hostname: Option<String>,
}

impl ClientInfo {
    /// Create a client entry
    pub fn new(mac: MacAddress, ip: Option<String>, hostname: Option<String>) -> Self {
        Self { mac, ip, hostname }
    }

    /// Reported IP, ignoring empty strings
    pub fn reported_ip(&self) -> Option<&str> {
        self.ip.as_deref().map(str::trim).filter(|ip| !ip.is_empty())
    }

    /// Reported hostname, ignoring empty strings
    pub fn reported_hostname(&self) -> Option<&str> {
        self.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    /// Name to store for a newly discovered device
    pub fn display_name(&self) -> &str {
        self.reported_hostname().unwrap_or(UNKNOWN_NAME)
    }
}

/// Trait for router client implementations
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - ✅ Perform HTTPS calls to the configured router only
/// - ✅ Keep session cookies between calls
/// - ✅ Return success or failure
///
/// ## Forbidden Capabilities
/// - ❌ Retry or re-login on its own (owned by `ScanEngine`)
/// - ❌ Access the registry (owned by `RegistryHandle`)
/// - ❌ Decide which devices to block (owned by the sync components)
///
/// All calls must be bounded by a timeout.
#[async_trait]
pub trait RouterClient: Send + Sync {
    /// Exchange configured credentials for a session
    ///
    /// # Returns
    ///
    /// - `Ok(AuthContext)`: Session established
    /// - `Err(Error::Auth)`: Non-2xx response or network failure
    async fn login(&self) -> Result<AuthContext, crate::Error>;

    /// List currently connected clients
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<ClientInfo>)`: Connected clients
    /// - `Err(Error::Fetch)`: Non-2xx response, network failure or timeout
    async fn list_clients(&self, ctx: &AuthContext) -> Result<Vec<ClientInfo>, crate::Error>;

    /// Block or unblock one device
    ///
    /// Callers treat failures as isolated to `mac`.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Command accepted
    /// - `Err(Error::Enforcement)`: Command failed for this device
    async fn set_blocked(
        &self,
        ctx: &AuthContext,
        mac: &MacAddress,
        blocked: bool,
    ) -> Result<(), crate::Error>;

    /// Backend name (for logging)
    fn client_name(&self) -> &'static str;
}
