//! Configuration types for the Guardian system
//!
//! This module defines all configuration structures used throughout the crate.
//! The daemon fills them from `GUARDIAN_*` environment variables; library
//! users may also deserialize them.

use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Main Guardian configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuardianConfig {
    /// Router API connection
    #[serde(default)]
    pub router: RouterConfig,

    /// Registry file locations
    #[serde(default)]
    pub registry: RegistryConfig,

    /// DNS resolver integration
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Audit trail
    #[serde(default)]
    pub audit: AuditConfig,

    /// Scan engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl GuardianConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.router.validate()?;
        self.registry.validate()?;
        self.resolver.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Router API connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Base URL of the router (e.g. `https://192.168.1.1`)
    #[serde(default)]
    pub host: String,

    /// Network site name
    #[serde(default = "default_site")]
    pub site: String,

    /// Login user
    #[serde(default)]
    pub username: String,

    /// Login password
    #[serde(default = "empty_secret")]
    pub password: SecretString,

    /// Per-request timeout (in seconds)
    #[serde(default = "default_router_timeout_secs")]
    pub timeout_secs: u64,

    /// Verify the router's TLS certificate
    ///
    /// Off by default: consumer routers serve self-signed certificates.
    #[serde(default)]
    pub verify_tls: bool,
}

impl RouterConfig {
    /// Validate the router settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(crate::Error::config("Router host cannot be empty"));
        }
        if !(host.starts_with("https://") || host.starts_with("http://")) {
            return Err(crate::Error::config(format!(
                "Router host must be an http(s) URL, got '{}'",
                host
            )));
        }
        if !is_valid_site(&self.site) {
            return Err(crate::Error::config(format!(
                "Router site '{}' must be non-empty and contain only letters, digits, '_' or '-'",
                self.site
            )));
        }
        if self.username.trim().is_empty() {
            return Err(crate::Error::config("Router username cannot be empty"));
        }
        if self.password.expose_secret().is_empty() {
            return Err(crate::Error::config("Router password cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Router timeout must be > 0"));
        }
        Ok(())
    }
}

/// Whether `site` is safe to place in an API path segment
pub fn is_valid_site(site: &str) -> bool {
    !site.is_empty()
        && site
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            site: default_site(),
            username: String::new(),
            password: empty_secret(),
            timeout_secs: default_router_timeout_secs(),
            verify_tls: false,
        }
    }
}

/// Registry file locations
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Path of the registry JSON file
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,

    /// Directory for reset-all archives (defaults to `backups/` next to the registry)
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
}

impl RegistryConfig {
    /// Validate the registry settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.path.as_os_str().is_empty() {
            return Err(crate::Error::config("Registry path cannot be empty"));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            backup_dir: None,
        }
    }
}

/// DNS resolver integration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Override fragment written by the DNS sync
    #[serde(default = "default_fragment_path")]
    pub fragment_path: PathBuf,

    /// Command (program and arguments) that reloads the resolver
    #[serde(default = "default_reload_command")]
    pub reload_command: Vec<String>,

    /// Upper bound for the reload command (in seconds)
    #[serde(default = "default_reload_timeout_secs")]
    pub reload_timeout_secs: u64,
}

impl ResolverConfig {
    /// Validate the resolver settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.fragment_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Resolver fragment path cannot be empty"));
        }
        match self.reload_command.first() {
            Some(program) if !program.trim().is_empty() => {}
            _ => return Err(crate::Error::config("Resolver reload command cannot be empty")),
        }
        if self.reload_timeout_secs == 0 {
            return Err(crate::Error::config("Resolver reload timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fragment_path: default_fragment_path(),
            reload_command: default_reload_command(),
            reload_timeout_secs: default_reload_timeout_secs(),
        }
    }
}

/// Audit trail settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfig {
    /// Audit log file; `None` disables the audit trail
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Interval between polling ticks (in seconds)
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Pause between re-login and re-fetch after a failed fetch (in seconds)
    #[serde(default = "default_refetch_delay_secs")]
    pub refetch_delay_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    ///
    /// Default: 1000 events
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Capacity of the sync request queue
    #[serde(default = "default_sync_queue_capacity")]
    pub sync_queue_capacity: usize,
}

impl EngineConfig {
    /// Validate the engine settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.scan_interval_secs == 0 {
            return Err(crate::Error::config("Scan interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.sync_queue_capacity == 0 {
            return Err(crate::Error::config("Sync queue capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            refetch_delay_secs: default_refetch_delay_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            sync_queue_capacity: default_sync_queue_capacity(),
        }
    }
}

fn default_site() -> String {
    "default".to_string()
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_router_timeout_secs() -> u64 {
    5
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("/var/lib/guardian/whitelist.json")
}

fn default_fragment_path() -> PathBuf {
    PathBuf::from("/etc/unbound/unbound.conf.d/guardian-overrides.conf")
}

fn default_reload_command() -> Vec<String> {
    ["systemctl", "restart", "unbound"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_reload_timeout_secs() -> u64 {
    30
}

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_refetch_delay_secs() -> u64 {
    1
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_sync_queue_capacity() -> usize {
    64
}
