//! Error types for the Guardian system
//!
//! The variants follow the failure taxonomy of the reconciliation core:
//! authentication and fetch failures are transient and recovered by the scan
//! loop, enforcement failures are isolated per device, persistence failures
//! abort the operation in progress, and resolver failures are logged while
//! the previous configuration stays in effect.

use thiserror::Error;

/// Result type alias for Guardian operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the Guardian system
#[derive(Error, Debug)]
pub enum Error {
    /// Login against the router API failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Client list retrieval failed
    #[error("Client fetch failed: {0}")]
    Fetch(String),

    /// A single device's block/unblock command failed
    #[error("Enforcement failed for {mac}: {message}")]
    Enforcement {
        /// MAC address of the device
        mac: String,
        /// Error message
        message: String,
    },

    /// Registry read/write failure
    #[error("Registry persistence error: {0}")]
    Persistence(String),

    /// Writing the resolver override fragment failed
    #[error("Resolver config write failed: {0}")]
    ConfigWrite(String),

    /// Resolver reload/restart failed after the fragment was written
    #[error("Resolver reload failed: {0}")]
    ConfigReload(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Device not present in the registry
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A background task's queue or reply channel went away
    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create an enforcement error for one device
    pub fn enforcement(mac: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Enforcement {
            mac: mac.into(),
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Create a resolver config write error
    pub fn config_write(msg: impl Into<String>) -> Self {
        Self::ConfigWrite(msg.into())
    }

    /// Create a resolver reload error
    pub fn config_reload(msg: impl Into<String>) -> Self {
        Self::ConfigReload(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether the scan loop should treat this as a transient session problem
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Fetch(_))
    }
}
