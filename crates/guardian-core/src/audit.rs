//! Append-only audit trail of enforcement decisions
//!
//! One human-readable line per decision:
//!
//! ```text
//! [2025-01-09 12:00:00] firewall block aa:bb:cc:dd:ee:01 (10.0.0.5)
//! [2025-01-09 12:00:00] dns redirect aa:bb:cc:dd:ee:02 (10.0.0.9) -> ads.example
//! [2025-01-09 12:00:01] resolver error: reload failed: exit status 1
//! ```
//!
//! Audit writes are best effort: a failure is logged and never aborts the
//! enforcement step that produced the entry.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::model::MacAddress;

const AUDIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Component that produced an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    /// Router block/unblock commands
    Firewall,
    /// Resolver override rules
    Dns,
    /// Resolver fragment write and reload
    Resolver,
    /// Registry persistence and operator edits
    Registry,
    /// Scan engine discovery
    Scan,
}

impl Surface {
    fn as_str(self) -> &'static str {
        match self {
            Surface::Firewall => "firewall",
            Surface::Dns => "dns",
            Surface::Resolver => "resolver",
            Surface::Registry => "registry",
            Surface::Scan => "scan",
        }
    }
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Producing component
    pub surface: Surface,
    /// What was done (`block`, `allow`, `discovered`, `error`, ...)
    pub action: String,
    /// Device concerned, if any
    pub mac: Option<MacAddress>,
    /// Device address at decision time
    pub ip: Option<String>,
    /// Trailing detail (redirect target, error message)
    pub detail: Option<String>,
}

impl AuditEntry {
    /// Entry about one device
    pub fn device(
        surface: Surface,
        action: impl Into<String>,
        mac: &MacAddress,
        ip: impl Into<String>,
    ) -> Self {
        let ip = ip.into();
        Self {
            surface,
            action: action.into(),
            mac: Some(mac.clone()),
            ip: (!ip.is_empty()).then_some(ip),
            detail: None,
        }
    }

    /// Error entry not tied to a device
    pub fn failure(surface: Surface, message: impl Into<String>) -> Self {
        Self {
            surface,
            action: "error".to_string(),
            mac: None,
            ip: None,
            detail: Some(message.into()),
        }
    }

    /// Attach a trailing detail
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.surface.as_str(), self.action)?;
        if let Some(mac) = &self.mac {
            write!(f, " {}", mac)?;
            if let Some(ip) = &self.ip {
                write!(f, " ({})", ip)?;
            }
        }
        match (&self.detail, self.action.as_str()) {
            (Some(detail), "error") => write!(f, ": {}", detail),
            (Some(detail), _) => write!(f, " -> {}", detail),
            (None, _) => Ok(()),
        }
    }
}

/// Audit log writer
///
/// A log without a path discards entries (used by tests and dry runs).
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Audit log appending to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Audit log that discards every entry
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Path of the log file, if enabled
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one timestamped line
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let line = format!(
            "[{}] {}\n",
            chrono::Local::now().format(AUDIT_TIMESTAMP_FORMAT),
            escape_controls(&entry.to_string())
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Append, logging instead of returning failures
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append(&entry).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Escape control characters so every entry stays on one line
fn escape_controls(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_control() {
            escaped.extend(c.escape_default());
        } else {
            escaped.push(c);
        }
    }
    escaped
}
