//! DNS override sync: regenerate the resolver fragment from the registry
//!
//! The fragment is an unbound `server:` clause with one rule per device that
//! has a usable address:
//!
//! ```text
//! server:
//!     access-control: 10.0.0.5/32 allow
//!     access-control: 10.0.0.7/32 refuse
//!     local-zone: "ads.example" redirect
//!     local-data: "ads.example A 10.0.0.9"
//! ```
//!
//! The fragment is replaced atomically, then the resolver is reloaded. A
//! failed write leaves the previous fragment in place; a failed reload
//! leaves the new fragment on disk for the next reload to pick up. Neither
//! is fatal.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditLog, Surface};
use crate::error::{Error, Result};
use crate::model::{DeviceStatus, MacAddress, Registry};
use crate::traits::ResolverControl;

/// How the fragment write and reload went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    /// Fragment written and resolver reloaded
    Applied,
    /// Fragment could not be written; the previous one is still active
    WriteFailed(String),
    /// Fragment written but the resolver did not reload
    ReloadFailed(String),
}

/// Outcome of one DNS override sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsReport {
    /// Rules emitted (one per device)
    pub rules: usize,
    /// Devices without a usable address
    pub skipped: usize,
    /// Write/reload result
    pub outcome: DnsOutcome,
}

/// Rule written for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAction {
    /// `access-control ... allow`
    Allow,
    /// `access-control ... refuse`
    Refuse,
    /// Refused because the stored redirect domain is not a valid name
    RefuseInvalidRedirect,
    /// `local-zone` / `local-data` pointing at `domain`
    Redirect {
        /// Redirect target
        domain: String,
    },
}

/// One device's entry in the rendered fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsDecision {
    /// Device
    pub mac: MacAddress,
    /// Address the rule applies to
    pub ip: IpAddr,
    /// Rule written
    pub action: DnsAction,
}

/// Rendered fragment plus counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
    /// Fragment text
    pub content: String,
    /// Rules emitted
    pub rules: usize,
    /// Devices skipped
    pub skipped: usize,
    /// Per-device rules, in fragment order
    pub decisions: Vec<DnsDecision>,
}

/// Reconciles the resolver's override fragment with the registry
pub struct DnsOverrideSync {
    fragment_path: PathBuf,
    resolver: Arc<dyn ResolverControl>,
    audit: AuditLog,
}

impl DnsOverrideSync {
    /// Create a DNS sync writing to `fragment_path`
    pub fn new(
        fragment_path: impl Into<PathBuf>,
        resolver: Arc<dyn ResolverControl>,
        audit: AuditLog,
    ) -> Self {
        Self {
            fragment_path: fragment_path.into(),
            resolver,
            audit,
        }
    }

    /// Path of the managed fragment
    pub fn fragment_path(&self) -> &Path {
        &self.fragment_path
    }

    /// Render the fragment for `registry`
    ///
    /// Deterministic: devices are emitted in MAC order, and a redirect domain
    /// shared by several devices is declared once.
    pub fn render(registry: &Registry) -> RenderedFragment {
        let mut content = String::from("server:\n");
        let mut declared_zones = HashSet::new();
        let mut decisions = Vec::new();
        let mut skipped = 0;

        for (mac, record) in registry.iter() {
            let Some(raw_ip) = record.observed_ip() else {
                debug!("Skipping {}: no address observed", mac);
                skipped += 1;
                continue;
            };
            let ip: IpAddr = match raw_ip.parse() {
                Ok(ip) => ip,
                Err(_) => {
                    warn!("Skipping {}: unparsable address '{}'", mac, raw_ip);
                    skipped += 1;
                    continue;
                }
            };

            let action = match &record.status {
                DeviceStatus::Approved => {
                    let _ = writeln!(content, "    access-control: {}/{} allow", ip, host_prefix(ip));
                    DnsAction::Allow
                }
                DeviceStatus::Redirected { domain } if !is_valid_domain(domain) => {
                    warn!("Refusing {}: invalid redirect domain {:?}", mac, domain);
                    let _ = writeln!(content, "    access-control: {}/{} refuse", ip, host_prefix(ip));
                    DnsAction::RefuseInvalidRedirect
                }
                DeviceStatus::Redirected { domain } => {
                    if declared_zones.insert(domain.as_str()) {
                        let _ = writeln!(content, "    local-zone: \"{}\" redirect", domain);
                    }
                    let _ = writeln!(
                        content,
                        "    local-data: \"{} {} {}\"",
                        domain,
                        record_type(ip),
                        ip
                    );
                    DnsAction::Redirect {
                        domain: domain.clone(),
                    }
                }
                DeviceStatus::Pending | DeviceStatus::Blocked => {
                    let _ = writeln!(content, "    access-control: {}/{} refuse", ip, host_prefix(ip));
                    DnsAction::Refuse
                }
            };
            decisions.push(DnsDecision {
                mac: mac.clone(),
                ip,
                action,
            });
        }

        RenderedFragment {
            content,
            rules: decisions.len(),
            skipped,
            decisions,
        }
    }

    /// Write the fragment for `registry` and reload the resolver
    ///
    /// Never fails: write and reload problems are reported in the outcome,
    /// logged and appended to the audit trail.
    pub async fn run(&self, registry: &Registry) -> DnsReport {
        let rendered = Self::render(registry);

        for decision in &rendered.decisions {
            let ip = decision.ip.to_string();
            let entry = match &decision.action {
                DnsAction::Allow => AuditEntry::device(Surface::Dns, "allow", &decision.mac, ip),
                DnsAction::Refuse => AuditEntry::device(Surface::Dns, "refuse", &decision.mac, ip),
                DnsAction::RefuseInvalidRedirect => {
                    AuditEntry::device(Surface::Dns, "refuse", &decision.mac, ip)
                        .with_detail("invalid redirect domain")
                }
                DnsAction::Redirect { domain } => {
                    AuditEntry::device(Surface::Dns, "redirect", &decision.mac, ip)
                        .with_detail(domain.as_str())
                }
            };
            self.audit.record(entry).await;
        }

        let outcome = match self.write_fragment(&rendered.content).await {
            Err(e) => {
                error!("{}", e);
                self.audit.record(AuditEntry::failure(Surface::Resolver, e.to_string())).await;
                DnsOutcome::WriteFailed(e.to_string())
            }
            Ok(()) => match self.resolver.reload().await {
                Ok(()) => {
                    info!(
                        "DNS overrides applied: {} rules, {} skipped ({})",
                        rendered.rules,
                        rendered.skipped,
                        self.resolver.describe()
                    );
                    DnsOutcome::Applied
                }
                Err(e) => {
                    error!("{}", e);
                    self.audit.record(AuditEntry::failure(Surface::Resolver, e.to_string())).await;
                    DnsOutcome::ReloadFailed(e.to_string())
                }
            },
        };

        DnsReport {
            rules: rendered.rules,
            skipped: rendered.skipped,
            outcome,
        }
    }

    /// Replace the fragment atomically (temp file + fsync + rename)
    async fn write_fragment(&self, content: &str) -> Result<()> {
        let path = &self.fragment_path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config_write(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }

        let mut temp_path = path.clone();
        temp_path.set_extension("conf.tmp");

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.sync_all().await?;
            fs::rename(&temp_path, path).await
        }
        .await;

        written.map_err(|e| {
            Error::config_write(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

impl std::fmt::Debug for DnsOverrideSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsOverrideSync")
            .field("fragment_path", &self.fragment_path)
            .field("resolver", &self.resolver.describe())
            .finish()
    }
}

/// Whether `domain` is safe to place in a resolver rule
///
/// Accepts dot-separated labels of letters, digits and hyphens (no leading or
/// trailing hyphen, 1-63 characters each, 253 total). A trailing dot is
/// allowed.
pub fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_suffix('.').unwrap_or(domain);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

fn host_prefix(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn record_type(ip: IpAddr) -> &'static str {
    match ip {
        IpAddr::V4(_) => "A",
        IpAddr::V6(_) => "AAAA",
    }
}
