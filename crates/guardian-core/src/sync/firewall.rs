//! Firewall sync: drive the router's block list to match the registry
//!
//! Stateless and idempotent. Every run authenticates once, then walks the
//! whole registry: approved devices are unblocked, every other status is
//! blocked. One device's failure never stops the batch.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog, Surface};
use crate::error::Result;
use crate::model::{MacAddress, Registry};
use crate::traits::RouterClient;

/// Outcome of one firewall sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallReport {
    /// Devices unblocked
    pub unblocked: usize,
    /// Devices blocked
    pub blocked: usize,
    /// Devices whose command failed
    pub failed: Vec<MacAddress>,
}

impl FirewallReport {
    /// Whether every command succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reconciles the router firewall with the registry
pub struct FirewallSync {
    router: Arc<dyn RouterClient>,
    audit: AuditLog,
}

impl FirewallSync {
    /// Create a firewall sync over `router`
    pub fn new(router: Arc<dyn RouterClient>, audit: AuditLog) -> Self {
        Self { router, audit }
    }

    /// Apply the registry's desired state to the router
    ///
    /// # Returns
    ///
    /// - `Ok(FirewallReport)`: Every device was attempted
    /// - `Err(Error::Auth)`: Login failed; nothing was attempted
    pub async fn run(&self, registry: &Registry) -> Result<FirewallReport> {
        let ctx = self.router.login().await?;
        let mut report = FirewallReport::default();

        for (mac, record) in registry.iter() {
            let unblock = record.status.is_approved();
            let action = if unblock { "unblock" } else { "block" };

            match self.router.set_blocked(&ctx, mac, !unblock).await {
                Ok(()) => {
                    debug!("Firewall {} {} ({})", action, mac, record.status);
                    if unblock {
                        report.unblocked += 1;
                    } else {
                        report.blocked += 1;
                    }
                    self.audit
                        .record(AuditEntry::device(Surface::Firewall, action, mac, record.ip.as_str()))
                        .await;
                }
                Err(e) => {
                    warn!("Firewall {} failed for {}: {}", action, mac, e);
                    report.failed.push(mac.clone());
                    self.audit
                        .record(
                            AuditEntry::device(Surface::Firewall, "error", mac, record.ip.as_str())
                                .with_detail(format!("{} failed: {}", action, e)),
                        )
                        .await;
                }
            }
        }

        info!(
            "Firewall sync via {}: {} unblocked, {} blocked, {} failed",
            self.router.client_name(),
            report.unblocked,
            report.blocked,
            report.failed.len()
        );
        Ok(report)
    }
}

impl std::fmt::Debug for FirewallSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallSync")
            .field("router", &self.router.client_name())
            .field("audit", &self.audit)
            .finish()
    }
}
