//! Enforcement sync: firewall and DNS reconciliation
//!
//! Registry writers never talk to the enforcement surfaces directly. They
//! ask a [`SyncCoordinator`] for a resync; a single [`SyncWorker`] task
//! consumes the queue, takes a registry snapshot and runs the requested
//! syncs against it.
//!
//! ```text
//! ┌────────────┐  request(scope)  ┌────────────┐   snapshot   ┌──────────────┐
//! │ ScanEngine │─────────────────▶│ SyncWorker │─────────────▶│ Registry     │
//! │ operator   │◀─ SyncReport ────│            │              └──────────────┘
//! └────────────┘   (optional)     └────────────┘
//!                                   │       │
//!                                   ▼       ▼
//!                           FirewallSync  DnsOverrideSync
//! ```
//!
//! Requests that pile up while a sync is running are merged into one run
//! covering the union of their scopes. A request that finds the queue full
//! is folded into a pending scope the worker drains with the next run.

pub mod dns;
pub mod firewall;
pub mod reload;

pub use dns::{DnsOutcome, DnsOverrideSync, DnsReport};
pub use firewall::{FirewallReport, FirewallSync};
pub use reload::CommandReloader;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::registry::RegistryHandle;

/// Which enforcement surfaces a sync covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// Router block list only
    Firewall,
    /// Resolver fragment only
    Dns,
    /// Both surfaces
    All,
}

impl SyncScope {
    /// Whether the firewall is included
    pub fn includes_firewall(self) -> bool {
        matches!(self, SyncScope::Firewall | SyncScope::All)
    }

    /// Whether the resolver is included
    pub fn includes_dns(self) -> bool {
        matches!(self, SyncScope::Dns | SyncScope::All)
    }

    /// Smallest scope covering both
    pub fn union(self, other: SyncScope) -> SyncScope {
        if self == other { self } else { SyncScope::All }
    }
}

/// Outcome of one sync run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Scope that was run
    pub scope: SyncScope,
    /// Firewall result, if the firewall was in scope and login succeeded
    pub firewall: Option<FirewallReport>,
    /// DNS result, if the resolver was in scope
    pub dns: Option<DnsReport>,
    /// Failures that prevented a surface from being synced at all
    pub errors: Vec<String>,
}

impl SyncReport {
    fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            firewall: None,
            dns: None,
            errors: Vec::new(),
        }
    }

    /// Whether every in-scope step fully succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.firewall.as_ref().is_none_or(FirewallReport::is_clean)
            && self
                .dns
                .as_ref()
                .is_none_or(|dns| dns.outcome == DnsOutcome::Applied)
    }
}

/// A queued resync request
#[derive(Debug)]
pub struct SyncRequest {
    /// Surfaces to sync
    pub scope: SyncScope,
    /// Who asked (for logging)
    pub reason: &'static str,
    /// Where to send the report, if the requester waits
    pub respond_to: Option<oneshot::Sender<SyncReport>>,
}

/// Scopes requested but not yet picked up by the worker
type PendingScope = Arc<Mutex<Option<SyncScope>>>;

fn merge_pending(pending: &PendingScope, scope: SyncScope) {
    let mut guard = pending.lock().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(guard.map_or(scope, |current| current.union(scope)));
}

/// Sending half of the sync queue
///
/// Cheap to clone; every registry writer holds one.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    tx: mpsc::Sender<SyncRequest>,
    pending: PendingScope,
}

/// Receiving half of the sync queue, consumed by one [`SyncWorker`]
#[derive(Debug)]
pub struct SyncQueue {
    rx: mpsc::Receiver<SyncRequest>,
    pending: PendingScope,
}

impl SyncQueue {
    /// Wait for the next request
    pub async fn recv(&mut self) -> Option<SyncRequest> {
        self.rx.recv().await
    }

    /// Take the next request if one is queued
    pub fn try_recv(&mut self) -> std::result::Result<SyncRequest, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Take the union of every scope requested since the last call
    fn take_pending(&self) -> Option<SyncScope> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl SyncCoordinator {
    /// Create a coordinator and the queue a [`SyncWorker`] consumes
    pub fn channel(capacity: usize) -> (Self, SyncQueue) {
        let (tx, rx) = mpsc::channel(capacity);
        let pending = PendingScope::default();
        (
            Self {
                tx,
                pending: Arc::clone(&pending),
            },
            SyncQueue { rx, pending },
        )
    }

    /// Ask for a resync without waiting
    ///
    /// Returns `false` only if the worker has stopped. The scope is recorded
    /// before sending: when the queue is full, a request the worker has not
    /// received yet is still queued, and the worker drains the pending
    /// scope after each receive.
    pub fn request(&self, scope: SyncScope, reason: &'static str) -> bool {
        merge_pending(&self.pending, scope);

        let request = SyncRequest {
            scope,
            reason,
            respond_to: None,
        };
        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Sync queue full, {} request merged into pending sync", reason);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Sync worker stopped, dropping {} request", reason);
                false
            }
        }
    }

    /// Ask for a resync and wait for its report
    pub async fn request_and_wait(&self, scope: SyncScope, reason: &'static str) -> Result<SyncReport> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncRequest {
                scope,
                reason,
                respond_to: Some(tx),
            })
            .await
            .map_err(|_| Error::ChannelClosed("sync queue"))?;

        rx.await.map_err(|_| Error::ChannelClosed("sync report"))
    }
}

/// Runs firewall and DNS syncs against registry snapshots
pub struct SyncWorker {
    registry: RegistryHandle,
    firewall: FirewallSync,
    dns: DnsOverrideSync,
}

impl SyncWorker {
    /// Create a worker
    pub fn new(registry: RegistryHandle, firewall: FirewallSync, dns: DnsOverrideSync) -> Self {
        Self {
            registry,
            firewall,
            dns,
        }
    }

    /// Run one sync immediately
    ///
    /// Surfaces are independent: a firewall login failure does not prevent
    /// the DNS sync and vice versa.
    pub async fn sync_once(&self, scope: SyncScope) -> SyncReport {
        let mut report = SyncReport::new(scope);

        let registry = match self.registry.snapshot().await {
            Ok(registry) => registry,
            Err(e) => {
                error!("Sync aborted, registry unreadable: {}", e);
                report.errors.push(e.to_string());
                return report;
            }
        };

        if scope.includes_firewall() {
            match self.firewall.run(&registry).await {
                Ok(firewall) => report.firewall = Some(firewall),
                Err(e) => {
                    error!("Firewall sync skipped: {}", e);
                    report.errors.push(e.to_string());
                }
            }
        }

        if scope.includes_dns() {
            report.dns = Some(self.dns.run(&registry).await);
        }

        report
    }

    /// Consume sync requests until the queue closes or `shutdown_rx` fires
    pub async fn run(
        &self,
        mut requests: SyncQueue,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) {
        info!("Sync worker started");
        let mut shutdown = shutdown_rx;

        loop {
            let first = match shutdown.as_mut() {
                Some(rx) => tokio::select! {
                    request = requests.recv() => request,
                    _ = rx => {
                        info!("Sync worker received shutdown signal");
                        break;
                    }
                },
                None => requests.recv().await,
            };
            let Some(first) = first else {
                break;
            };

            let mut scope = first.scope;
            let mut reasons = vec![first.reason];
            let mut responders: Vec<_> = first.respond_to.into_iter().collect();
            while let Ok(next) = requests.try_recv() {
                scope = scope.union(next.scope);
                reasons.push(next.reason);
                responders.extend(next.respond_to);
            }
            if let Some(pending) = requests.take_pending() {
                scope = scope.union(pending);
            }

            debug!("Running {:?} sync for {}", scope, reasons.join(", "));
            let report = self.sync_once(scope).await;
            for responder in responders {
                let _ = responder.send(report.clone());
            }
        }

        info!("Sync worker stopped");
    }
}

impl std::fmt::Debug for SyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncWorker")
            .field("firewall", &self.firewall)
            .field("dns", &self.dns)
            .finish()
    }
}
