//! Scan-reconcile engine
//!
//! The ScanEngine is responsible for:
//! - Taking the bootstrap snapshot on an empty registry (everything approved)
//! - Polling the router's client list on a fixed interval
//! - Recording new devices as blocked and blocking them immediately
//! - Tracking IP and hostname drift of known devices (an empty reported
//!   IP or hostname keeps the stored value)
//! - Requesting a DNS resync when the registry changed
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ RouterClient │─── list_clients ───┐
//! └──────────────┘                    │
//!                                     ▼
//!                            ┌──────────────┐
//!                            │ ScanEngine   │
//!                            └──────────────┘
//!                                     │
//!         ┌───────────────────────────┼───────────────────────────┐
//!         │                           │                           │
//!         ▼                           ▼                           ▼
//! ┌────────────────┐        ┌──────────────────┐        ┌─────────────┐
//! │ RegistryHandle │        │ SyncCoordinator  │        │   Events    │
//! │ (update)       │        │ (request resync) │        │  (notify)   │
//! └────────────────┘        └──────────────────┘        └─────────────┘
//! ```
//!
//! ## Tick Flow
//!
//! 1. Fetch the client list; on failure re-login once, wait, re-fetch once
//! 2. If the fetch still fails, skip the tick without touching the registry
//! 3. Apply new-device policy and drift updates in one registry cycle
//! 4. Block each new device on the router; a rejected block on a cached
//!    session triggers one re-login and one retry per tick
//! 5. Emit events and request a DNS resync if anything changed

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEntry, AuditLog, Surface};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{DeviceRecord, DeviceStatus, MacAddress, Registry};
use crate::registry::RegistryHandle;
use crate::sync::{SyncCoordinator, SyncScope};
use crate::traits::{AuthContext, ClientInfo, RouterClient};

/// Events emitted by the ScanEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        devices_count: usize,
    },

    /// Bootstrap snapshot taken
    Bootstrapped {
        approved: usize,
    },

    /// Device seen for the first time
    DeviceDiscovered {
        mac: MacAddress,
        ip: String,
        status: DeviceStatus,
    },

    /// Known device reported a different IP or hostname
    DeviceUpdated {
        mac: MacAddress,
        ip: String,
        name: String,
    },

    /// Block command for a new device failed
    BlockFailed {
        mac: MacAddress,
        error: String,
    },

    /// Tick finished
    TickCompleted {
        discovered: usize,
        updated: usize,
    },

    /// Tick skipped without touching the registry
    TickSkipped {
        reason: String,
    },

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Result of one polling tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Client list fetched and applied
    Completed(TickSummary),
    /// Client list unavailable; registry untouched
    Skipped {
        reason: String,
    },
}

/// What a completed tick changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Devices seen for the first time (recorded as blocked)
    pub discovered: Vec<MacAddress>,
    /// Known devices whose IP or hostname changed
    pub updated: Vec<MacAddress>,
    /// New devices whose block command failed
    pub block_failures: Vec<MacAddress>,
}

impl TickSummary {
    /// Whether the registry was written
    pub fn changed(&self) -> bool {
        !self.discovered.is_empty() || !self.updated.is_empty()
    }
}

/// Registry changes from applying one client list
#[derive(Debug, Default)]
struct ScanChanges {
    discovered: Vec<(MacAddress, String)>,
    updated: Vec<(MacAddress, String, String)>,
}

/// Core scan-reconcile engine
///
/// ## Lifecycle
///
/// 1. Create with [`ScanEngine::new()`]
/// 2. Optionally attach a sync queue with [`ScanEngine::with_sync()`]
/// 3. Start with [`ScanEngine::run()`] or [`ScanEngine::run_with_shutdown()`]
/// 4. Engine polls until the shutdown signal is received
///
/// Ticks never overlap: a slow tick delays the next one.
pub struct ScanEngine {
    /// Router API
    router: Arc<dyn RouterClient>,

    /// Serialized registry access
    registry: RegistryHandle,

    /// Resync queue, if enforcement runs alongside the engine
    sync: Option<SyncCoordinator>,

    /// Audit trail for discoveries and failures
    audit: AuditLog,

    /// Current router session
    session: Mutex<Option<AuthContext>>,

    /// Interval between ticks
    scan_interval: Duration,

    /// Pause between re-login and re-fetch
    refetch_delay: Duration,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ScanEngine {
    /// Create a new scan engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        router: Arc<dyn RouterClient>,
        registry: RegistryHandle,
        config: &EngineConfig,
        audit: AuditLog,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            router,
            registry,
            sync: None,
            audit,
            session: Mutex::new(None),
            scan_interval: Duration::from_secs(config.scan_interval_secs),
            refetch_delay: Duration::from_secs(config.refetch_delay_secs),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Request resyncs through `coordinator` when ticks change the registry
    pub fn with_sync(mut self, coordinator: SyncCoordinator) -> Self {
        self.sync = Some(coordinator);
        self
    }

    /// Take the bootstrap snapshot
    ///
    /// Every connected client is recorded as approved and the registry is
    /// saved once. Login and fetch failures are fatal here: without a
    /// trusted snapshot there is nothing to seed the registry with.
    ///
    /// # Returns
    ///
    /// Number of devices approved
    pub async fn bootstrap(&self) -> Result<usize> {
        info!("Registry is empty, taking bootstrap snapshot");

        let ctx = self.router.login().await?;
        *self.session.lock().await = Some(ctx.clone());
        let clients = self.router.list_clients(&ctx).await?;

        let changes = self
            .registry
            .update(|registry| Ok(apply_clients(registry, &clients, DeviceStatus::Approved)))
            .await?;

        let approved = changes.discovered.len();
        for (mac, ip) in &changes.discovered {
            debug!("Bootstrap approved {} ({})", mac, ip);
            self.audit
                .record(AuditEntry::device(Surface::Scan, "approved", mac, ip.as_str()))
                .await;
        }

        info!("Bootstrap complete: {} devices approved", approved);
        self.emit_event(EngineEvent::Bootstrapped { approved });
        self.request_sync(SyncScope::All, "bootstrap");

        Ok(approved)
    }

    /// Run one polling tick
    ///
    /// # Returns
    ///
    /// - `Ok(TickOutcome::Completed)`: Client list applied
    /// - `Ok(TickOutcome::Skipped)`: Router unavailable; registry untouched
    /// - `Err(Error::Persistence)`: Registry could not be read or written
    pub async fn tick(&self) -> Result<TickOutcome> {
        let (mut ctx, clients, fresh_session) = match self.fetch_clients().await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                let reason = e.to_string();
                self.emit_event(EngineEvent::TickSkipped {
                    reason: reason.clone(),
                });
                return Ok(TickOutcome::Skipped { reason });
            }
        };

        let changes = self
            .registry
            .update(|registry| Ok(apply_clients(registry, &clients, DeviceStatus::Blocked)))
            .await?;

        let mut summary = TickSummary::default();
        // Another holder of the router session may have logged in since ours
        let mut may_relogin = !fresh_session;

        for (mac, ip) in &changes.discovered {
            info!("New device {} ({}) recorded as blocked", mac, ip);
            self.audit
                .record(AuditEntry::device(Surface::Scan, "discovered", mac, ip.as_str()))
                .await;
            self.emit_event(EngineEvent::DeviceDiscovered {
                mac: mac.clone(),
                ip: ip.clone(),
                status: DeviceStatus::Blocked,
            });

            let mut result = self.router.set_blocked(&ctx, mac, true).await;
            if let Err(e) = &result
                && may_relogin
            {
                may_relogin = false;
                warn!("Block of {} rejected, re-authenticating: {}", mac, e);
                match self.relogin().await {
                    Ok(fresh) => {
                        ctx = fresh;
                        result = self.router.set_blocked(&ctx, mac, true).await;
                    }
                    Err(login_err) => warn!("Re-login failed: {}", login_err),
                }
            }

            match result {
                Ok(()) => {
                    self.audit
                        .record(AuditEntry::device(Surface::Firewall, "block", mac, ip.as_str()))
                        .await;
                }
                Err(e) => {
                    warn!("Failed to block new device {}: {}", mac, e);
                    self.audit
                        .record(
                            AuditEntry::device(Surface::Firewall, "error", mac, ip.as_str())
                                .with_detail(format!("block failed: {}", e)),
                        )
                        .await;
                    self.emit_event(EngineEvent::BlockFailed {
                        mac: mac.clone(),
                        error: e.to_string(),
                    });
                    summary.block_failures.push(mac.clone());
                }
            }
            summary.discovered.push(mac.clone());
        }

        for (mac, ip, name) in changes.updated {
            debug!("Device {} now {} ({})", mac, ip, name);
            self.emit_event(EngineEvent::DeviceUpdated {
                mac: mac.clone(),
                ip,
                name,
            });
            summary.updated.push(mac);
        }

        if summary.changed() {
            // New devices are already blocked above; only the resolver needs the new rules
            self.request_sync(SyncScope::Dns, "scan");
        }

        debug!(
            "Tick complete: {} clients, {} new, {} updated",
            clients.len(),
            summary.discovered.len(),
            summary.updated.len()
        );
        self.emit_event(EngineEvent::TickCompleted {
            discovered: summary.discovered.len(),
            updated: summary.updated.len(),
        });

        Ok(TickOutcome::Completed(summary))
    }

    /// Run the engine until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: Bootstrap failed or the registry was unreadable at start
    pub async fn run(&self) -> Result<()> {
        self.run_with_shutdown(None).await
    }

    /// Run the engine until `shutdown_rx` fires (or SIGINT if `None`)
    ///
    /// The signal is only observed between ticks; a running tick completes.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        let mut shutdown: Pin<Box<dyn Future<Output = ()> + Send>> = match shutdown_rx {
            Some(rx) => Box::pin(async move {
                let _ = rx.await;
            }),
            None => Box::pin(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            }),
        };

        let initial = self.registry.snapshot().await?;
        self.emit_event(EngineEvent::Started {
            devices_count: initial.len(),
        });

        let first_tick = if initial.is_empty() {
            self.bootstrap().await?;
            Instant::now() + self.scan_interval
        } else {
            info!("Resuming with {} known devices", initial.len());
            Instant::now()
        };

        let mut interval = tokio::time::interval_at(first_tick, self.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    self.emit_event(EngineEvent::Stopped {
                        reason: "Shutdown signal".to_string(),
                    });
                    break;
                }
            }

            if let Err(e) = self.tick().await {
                error!("Tick failed: {}", e);
                self.audit
                    .record(AuditEntry::failure(Surface::Registry, e.to_string()))
                    .await;
            }
        }

        info!("Scan engine stopped");
        Ok(())
    }

    /// Fetch the client list with one re-login and one re-fetch on failure
    ///
    /// The flag is true when the returned session was created by this call.
    async fn fetch_clients(&self) -> Result<(AuthContext, Vec<ClientInfo>, bool)> {
        let cached = self.session.lock().await.clone();

        if let Some(ctx) = cached {
            match self.router.list_clients(&ctx).await {
                Ok(clients) => return Ok((ctx, clients, false)),
                Err(e) => warn!("Client fetch failed, re-authenticating: {}", e),
            }
        }

        let ctx = self.relogin().await?;
        tokio::time::sleep(self.refetch_delay).await;
        let clients = self.router.list_clients(&ctx).await?;
        Ok((ctx, clients, true))
    }

    /// Log in again and replace the cached session
    async fn relogin(&self) -> Result<AuthContext> {
        match self.router.login().await {
            Ok(ctx) => {
                *self.session.lock().await = Some(ctx.clone());
                Ok(ctx)
            }
            Err(e) => {
                *self.session.lock().await = None;
                Err(e)
            }
        }
    }

    fn request_sync(&self, scope: SyncScope, reason: &'static str) {
        if let Some(sync) = &self.sync {
            sync.request(scope, reason);
        }
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Drop rather than block the tick when nobody keeps up with events
        if self.event_tx.try_send(event).is_err() {
            debug!("Event channel full or closed, dropping event");
        }
    }
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("router", &self.router.client_name())
            .field("scan_interval", &self.scan_interval)
            .field("refetch_delay", &self.refetch_delay)
            .finish_non_exhaustive()
    }
}

/// Apply one client list to the registry
///
/// Unknown MACs are inserted with `new_status`; known MACs get their IP and
/// name refreshed when the router reports a different non-empty value.
/// Devices missing from the list are left alone.
fn apply_clients(registry: &mut Registry, clients: &[ClientInfo], new_status: DeviceStatus) -> ScanChanges {
    let mut changes = ScanChanges::default();

    for client in clients {
        match registry.get_mut(&client.mac) {
            None => {
                let ip = client.reported_ip().unwrap_or_default().to_string();
                registry.insert(
                    client.mac.clone(),
                    DeviceRecord::discovered(ip.clone(), client.display_name(), new_status.clone()),
                );
                changes.discovered.push((client.mac.clone(), ip));
            }
            Some(record) => {
                let mut dirty = false;
                if let Some(ip) = client.reported_ip() {
                    if record.ip != ip {
                        record.ip = ip.to_string();
                        dirty = true;
                    }
                }
                if let Some(name) = client.reported_hostname() {
                    if record.name != name {
                        record.name = name.to_string();
                        dirty = true;
                    }
                }
                if dirty {
                    record.touch();
                    changes
                        .updated
                        .push((client.mac.clone(), record.ip.clone(), record.name.clone()));
                }
            }
        }
    }

    changes
}
