// # guardiand - Guardian Daemon
//
// ⚠️ ARCHITECTURAL CONSTRAINTS ⚠️
//
// CRITICAL RULES:
// - This is a THIN integration layer ONLY
// - DO NOT add policy, enforcement, or retry logic here
// - All reconciliation logic MUST be in guardian-core
// - Configuration is via environment variables ONLY
//
// The guardiand binary is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing the runtime
// 3. Wiring the router client, registry store, and resolver control
// 4. Starting the scan engine and sync worker (`run`), or running one
//    operator action followed by a full sync
//
// ## Commands
//
// - `guardiand run` (default): long-lived daemon
// - `guardiand sync`: one full firewall + DNS sync
// - `guardiand set <mac> <pending|approved|blocked>`
// - `guardiand redirect <mac> <domain>`
// - `guardiand unredirect <mac>`
// - `guardiand refresh-name <mac>`: re-resolve a device's name from its IP
// - `guardiand import`: add every connected, unknown client as approved
// - `guardiand reset`: archive the registry and start over
//
// ## Configuration
//
// ### Router
// - `GUARDIAN_ROUTER_HOST`: Router base URL (e.g. `https://192.168.1.1`)
// - `GUARDIAN_ROUTER_SITE`: Network site (default: `default`)
// - `GUARDIAN_ROUTER_USERNAME`: Login user
// - `GUARDIAN_ROUTER_PASSWORD`: Login password
// - `GUARDIAN_ROUTER_TIMEOUT_SECS`: Per-request timeout (default: 5)
// - `GUARDIAN_ROUTER_VERIFY_TLS`: Verify the router certificate (default: false)
//
// ### Registry
// - `GUARDIAN_REGISTRY_PATH`: Registry file (default: `/var/lib/guardian/whitelist.json`)
// - `GUARDIAN_BACKUP_DIR`: Reset archives (default: `backups/` next to the registry)
//
// ### Resolver
// - `GUARDIAN_DNS_FRAGMENT_PATH`: Override fragment
//   (default: `/etc/unbound/unbound.conf.d/guardian-overrides.conf`)
// - `GUARDIAN_DNS_RELOAD_COMMAND`: Reload command, whitespace separated
//   (default: `systemctl restart unbound`)
// - `GUARDIAN_DNS_RELOAD_TIMEOUT_SECS`: Reload timeout (default: 30)
//
// ### Audit
// - `GUARDIAN_AUDIT_LOG`: Audit log file (unset disables the audit trail)
//
// ### Engine
// - `GUARDIAN_SCAN_INTERVAL_SECS`: Polling interval (default: 30)
// - `GUARDIAN_REFETCH_DELAY_SECS`: Pause before the re-fetch (default: 1)
// - `GUARDIAN_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export GUARDIAN_ROUTER_HOST=https://192.168.1.1
// export GUARDIAN_ROUTER_USERNAME=guardian
// export GUARDIAN_ROUTER_PASSWORD=your_password
// export GUARDIAN_AUDIT_LOG=/var/log/guardian/audit.log
//
// guardiand run
// guardiand redirect aa:bb:cc:dd:ee:ff kids.example.org
// ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use guardian_core::config::GuardianConfig;
use guardian_core::sync::{DnsOutcome, SyncReport};
use guardian_core::{
    AuditLog, CommandReloader, DeviceRecord, DeviceStatus, DnsOverrideSync, EngineEvent,
    FileRegistryStore, FirewallSync, MacAddress, RegistryHandle, RouterClient, ScanEngine,
    SyncCoordinator, SyncScope, SyncWorker, SystemHostnameLookup, operator,
};
use guardian_router_unifi::UnifiClient;
use secrecy::SecretString;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown or completed command
/// - 1: Configuration error or invalid arguments
/// - 2: Runtime error (unexpected)
/// - 3: Router authentication or client fetch failed where no retry is possible
#[derive(Debug, Clone, Copy)]
enum GuardianExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
    /// Bootstrap could not reach the router
    RouterUnavailable = 3,
}

impl From<GuardianExitCode> for ExitCode {
    fn from(code: GuardianExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Network access guardian
#[derive(Debug, Parser)]
#[command(name = "guardiand", version, about)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GUARDIAN_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scan loop and sync worker until SIGINT/SIGTERM
    Run,
    /// Run one full firewall and DNS sync
    Sync,
    /// Set a device's status
    Set {
        /// Device MAC address
        mac: String,
        /// pending, approved or blocked
        status: String,
    },
    /// Redirect a device's DNS to a domain
    Redirect {
        /// Device MAC address
        mac: String,
        /// Redirect target
        domain: String,
    },
    /// Remove a device's redirect and approve it
    Unredirect {
        /// Device MAC address
        mac: String,
    },
    /// Re-resolve a device's name by reverse lookup of its IP
    RefreshName {
        /// Device MAC address
        mac: String,
    },
    /// Add every connected client the registry does not know as approved
    Import,
    /// Archive the registry and start over with an empty one
    Reset,
}

/// Load configuration from environment variables
fn config_from_env() -> Result<GuardianConfig> {
    let mut config = GuardianConfig::new();

    config.router.host = env::var("GUARDIAN_ROUTER_HOST").unwrap_or_default();
    if let Ok(site) = env::var("GUARDIAN_ROUTER_SITE") {
        config.router.site = site;
    }
    config.router.username = env::var("GUARDIAN_ROUTER_USERNAME").unwrap_or_default();
    config.router.password = SecretString::from(env::var("GUARDIAN_ROUTER_PASSWORD").unwrap_or_default());
    if let Some(timeout) = env_parse("GUARDIAN_ROUTER_TIMEOUT_SECS")? {
        config.router.timeout_secs = timeout;
    }
    if let Some(verify) = env_parse("GUARDIAN_ROUTER_VERIFY_TLS")? {
        config.router.verify_tls = verify;
    }

    if let Ok(path) = env::var("GUARDIAN_REGISTRY_PATH") {
        config.registry.path = PathBuf::from(path);
    }
    config.registry.backup_dir = env::var("GUARDIAN_BACKUP_DIR").ok().map(PathBuf::from);

    if let Ok(path) = env::var("GUARDIAN_DNS_FRAGMENT_PATH") {
        config.resolver.fragment_path = PathBuf::from(path);
    }
    if let Ok(command) = env::var("GUARDIAN_DNS_RELOAD_COMMAND") {
        config.resolver.reload_command = command.split_whitespace().map(str::to_string).collect();
    }
    if let Some(timeout) = env_parse("GUARDIAN_DNS_RELOAD_TIMEOUT_SECS")? {
        config.resolver.reload_timeout_secs = timeout;
    }

    config.audit.path = env::var("GUARDIAN_AUDIT_LOG").ok().map(PathBuf::from);

    if let Some(interval) = env_parse("GUARDIAN_SCAN_INTERVAL_SECS")? {
        config.engine.scan_interval_secs = interval;
    }
    if let Some(delay) = env_parse("GUARDIAN_REFETCH_DELAY_SECS")? {
        config.engine.refetch_delay_secs = delay;
    }

    Ok(config)
}

/// Parse an optional environment variable
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        _ => Ok(None),
    }
}

/// Validate the configuration
///
/// Runs the library checks, then the ranges and formats only the daemon
/// cares about.
fn validate(config: &GuardianConfig, log_level: &str) -> Result<()> {
    config.validate().map_err(|e| {
        anyhow::anyhow!(
            "{}. Set GUARDIAN_ROUTER_HOST, GUARDIAN_ROUTER_USERNAME and GUARDIAN_ROUTER_PASSWORD",
            e
        )
    })?;

    let host = Url::parse(config.router.host.trim())
        .with_context(|| format!("GUARDIAN_ROUTER_HOST is not a valid URL: {}", config.router.host))?;
    if host.host_str().is_none() {
        anyhow::bail!("GUARDIAN_ROUTER_HOST has no host: {}", host);
    }
    if host.scheme() == "http" {
        eprintln!(
            "WARNING: GUARDIAN_ROUTER_HOST uses HTTP (not HTTPS). \
            The router password is sent in clear text."
        );
    }

    if !(1..=120).contains(&config.router.timeout_secs) {
        anyhow::bail!(
            "GUARDIAN_ROUTER_TIMEOUT_SECS must be between 1 and 120 seconds. Got: {}",
            config.router.timeout_secs
        );
    }

    if !(5..=3600).contains(&config.engine.scan_interval_secs) {
        anyhow::bail!(
            "GUARDIAN_SCAN_INTERVAL_SECS must be between 5 and 3600 seconds. Got: {}",
            config.engine.scan_interval_secs
        );
    }

    if config.engine.refetch_delay_secs > 60 {
        anyhow::bail!(
            "GUARDIAN_REFETCH_DELAY_SECS must be at most 60 seconds. Got: {}",
            config.engine.refetch_delay_secs
        );
    }

    if !(1..=600).contains(&config.resolver.reload_timeout_secs) {
        anyhow::bail!(
            "GUARDIAN_DNS_RELOAD_TIMEOUT_SECS must be between 1 and 600 seconds. Got: {}",
            config.resolver.reload_timeout_secs
        );
    }

    require_parent_dir("GUARDIAN_DNS_FRAGMENT_PATH", &config.resolver.fragment_path)?;

    match log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => anyhow::bail!(
            "GUARDIAN_LOG_LEVEL '{}' is not valid. \
            Valid levels: trace, debug, info, warn, error",
            log_level
        ),
    }

    Ok(())
}

/// The resolver's include directory must already exist
fn require_parent_dir(name: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        anyhow::bail!(
            "{} parent directory does not exist: {}. \
            Create it first: sudo mkdir -p {}",
            name,
            parent.display(),
            parent.display()
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration from environment
    let config = match config_from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return GuardianExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = validate(&config, &cli.log_level) {
        eprintln!("Configuration validation error: {}", e);
        return GuardianExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return GuardianExitCode::ConfigError.into();
    }

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return GuardianExitCode::RuntimeError.into();
        }
    };

    let command = cli.command.unwrap_or(Command::Run);
    let result = rt.block_on(async {
        match execute(command, config).await {
            Ok(()) => GuardianExitCode::CleanShutdown,
            Err(e) => {
                error!("{:#}", e);
                exit_code_for(&e)
            }
        }
    });

    result.into()
}

/// Map a failure to its exit code
fn exit_code_for(e: &anyhow::Error) -> GuardianExitCode {
    match e.downcast_ref::<guardian_core::Error>() {
        Some(inner) if inner.is_transient() => GuardianExitCode::RouterUnavailable,
        Some(guardian_core::Error::Config(_) | guardian_core::Error::InvalidInput(_)) => {
            GuardianExitCode::ConfigError
        }
        _ => GuardianExitCode::RuntimeError,
    }
}

/// Wired components shared by every command
struct Components {
    router: Arc<UnifiClient>,
    registry: RegistryHandle,
    audit: AuditLog,
    worker: SyncWorker,
}

impl Components {
    async fn build(config: &GuardianConfig) -> Result<Self> {
        let router = Arc::new(UnifiClient::new(&config.router)?);

        let mut store = FileRegistryStore::new(&config.registry.path)
            .await
            .with_context(|| format!("Failed to open registry at {}", config.registry.path.display()))?;
        if let Some(dir) = &config.registry.backup_dir {
            store = store.with_archive_dir(dir);
        }
        let registry = RegistryHandle::new(Arc::new(store));

        let audit = match &config.audit.path {
            Some(path) => AuditLog::new(path),
            None => AuditLog::disabled(),
        };

        let reloader = CommandReloader::new(
            &config.resolver.reload_command,
            Duration::from_secs(config.resolver.reload_timeout_secs),
        )?;

        let worker = SyncWorker::new(
            registry.clone(),
            FirewallSync::new(router.clone(), audit.clone()),
            DnsOverrideSync::new(&config.resolver.fragment_path, Arc::new(reloader), audit.clone()),
        );

        Ok(Self {
            router,
            registry,
            audit,
            worker,
        })
    }
}

async fn execute(command: Command, config: GuardianConfig) -> Result<()> {
    let components = Components::build(&config).await?;

    match command {
        Command::Run => run_daemon(components, &config).await,
        Command::Sync => {
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::Set { mac, status } => {
            let mac = MacAddress::parse(&mac)?;
            let status = DeviceStatus::parse_plain(&status)?;
            let record = operator::set_status(&components.registry, &mac, status).await?;
            print_record(&mac, &record);
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::Redirect { mac, domain } => {
            let mac = MacAddress::parse(&mac)?;
            let record = operator::set_redirect(&components.registry, &mac, &domain).await?;
            print_record(&mac, &record);
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::Unredirect { mac } => {
            let mac = MacAddress::parse(&mac)?;
            let record = operator::clear_redirect(&components.registry, &mac).await?;
            print_record(&mac, &record);
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::RefreshName { mac } => {
            let mac = MacAddress::parse(&mac)?;
            let lookup = SystemHostnameLookup::new();
            let record = operator::refresh_name(&components.registry, &mac, &lookup).await?;
            print_record(&mac, &record);
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::Import => {
            let router: &dyn RouterClient = components.router.as_ref();
            let added = operator::import_clients(&components.registry, router).await?;
            println!("Imported {} device(s)", added);
            run_sync(&components.worker).await;
            Ok(())
        }
        Command::Reset => {
            match operator::reset_all(&components.registry).await? {
                Some(path) => println!("Registry archived to {}", path.display()),
                None => println!("Registry was empty, nothing archived"),
            }
            run_sync(&components.worker).await;
            Ok(())
        }
    }
}

fn print_record(mac: &MacAddress, record: &DeviceRecord) {
    match record.status.redirect_domain() {
        Some(domain) => println!("{} ({}) -> redirected to {}", mac, record.name, domain),
        None => println!("{} ({}) -> {}", mac, record.name, record.status),
    }
}

/// Run a full sync and log its outcome
///
/// Per-device failures are reported but never change the exit status.
async fn run_sync(worker: &SyncWorker) {
    let report = worker.sync_once(SyncScope::All).await;
    log_report(&report);
}

fn log_report(report: &SyncReport) {
    if let Some(firewall) = &report.firewall {
        info!(
            "Firewall: {} unblocked, {} blocked, {} failed",
            firewall.unblocked,
            firewall.blocked,
            firewall.failed.len()
        );
        for mac in &firewall.failed {
            warn!("Firewall command failed for {}", mac);
        }
    }
    if let Some(dns) = &report.dns {
        match &dns.outcome {
            DnsOutcome::Applied => info!("DNS: {} rule(s) applied, {} skipped", dns.rules, dns.skipped),
            DnsOutcome::WriteFailed(e) => warn!("DNS: fragment not written: {}", e),
            DnsOutcome::ReloadFailed(e) => warn!("DNS: fragment written, reload failed: {}", e),
        }
    }
    for e in &report.errors {
        warn!("Sync step skipped: {}", e);
    }
}

/// Run the daemon
async fn run_daemon(components: Components, config: &GuardianConfig) -> Result<()> {
    info!("Starting guardiand daemon");
    info!(
        "Router: {} (site '{}'), registry: {}",
        components.router.base_url(),
        config.router.site,
        config.registry.path.display()
    );

    let Components {
        router,
        registry,
        audit,
        worker,
    } = components;

    // Sync worker
    let (coordinator, requests) = SyncCoordinator::channel(config.engine.sync_queue_capacity);
    let (worker_shutdown_tx, worker_shutdown_rx) = oneshot::channel();
    let worker_task = tokio::spawn(async move {
        worker.run(requests, Some(worker_shutdown_rx)).await;
    });

    // Scan engine
    let (engine, events) = ScanEngine::new(router, registry, &config.engine, audit)?;
    let engine = engine.with_sync(coordinator);
    tokio::spawn(log_events(events));

    // Signals
    let (engine_shutdown_tx, engine_shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Shutdown handler error: {}", e),
        }
        let _ = engine_shutdown_tx.send(());
    });

    let result = engine.run_with_shutdown(Some(engine_shutdown_rx)).await;

    info!("Shutting down daemon");
    let _ = worker_shutdown_tx.send(());
    if let Err(e) = worker_task.await {
        warn!("Sync worker did not stop cleanly: {}", e);
    }

    result.context("Scan engine failed")?;
    Ok(())
}

/// Log engine events for operators
async fn log_events(mut events: mpsc::Receiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::DeviceDiscovered { mac, ip, status } => {
                info!("New device {} ({}) recorded as {}", mac, ip, status)
            }
            EngineEvent::BlockFailed { mac, error } => {
                warn!("Initial block failed for {}: {}", mac, error)
            }
            other => debug!("Engine event: {:?}", other),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
