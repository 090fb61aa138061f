//! Test doubles and common utilities for contract tests
//!
//! This module provides minimal test doubles that record how the core drives
//! its collaborators, with failure injection where a contract depends on it.

#![allow(dead_code)]

use guardian_core::config::EngineConfig;
use guardian_core::error::{Error, Result};
use guardian_core::model::{DeviceRecord, DeviceStatus, MacAddress, Registry};
use guardian_core::traits::{AuthContext, ClientInfo, ResolverControl, RouterClient};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One block/unblock command seen by the mock router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCall {
    pub mac: MacAddress,
    pub blocked: bool,
}

/// A mock RouterClient that records calls and fails on demand
pub struct MockRouter {
    /// Client list returned by list_clients()
    clients: Arc<Mutex<Vec<ClientInfo>>>,
    /// Scripted list_clients() failures, consumed front to back (true = fail)
    fetch_script: Arc<Mutex<VecDeque<bool>>>,
    /// Fail every list_clients() call
    fetch_always_fails: Arc<Mutex<bool>>,
    /// Fail every login() call
    login_fails: Arc<Mutex<bool>>,
    /// MACs whose set_blocked() fails
    failing_macs: Arc<Mutex<HashSet<MacAddress>>>,
    /// MACs whose next set_blocked() fails once
    failing_once: Arc<Mutex<HashSet<MacAddress>>>,
    /// Call counter for login()
    login_call_count: Arc<AtomicUsize>,
    /// Call counter for list_clients()
    fetch_call_count: Arc<AtomicUsize>,
    /// Recorded set_blocked() calls
    block_calls: Arc<Mutex<Vec<BlockCall>>>,
}

impl MockRouter {
    pub fn new(clients: Vec<ClientInfo>) -> Self {
        Self {
            clients: Arc::new(Mutex::new(clients)),
            fetch_script: Arc::new(Mutex::new(VecDeque::new())),
            fetch_always_fails: Arc::new(Mutex::new(false)),
            login_fails: Arc::new(Mutex::new(false)),
            failing_macs: Arc::new(Mutex::new(HashSet::new())),
            failing_once: Arc::new(Mutex::new(HashSet::new())),
            login_call_count: Arc::new(AtomicUsize::new(0)),
            fetch_call_count: Arc::new(AtomicUsize::new(0)),
            block_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a new MockRouter that shares state and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            clients: Arc::clone(&other.clients),
            fetch_script: Arc::clone(&other.fetch_script),
            fetch_always_fails: Arc::clone(&other.fetch_always_fails),
            login_fails: Arc::clone(&other.login_fails),
            failing_macs: Arc::clone(&other.failing_macs),
            failing_once: Arc::clone(&other.failing_once),
            login_call_count: Arc::clone(&other.login_call_count),
            fetch_call_count: Arc::clone(&other.fetch_call_count),
            block_calls: Arc::clone(&other.block_calls),
        }
    }

    pub fn set_clients(&self, clients: Vec<ClientInfo>) {
        *self.clients.lock().unwrap() = clients;
    }

    /// Queue outcomes for the next list_clients() calls (true = fail)
    pub fn script_fetches(&self, outcomes: &[bool]) {
        self.fetch_script.lock().unwrap().extend(outcomes.iter().copied());
    }

    pub fn set_fetch_fails(&self, fails: bool) {
        *self.fetch_always_fails.lock().unwrap() = fails;
    }

    pub fn set_login_fails(&self, fails: bool) {
        *self.login_fails.lock().unwrap() = fails;
    }

    pub fn fail_block_for(&self, mac: &MacAddress) {
        self.failing_macs.lock().unwrap().insert(mac.clone());
    }

    /// Reject the next set_blocked() for `mac` as a stale session would
    pub fn fail_next_block_for(&self, mac: &MacAddress) {
        self.failing_once.lock().unwrap().insert(mac.clone());
    }

    pub fn login_call_count(&self) -> usize {
        self.login_call_count.load(Ordering::SeqCst)
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_call_count.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> Vec<BlockCall> {
        self.block_calls.lock().unwrap().clone()
    }

    /// set_blocked() calls for one MAC
    pub fn calls_for(&self, mac: &MacAddress) -> Vec<bool> {
        self.block_calls()
            .into_iter()
            .filter(|call| &call.mac == mac)
            .map(|call| call.blocked)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.block_calls.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl RouterClient for MockRouter {
    async fn login(&self) -> Result<AuthContext> {
        self.login_call_count.fetch_add(1, Ordering::SeqCst);
        if *self.login_fails.lock().unwrap() {
            return Err(Error::auth("login rejected (HTTP 401)"));
        }
        Ok(AuthContext::new(Some("csrf-test".to_string())))
    }

    async fn list_clients(&self, _ctx: &AuthContext) -> Result<Vec<ClientInfo>> {
        self.fetch_call_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetch_script.lock().unwrap().pop_front();
        if scripted == Some(true) || *self.fetch_always_fails.lock().unwrap() {
            return Err(Error::fetch("router returned HTTP 401"));
        }
        Ok(self.clients.lock().unwrap().clone())
    }

    async fn set_blocked(&self, _ctx: &AuthContext, mac: &MacAddress, blocked: bool) -> Result<()> {
        self.block_calls.lock().unwrap().push(BlockCall {
            mac: mac.clone(),
            blocked,
        });
        if self.failing_once.lock().unwrap().remove(mac) {
            return Err(Error::enforcement(mac.as_str(), "router returned HTTP 403"));
        }
        if self.failing_macs.lock().unwrap().contains(mac) {
            return Err(Error::enforcement(mac.as_str(), "router returned HTTP 500"));
        }
        Ok(())
    }

    fn client_name(&self) -> &'static str {
        "mock"
    }
}

/// A mock ResolverControl that counts reloads
pub struct MockResolver {
    reload_call_count: Arc<AtomicUsize>,
    fails: Arc<Mutex<bool>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            reload_call_count: Arc::new(AtomicUsize::new(0)),
            fails: Arc::new(Mutex::new(false)),
        }
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            reload_call_count: Arc::clone(&other.reload_call_count),
            fails: Arc::clone(&other.fails),
        }
    }

    pub fn set_fails(&self, fails: bool) {
        *self.fails.lock().unwrap() = fails;
    }

    pub fn reload_call_count(&self) -> usize {
        self.reload_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResolverControl for MockResolver {
    async fn reload(&self) -> Result<()> {
        self.reload_call_count.fetch_add(1, Ordering::SeqCst);
        if *self.fails.lock().unwrap() {
            return Err(Error::config_reload("unbound.service failed"));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "mock reload".to_string()
    }
}

pub fn mac(s: &str) -> MacAddress {
    MacAddress::parse(s).expect("valid test MAC")
}

pub fn client(mac_str: &str, ip: &str, hostname: Option<&str>) -> ClientInfo {
    ClientInfo::new(mac(mac_str), Some(ip.to_string()), hostname.map(str::to_string))
}

/// Registry built from (mac, ip, status) triples
pub fn registry_of(entries: &[(&str, &str, DeviceStatus)]) -> Registry {
    let mut registry = Registry::new();
    for (mac_str, ip, status) in entries {
        registry.insert(mac(mac_str), DeviceRecord::discovered(*ip, "device", status.clone()));
    }
    registry
}

/// Engine settings for tests: no re-fetch delay, small event channel
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        scan_interval_secs: 30,
        refetch_delay_secs: 0,
        event_channel_capacity: 100,
        sync_queue_capacity: 16,
    }
}

/// Engine wired to a mock router sharing counters with `router`
pub fn engine_for(
    router: &MockRouter,
    store: Arc<dyn guardian_core::traits::RegistryStore>,
) -> (
    guardian_core::ScanEngine,
    tokio::sync::mpsc::Receiver<guardian_core::EngineEvent>,
) {
    guardian_core::ScanEngine::new(
        Arc::new(MockRouter::sharing_counters_with(router)),
        guardian_core::RegistryHandle::new(store),
        &test_engine_config(),
        guardian_core::AuditLog::disabled(),
    )
    .expect("engine construction succeeds")
}

/// Drain every event currently queued
pub fn drain_events(
    rx: &mut tokio::sync::mpsc::Receiver<guardian_core::EngineEvent>,
) -> Vec<guardian_core::EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
