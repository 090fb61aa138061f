//! Contract Test: Engine-Owned Retry Logic
//!
//! This test verifies that the retry policy for router failures is bounded
//! and owned by the engine.
//!
//! Constraints verified:
//! - A failed fetch triggers at most one re-login and one re-fetch per tick
//! - A tick whose fetch keeps failing is skipped and never touches the registry
//! - Login and fetch failures at bootstrap are fatal and never retried
//!
//! Architectural boundaries:
//! - ✅ ENGINE: Owns re-login and re-fetch
//! - ❌ ROUTER CLIENT: Must NOT retry on its own

mod common;

use common::*;
use guardian_core::error::Error;
use guardian_core::model::DeviceStatus;
use guardian_core::store::{FileRegistryStore, MemoryRegistryStore};
use guardian_core::traits::RegistryStore;
use guardian_core::{EngineEvent, TickOutcome};
use std::sync::Arc;

#[tokio::test]
async fn failed_fetch_relogs_in_and_refetches_once() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    let store = MemoryRegistryStore::new();
    let (engine, _events) = engine_for(&router, Arc::new(store.clone()));
    engine.bootstrap().await.unwrap();
    assert_eq!(router.login_call_count(), 1);
    assert_eq!(router.fetch_call_count(), 1);

    router.script_fetches(&[true]);
    let outcome = engine.tick().await.unwrap();

    assert!(matches!(outcome, TickOutcome::Completed(_)), "got {:?}", outcome);
    assert_eq!(router.login_call_count(), 2, "exactly one re-login");
    assert_eq!(router.fetch_call_count(), 3, "failed fetch plus one re-fetch");
}

#[tokio::test]
async fn repeated_fetch_failure_skips_tick() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    let store = MemoryRegistryStore::new();
    let (engine, mut events) = engine_for(&router, Arc::new(store.clone()));
    engine.bootstrap().await.unwrap();
    drain_events(&mut events);

    router.set_fetch_fails(true);
    let outcome = engine.tick().await.unwrap();

    assert!(matches!(outcome, TickOutcome::Skipped { .. }), "got {:?}", outcome);
    assert_eq!(router.login_call_count(), 2);
    assert_eq!(router.fetch_call_count(), 3);
    assert_eq!(store.save_count(), 1, "only the bootstrap wrote");
    assert!(matches!(
        drain_events(&mut events).as_slice(),
        [EngineEvent::TickSkipped { .. }]
    ));
}

#[tokio::test]
async fn login_failure_during_tick_skips_without_refetch() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    let store = MemoryRegistryStore::new();
    let (engine, _events) = engine_for(&router, Arc::new(store.clone()));
    engine.bootstrap().await.unwrap();

    router.script_fetches(&[true]);
    router.set_login_fails(true);
    let outcome = engine.tick().await.unwrap();

    assert!(matches!(outcome, TickOutcome::Skipped { .. }));
    assert_eq!(router.fetch_call_count(), 2, "no re-fetch without a session");

    // The next tick starts with a fresh login
    router.set_login_fails(false);
    let outcome = engine.tick().await.unwrap();
    assert!(matches!(outcome, TickOutcome::Completed(_)));
    assert_eq!(router.login_call_count(), 3);
}

#[tokio::test]
async fn skipped_tick_leaves_registry_file_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("whitelist.json");
    std::fs::write(
        &path,
        r#"{
  "AA:BB:CC:DD:EE:01": {"ip": "10.0.0.5", "status": "approved", "note": "hand-edited"}
}"#,
    )
    .unwrap();
    let before = std::fs::read(&path).unwrap();

    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:02", "10.0.0.6", None)]);
    router.set_fetch_fails(true);
    let store: Arc<dyn RegistryStore> = Arc::new(FileRegistryStore::new(&path).await.unwrap());
    let (engine, _events) = engine_for(&router, store);

    for _ in 0..3 {
        let outcome = engine.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Skipped { .. }));
    }

    assert_eq!(std::fs::read(&path).unwrap(), before);
    assert!(router.block_calls().is_empty());
}

#[tokio::test]
async fn bootstrap_login_failure_is_fatal() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    router.set_login_fails(true);
    let store = MemoryRegistryStore::new();
    let (engine, _events) = engine_for(&router, Arc::new(store.clone()));

    let result = engine.bootstrap().await;

    assert!(matches!(result, Err(Error::Auth(_))), "got {:?}", result);
    assert_eq!(router.login_call_count(), 1);
    assert!(store.current().await.is_empty());
}

#[tokio::test]
async fn bootstrap_fetch_failure_is_fatal() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    router.set_fetch_fails(true);
    let store = MemoryRegistryStore::new();
    let (engine, _events) = engine_for(&router, Arc::new(store.clone()));

    let (_shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let result = engine.run_with_shutdown(Some(shutdown_rx)).await;

    assert!(matches!(result, Err(Error::Fetch(_))), "got {:?}", result);
    assert_eq!(router.fetch_call_count(), 1, "bootstrap fetch is not retried");
    assert_eq!(store.save_count(), 0);
}

#[tokio::test]
async fn devices_seen_after_recovery_follow_post_bootstrap_policy() {
    let router = MockRouter::new(vec![client("aa:bb:cc:dd:ee:01", "10.0.0.5", None)]);
    let store = MemoryRegistryStore::new();
    let (engine, _events) = engine_for(&router, Arc::new(store.clone()));
    engine.bootstrap().await.unwrap();

    router.script_fetches(&[true]);
    router.set_clients(vec![client("aa:bb:cc:dd:ee:02", "10.0.0.6", None)]);
    engine.tick().await.unwrap();

    let record = store.current().await.get(&mac("aa:bb:cc:dd:ee:02")).cloned().unwrap();
    assert_eq!(record.status, DeviceStatus::Blocked);
}
