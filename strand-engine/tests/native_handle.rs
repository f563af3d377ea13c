//! Ownership tests for native handles against the in-process engine.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use strand_core::{ConfKind, Engine, NativeHandle, RawHandle, ResourceKind, StrandError};
use strand_engine::{FaultType, MemoryEngine};

fn engine() -> (Arc<MemoryEngine>, Arc<dyn Engine>) {
    let engine = Arc::new(MemoryEngine::new());
    let dyn_engine: Arc<dyn Engine> = engine.clone();
    (engine, dyn_engine)
}

#[test]
fn test_release_is_idempotent() {
    let (engine, dyn_engine) = engine();
    let handle = NativeHandle::create_conf(dyn_engine, ConfKind::Global).unwrap();
    assert!(!handle.is_invalid());
    assert_eq!(engine.live_handles(), 1);

    assert!(handle.release());
    assert!(handle.is_invalid());
    assert!(!handle.release());
    drop(handle);

    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_drop_releases_once() {
    let (engine, dyn_engine) = engine();
    {
        let _global = NativeHandle::create_conf(dyn_engine.clone(), ConfKind::Global).unwrap();
        let _topic = NativeHandle::create_conf(dyn_engine, ConfKind::Topic).unwrap();
        assert_eq!(engine.live_handles(), 2);
    }
    assert_eq!(engine.live_handles(), 0);
    assert_eq!(engine.invalid_frees(), 0);
}

#[test]
fn test_raw_after_release_fails() {
    let (_engine, dyn_engine) = engine();
    let handle = NativeHandle::create_conf(dyn_engine, ConfKind::Topic).unwrap();
    assert!(handle.raw().is_ok());
    handle.release();
    assert_eq!(
        handle.raw(),
        Err(StrandError::InvalidHandle("topic configuration"))
    );
}

#[test]
fn test_null_raw_rejected() {
    let (_engine, dyn_engine) = engine();
    let err = NativeHandle::from_raw(dyn_engine, ResourceKind::Consumer, RawHandle::NULL).unwrap_err();
    assert!(matches!(err, StrandError::CreationFailed(ref what) if what == "consumer"));
}

#[test]
fn test_engine_allocation_failure() {
    let (engine, dyn_engine) = engine();
    engine.faults().arm(FaultType::CreateFailure, 1);
    let err = NativeHandle::create_conf(dyn_engine.clone(), ConfKind::Global).unwrap_err();
    assert!(matches!(err, StrandError::CreationFailed(_)));
    assert_eq!(engine.live_handles(), 0);

    assert!(NativeHandle::create_conf(dyn_engine, ConfKind::Global).is_ok());
}

#[test]
fn test_into_raw_transfers_ownership() {
    let (engine, dyn_engine) = engine();
    let handle = NativeHandle::create_conf(dyn_engine.clone(), ConfKind::Global).unwrap();
    let raw = handle.into_raw().unwrap();
    assert_eq!(engine.live_handles(), 1);

    let adopted = NativeHandle::from_raw(dyn_engine, ResourceKind::Conf(ConfKind::Global), raw).unwrap();
    drop(adopted);
    assert_eq!(engine.live_handles(), 0);
}

#[test]
fn test_concurrent_release_frees_once() {
    let (engine, dyn_engine) = engine();
    let handle = Arc::new(NativeHandle::create_conf(dyn_engine, ConfKind::Global).unwrap());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            std::thread::spawn(move || handle.release())
        })
        .collect();
    let released = threads
        .into_iter()
        .map(|t| t.join().unwrap())
        .filter(|&r| r)
        .count();

    assert_eq!(released, 1);
    assert_eq!(engine.invalid_frees(), 0);
    assert_eq!(engine.live_handles(), 0);
}
