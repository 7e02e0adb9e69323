//! Contention tests for the single-flight file lock

#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use yatco_sync::FileLock;

fn worker(dir: &TempDir, owner: &str) -> FileLock {
    FileLock::new(dir.path())
        .with_backoff_unit(Duration::from_millis(10))
        .with_owner_id(owner)
}

#[tokio::test]
async fn test_only_one_of_many_concurrent_acquirers_wins() {
    let dir = TempDir::new().unwrap();
    let winners = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let lock = worker(&dir, &format!("worker-{i}"));
        let winners = winners.clone();
        tasks.push(tokio::spawn(async move {
            if let Ok(handle) = lock.acquire("import", Duration::from_millis(150)).await {
                winners.fetch_add(1, Ordering::SeqCst);
                // Hold past every other worker's timeout.
                tokio::time::sleep(Duration::from_millis(400)).await;
                lock.release(handle);
            }
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(winners.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_waiter_acquires_after_release() {
    let dir = TempDir::new().unwrap();
    let first = worker(&dir, "first");
    let second = worker(&dir, "second");

    let handle = first.acquire("daily_sync", Duration::from_secs(1)).await.unwrap();
    let releaser = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(first.release(handle));
    });

    let started = Instant::now();
    let handle = second
        .acquire("daily_sync", Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
    releaser.await.unwrap();

    let state = second.check_lock("daily_sync").unwrap();
    assert_eq!(state.owner_id, "second");
    assert_eq!(state.lock_name, "daily_sync");
    second.release(handle);
}

#[tokio::test]
async fn test_check_lock_does_not_disturb_holder() {
    let dir = TempDir::new().unwrap();
    let holder = worker(&dir, "holder");
    let observer = worker(&dir, "observer");

    let handle = holder.acquire("import", Duration::from_secs(1)).await.unwrap();
    for _ in 0..3 {
        assert_eq!(observer.check_lock("import").unwrap().owner_id, "holder");
    }
    assert!(observer.acquire("import", Duration::from_millis(50)).await.is_err());

    holder.release(handle);
    assert!(observer.check_lock("import").is_none());
    assert!(observer.acquire("import", Duration::from_millis(50)).await.is_ok());
}
