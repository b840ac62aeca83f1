/*!
 * Semaphore Manager Tests
 * Registry lifecycle, permissions, limits and cleanup
 */

use pretty_assertions::assert_eq;
use semset::{
    CreateMode, IPCManager, IpcCleanup, IpcError, SemConfig, SemError, SemManager, SemOpFlags,
    SemOps, SemaphoreChannel, WaitMode, ROOT_PID,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_create_and_reopen() {
    let manager = SemManager::new();

    let id = manager.open("jobs", 4, CreateMode::CreateIfAbsent, 10).unwrap();
    assert!(id > 0);
    assert_eq!(manager.open("jobs", 2, CreateMode::CreateIfAbsent, 11).unwrap(), id);
    assert_eq!(manager.open("jobs", 0, CreateMode::MustExist, 12).unwrap(), id);
    assert_eq!(manager.get(id).unwrap().count(), 4);
}

#[test]
fn test_exclusive_create_conflicts() {
    let manager = SemManager::new();
    manager.open("x", 1, CreateMode::CreateExclusive, 1).unwrap();

    assert_eq!(
        manager.open("x", 1, CreateMode::CreateExclusive, 2),
        Err(SemError::AlreadyExists("x".to_string()))
    );
}

#[test]
fn test_handles_share_state() {
    let manager = SemManager::new();
    let id = manager.open("shared", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    let other = manager.clone();

    let mut ops = SemOps::new();
    ops.increment(0, 3, SemOpFlags::NONE).unwrap();
    other.run(id, 2, &ops, WaitMode::NonBlocking).unwrap();

    assert_eq!(manager.get(id).unwrap().value(0).unwrap(), 3);
}

#[test]
fn test_destroy_permissions() {
    let manager = SemManager::new();
    let a = manager.open("a", 1, CreateMode::CreateIfAbsent, 10).unwrap();
    let b = manager.open("b", 1, CreateMode::CreateIfAbsent, 10).unwrap();

    assert!(matches!(manager.destroy(a, 11), Err(SemError::PermissionDenied(_))));
    manager.destroy(a, 10).unwrap();
    manager.destroy(b, ROOT_PID).unwrap();

    assert!(matches!(manager.get(a), Err(SemError::NotFound(_))));
    assert!(matches!(manager.destroy(a, 10), Err(SemError::NotFound(_))));
    assert_eq!(manager.count(), 0);
}

#[test]
fn test_destroy_wakes_parked_caller() {
    let manager = SemManager::new();
    let id = manager.open("gone", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    let set = manager.get(id).unwrap();

    let waiter = {
        let manager = manager.clone();
        thread::spawn(move || {
            let mut ops = SemOps::new();
            ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
            manager.run(id, 2, &ops, WaitMode::Forever)
        })
    };
    while set.waiter_count() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    manager.destroy(id, 1).unwrap();
    assert_eq!(waiter.join().unwrap(), Err(SemError::Removed(id)));
    // Handles taken before removal observe it too
    assert_eq!(set.value(0), Err(SemError::Removed(id)));
}

#[test]
fn test_name_is_free_after_destroy() {
    let manager = SemManager::new();
    let first = manager.open("reuse", 1, CreateMode::CreateExclusive, 1).unwrap();
    manager.destroy(first, 1).unwrap();

    assert_eq!(manager.lookup("reuse"), None);
    let second = manager.open("reuse", 2, CreateMode::CreateExclusive, 1).unwrap();
    assert_eq!(manager.get(second).unwrap().count(), 2);
}

#[test]
fn test_set_limit() {
    let manager = SemManager::with_config(SemConfig::new().with_max_sets(2));
    manager.open("one", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    let two = manager.open("two", 1, CreateMode::CreateIfAbsent, 1).unwrap();

    assert_eq!(
        manager.open("three", 1, CreateMode::CreateIfAbsent, 1),
        Err(SemError::LimitExceeded(2, 2))
    );

    manager.destroy(two, 1).unwrap();
    manager.open("three", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    assert_eq!(manager.count(), 2);
}

#[test]
fn test_cleanup_process() {
    let manager = SemManager::new();
    manager.open("p1-a", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    manager.open("p1-b", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    let kept = manager.open("p2", 1, CreateMode::CreateIfAbsent, 2).unwrap();

    assert_eq!(manager.cleanup_process(1), 2);
    assert_eq!(manager.cleanup_process(1), 0);

    let remaining: Vec<_> = manager.all_stats().into_iter().map(|s| s.id).collect();
    assert_eq!(remaining, vec![kept]);
}

#[test]
fn test_channel_trait_errors() {
    let ipc = IPCManager::new();
    let channel: &dyn SemaphoreChannel = ipc.sems();

    let id = channel.open("ch", 2, CreateMode::CreateIfAbsent, 1).unwrap();
    channel.set_value(id, 1, 4, 1).unwrap();
    assert_eq!(channel.get_value(id, 1).unwrap(), 4);

    let mut ops = SemOps::new();
    ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
    assert!(matches!(
        channel.apply(id, 1, &ops, WaitMode::NonBlocking),
        Err(IpcError::WouldBlock(_))
    ));
    assert!(matches!(
        channel.apply(id, 1, &ops, WaitMode::Timeout(Duration::from_millis(1))),
        Err(IpcError::Timeout { timeout_ms: Some(1), .. })
    ));
    assert!(matches!(channel.destroy(id, 2), Err(IpcError::PermissionDenied(_))));

    assert_eq!(ipc.cleanup_process(1), 1);
    assert!(matches!(channel.stat(id), Err(IpcError::NotFound(_))));
}

#[test]
fn test_cleanup_cancels_parked_transactions_elsewhere() {
    let manager = SemManager::new();
    let id = manager.open("foreign", 1, CreateMode::CreateIfAbsent, 1).unwrap();
    let set = manager.get(id).unwrap();

    let waiter = {
        let manager = manager.clone();
        thread::spawn(move || {
            let mut ops = SemOps::new();
            ops.decrement(0, 1, SemOpFlags::NONE).unwrap();
            manager.run(id, 2, &ops, WaitMode::Forever)
        })
    };
    while set.ncnt(0).unwrap() == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    // Process 2 owns nothing, but its parked transaction goes away
    assert_eq!(manager.cleanup_process(2), 0);
    assert!(matches!(waiter.join().unwrap(), Err(SemError::Interrupted(_))));
    assert_eq!(set.ncnt(0).unwrap(), 0);
    assert_eq!(manager.count(), 1);
}

#[test]
fn test_open_never_misses_a_set_being_destroyed() {
    let manager = SemManager::new();
    let stop = Arc::new(AtomicBool::new(false));

    let destroyer = {
        let manager = manager.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if let Some(id) = manager.lookup("churn") {
                    // Another round may have destroyed it already
                    let _ = manager.destroy(id, ROOT_PID);
                }
            }
        })
    };

    let openers: Vec<_> = (0..2)
        .map(|pid| {
            let manager = manager.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    manager.open("churn", 1, CreateMode::CreateIfAbsent, pid + 1)?;
                }
                Ok::<(), SemError>(())
            })
        })
        .collect();

    for opener in openers {
        assert_eq!(opener.join().unwrap(), Ok(()));
    }
    stop.store(true, Ordering::SeqCst);
    destroyer.join().unwrap();
    assert!(manager.count() <= 1);
}
