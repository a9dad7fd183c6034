//! Scheduler behavior around failing and in-flight sweeps.

use std::sync::Arc;
use std::time::Duration;

use bitizien_accrual::{AccrualEngine, MemoryStore, Scheduler, SchedulerState};
use bitizien_core::clock::ManualClock;
use bitizien_core::config::MiningConfig;
use bitizien_core::traits::AccountStore;
use bitizien_core::types::Account;
use bitizien_tests::helpers::{FlakyAccounts, SlowAccounts, START};

async fn wait_for_sweeps(s: &Scheduler, n: u64) {
    for _ in 0..300 {
        if s.sweeps_completed() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {n} sweeps, saw {}", s.sweeps_completed());
}

#[tokio::test]
async fn failed_sweeps_do_not_stop_ticking() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let flaky = Arc::new(FlakyAccounts::new(store.clone()));
    flaky.fail_listings(2);

    let engine = AccrualEngine::new(
        flaky,
        store.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig::default(),
    )
    .unwrap();
    let scheduler = Scheduler::new(Arc::new(engine));

    assert!(scheduler.start(Duration::from_millis(20)));
    wait_for_sweeps(&scheduler, 3).await;

    assert_eq!(scheduler.sweeps_failed(), 2);
    assert_eq!(scheduler.state(), SchedulerState::Running);
    // The first sweep that could list accounts accrued alice.
    assert_eq!(store.ledger_len(), 1);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn shutdown_after_stop_waits_for_in_flight_sweep() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let slow = Arc::new(SlowAccounts::new(store.clone(), Duration::from_millis(200)));

    let engine = AccrualEngine::new(
        slow,
        store.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig::default(),
    )
    .unwrap();
    let scheduler = Scheduler::new(Arc::new(engine));

    scheduler.start(Duration::from_secs(3600));
    // Let the first sweep reach the slow read.
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(scheduler.sweeps_completed(), 0);

    scheduler.shutdown().await;
    assert_eq!(scheduler.sweeps_completed(), 1);
    assert_eq!(store.ledger_len(), 1);
}
