//! Fault-injection tests: store failures, timeouts, and partial commits.
//!
//! A failing account must never stop a sweep, a slow store must surface as
//! `StoreUnavailable` rather than hang, and a balance credited without its
//! ledger entry must be reported and later repaired by reconciliation.

use std::sync::Arc;
use std::time::Duration;

use bitizien_accrual::{AccrualEngine, MemoryStore, Reconciler, Repair};
use bitizien_core::clock::ManualClock;
use bitizien_core::config::MiningConfig;
use bitizien_core::constants::COIN;
use bitizien_core::error::{AccrualError, StoreError};
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::{Account, AccountId};
use bitizien_node::RocksStore;
use bitizien_tests::helpers::{
    assert_ledger_matches, FailingLedger, FlakyAccounts, SlowAccounts, Stall, StalledCas, HOUR,
    START,
};

// ---------------------------------------------------------------------------
// Sweep isolation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_account_does_not_stop_sweep() {
    let store = Arc::new(MemoryStore::new());
    for name in ["alice", "bob", "carol"] {
        store.create_account(Account::new(name)).await.unwrap();
    }
    let flaky = Arc::new(FlakyAccounts::new(store.clone()));
    flaky.break_account(&AccountId::from("bob"));

    let engine = Arc::new(
        AccrualEngine::new(
            flaky.clone(),
            store.clone(),
            Arc::new(ManualClock::new(START)),
            MiningConfig::default(),
        )
        .unwrap(),
    );

    let report = engine.sweep_all().await.unwrap();
    assert_eq!(report.accrued, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(store.get(&AccountId::from("bob")).await.unwrap().unwrap().balance, 0);

    // Once healed, bob accrues on the next sweep; the others are cooling down.
    flaky.heal();
    let report = engine.sweep_all().await.unwrap();
    assert_eq!(report.accrued, 1);
    assert_eq!(report.cooling_down, 2);
    assert_ledger_matches(store.as_ref()).await;
}

#[tokio::test]
async fn read_failure_surfaces_as_store_unavailable() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let flaky = Arc::new(FlakyAccounts::new(store.clone()));
    let id = AccountId::from("alice");
    flaky.break_account(&id);

    let engine = AccrualEngine::new(
        flaky,
        store.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig::default(),
    )
    .unwrap();

    let err = engine.accrue_one(&id).await.unwrap_err();
    assert!(matches!(err, AccrualError::StoreUnavailable(StoreError::Unavailable(_))));
    assert!(err.is_retryable());
    assert_eq!(store.ledger_len(), 0);
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_store_times_out() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let slow = Arc::new(SlowAccounts::new(store.clone(), Duration::from_secs(5)));

    let engine = Arc::new(
        AccrualEngine::new(
            slow,
            store.clone(),
            Arc::new(ManualClock::new(START)),
            MiningConfig {
                store_timeout: Duration::from_millis(20),
                ..MiningConfig::default()
            },
        )
        .unwrap(),
    );

    let err = engine.accrue_one(&AccountId::from("alice")).await.unwrap_err();
    assert_eq!(err, AccrualError::StoreUnavailable(StoreError::Timeout(20)));

    let report = engine.sweep_all().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(store.get(&AccountId::from("alice")).await.unwrap().unwrap().balance, 0);
}

#[tokio::test]
async fn late_acknowledged_write_still_records_entry() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let stalled = Arc::new(StalledCas::new(
        store.clone(),
        Duration::from_millis(200),
        Stall::AfterApply,
    ));

    let engine = AccrualEngine::new(
        stalled,
        store.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig {
            store_timeout: Duration::from_millis(20),
            ..MiningConfig::default()
        },
    )
    .unwrap();

    let out = engine.accrue_one(&AccountId::from("alice")).await.unwrap();
    assert_eq!(out.reward, 10 * COIN);
    assert_eq!(store.ledger_len(), 1);
    assert_ledger_matches(store.as_ref()).await;
}

#[tokio::test]
async fn write_that_never_lands_is_unavailable() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let stalled = Arc::new(StalledCas::new(
        store.clone(),
        Duration::from_millis(200),
        Stall::BeforeApply,
    ));

    let engine = AccrualEngine::new(
        stalled,
        store.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig {
            store_timeout: Duration::from_millis(20),
            ..MiningConfig::default()
        },
    )
    .unwrap();

    let err = engine.accrue_one(&AccountId::from("alice")).await.unwrap_err();
    assert_eq!(err, AccrualError::StoreUnavailable(StoreError::Timeout(20)));
    assert!(err.is_retryable());
    assert_eq!(store.get(&AccountId::from("alice")).await.unwrap().unwrap().balance, 0);
    assert_eq!(store.ledger_len(), 0);
}

// ---------------------------------------------------------------------------
// Partial commits and reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_append_failure_is_retried() {
    let store = Arc::new(MemoryStore::new());
    store.create_account(Account::new("alice")).await.unwrap();
    let ledger = Arc::new(FailingLedger::new(store.clone()));
    ledger.fail_next(2);

    let engine = AccrualEngine::new(
        store.clone(),
        ledger.clone(),
        Arc::new(ManualClock::new(START)),
        MiningConfig::default(),
    )
    .unwrap();

    let out = engine.accrue_one(&AccountId::from("alice")).await.unwrap();
    assert_eq!(out.reward, 10 * COIN);
    assert_eq!(ledger.failures_left(), 0);
    assert_ledger_matches(store.as_ref()).await;
}

#[tokio::test]
async fn partial_commit_reported_then_repaired() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::from("alice");
    store
        .create_account(Account::new("alice").with_circle(3))
        .await
        .unwrap();
    let ledger = Arc::new(FailingLedger::new(store.clone()));
    let clock = Arc::new(ManualClock::new(START));

    let engine = AccrualEngine::new(
        store.clone(),
        ledger.clone(),
        clock.clone(),
        MiningConfig::default(),
    )
    .unwrap();

    // First accrual is fully recorded.
    engine.accrue_one(&id).await.unwrap();
    clock.advance(HOUR);

    // Second accrual exhausts every append attempt.
    ledger.fail_next(u32::MAX);
    let err = engine.accrue_one(&id).await.unwrap_err();
    assert_eq!(
        err,
        AccrualError::PartialCommit {
            account: id.clone(),
            amount: 16 * COIN,
            reason: "store unavailable: injected append failure".into(),
        }
    );
    let account = store.get(&id).await.unwrap().unwrap();
    assert_eq!(account.balance, 32 * COIN);
    assert_eq!(store.sum_for(&id).await.unwrap(), 16 * COIN);

    let reconciler = Reconciler::new(store.clone(), store.clone(), Duration::from_secs(1));
    let repair = reconciler.reconcile_account(&id).await.unwrap();
    assert_eq!(repair, Some(Repair::LedgerEntryRestored { seq: 2 }));
    assert_ledger_matches(store.as_ref()).await;

    // The credited balance still blocks a re-grant within the interval.
    ledger.fail_next(0);
    assert!(engine.accrue_one(&id).await.unwrap_err().is_cooldown());
    assert_eq!(store.ledger_len(), 2);
}

#[tokio::test]
async fn unrecorded_grant_is_recorded_before_next_accrual() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::from("alice");
    store.create_account(Account::new("alice")).await.unwrap();
    let ledger = Arc::new(FailingLedger::new(store.clone()));
    let clock = Arc::new(ManualClock::new(START));
    let engine = AccrualEngine::new(
        store.clone(),
        ledger.clone(),
        clock.clone(),
        MiningConfig::default(),
    )
    .unwrap();

    engine.accrue_one(&id).await.unwrap();
    clock.advance(HOUR);
    ledger.fail_next(u32::MAX);
    assert!(matches!(
        engine.accrue_one(&id).await,
        Err(AccrualError::PartialCommit { .. })
    ));

    // The ledger recovers before the next interval.
    ledger.fail_next(0);
    clock.advance(HOUR);
    let out = engine.accrue_one(&id).await.unwrap();
    assert_eq!(out.new_balance, 30 * COIN);
    assert_eq!(store.ledger_len(), 3);
    assert_ledger_matches(store.as_ref()).await;

    // Nothing is left for the reconciler to claw back.
    let reconciler = Reconciler::new(store.clone(), store.clone(), Duration::from_secs(1));
    assert_eq!(reconciler.reconcile_account(&id).await.unwrap(), None);
    assert_eq!(store.get(&id).await.unwrap().unwrap().balance, 30 * COIN);
}

#[tokio::test]
async fn next_accrual_refused_while_grant_unrecorded() {
    let store = Arc::new(MemoryStore::new());
    let id = AccountId::from("alice");
    store.create_account(Account::new("alice")).await.unwrap();
    let ledger = Arc::new(FailingLedger::new(store.clone()));
    let clock = Arc::new(ManualClock::new(START));
    let engine = AccrualEngine::new(
        store.clone(),
        ledger.clone(),
        clock.clone(),
        MiningConfig::default(),
    )
    .unwrap();

    ledger.fail_next(u32::MAX);
    assert!(engine.accrue_one(&id).await.is_err());
    let credited = store.get(&id).await.unwrap().unwrap();

    clock.advance(HOUR);
    let err = engine.accrue_one(&id).await.unwrap_err();
    assert_eq!(
        err,
        AccrualError::PartialCommit {
            account: id.clone(),
            amount: 10 * COIN,
            reason: "store unavailable: injected append failure".into(),
        }
    );
    // The earlier grant is still the last one and still restorable.
    assert_eq!(store.get(&id).await.unwrap().unwrap(), credited);

    let reconciler = Reconciler::new(store.clone(), store.clone(), Duration::from_secs(1));
    assert_eq!(
        reconciler.reconcile_account(&id).await.unwrap(),
        Some(Repair::LedgerEntryRestored { seq: 1 })
    );
    assert_ledger_matches(store.as_ref()).await;
}

#[tokio::test]
async fn rocks_partial_commit_survives_restart_and_reconciles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accrualdata");
    let id = AccountId::from("alice");

    {
        let store = Arc::new(RocksStore::open(&path).unwrap());
        store.create_account(Account::new("alice")).await.unwrap();
        let ledger = Arc::new(FailingLedger::new(store.clone()));
        ledger.fail_next(u32::MAX);
        let engine = AccrualEngine::new(
            store.clone(),
            ledger,
            Arc::new(ManualClock::new(START)),
            MiningConfig::default(),
        )
        .unwrap();
        let err = engine.accrue_one(&id).await.unwrap_err();
        assert!(matches!(err, AccrualError::PartialCommit { .. }));
    }

    let store = Arc::new(RocksStore::open(&path).unwrap());
    assert_eq!(store.ledger_len().unwrap(), 0);
    let report = Reconciler::new(store.clone(), store.clone(), Duration::from_secs(1))
        .reconcile_all()
        .await
        .unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(store.sum_for(&id).await.unwrap(), 10 * COIN);
    assert_ledger_matches(store.as_ref()).await;
}
