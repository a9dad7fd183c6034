//! Shared fixtures and fault-injecting store wrappers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use bitizien_accrual::{AccrualEngine, MemoryStore};
use bitizien_core::clock::ManualClock;
use bitizien_core::config::MiningConfig;
use bitizien_core::error::StoreError;
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::{
    Account, AccountId, AccrualWrite, CasOutcome, LedgerEntry, RecordedEntry, Timestamp,
};

/// Fixed start time for deterministic clocks.
pub const START: Timestamp = Timestamp(1_700_000_000_000);

pub const HOUR: Duration = Duration::from_secs(3600);

/// Engine over an in-memory store with a manual clock at [`START`].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub engine: Arc<AccrualEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MiningConfig::default())
    }

    pub fn with_config(config: MiningConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(START));
        let engine = AccrualEngine::new(store.clone(), store.clone(), clock.clone(), config)
            .expect("valid config");
        Self {
            store,
            clock,
            engine: Arc::new(engine),
        }
    }

    /// Register `n` accounts named `acct-0..n`, returning their ids.
    pub async fn register(&self, n: usize) -> Vec<AccountId> {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            let account = Account::new(format!("acct-{i}"));
            ids.push(account.id.clone());
            self.store.create_account(account).await.unwrap();
        }
        ids
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert `balance == accrued_total == ledger sum` for every account.
///
/// Holds for accounts registered with a zero balance.
pub async fn assert_ledger_matches<S>(store: &S)
where
    S: AccountStore + Ledger,
{
    for id in store.list_account_ids().await.unwrap() {
        let account = store.get(&id).await.unwrap().unwrap();
        let sum = store.sum_for(&id).await.unwrap();
        assert_eq!(account.balance, sum, "balance of {id} diverged from ledger");
        assert_eq!(account.accrued_total, sum, "accrued total of {id} diverged");
    }
}

fn injected(what: &str) -> StoreError {
    StoreError::Unavailable(format!("injected {what} failure"))
}

/// Decrement `counter` if positive; `true` when a failure was consumed.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ---------------------------------------------------------------------------
// Account store wrappers
// ---------------------------------------------------------------------------

/// Fails reads of selected accounts and, optionally, the next few account
/// listings; everything else passes through.
pub struct FlakyAccounts<S> {
    inner: Arc<S>,
    broken: Mutex<HashSet<AccountId>>,
    listing_failures: AtomicU32,
}

impl<S> FlakyAccounts<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            broken: Mutex::new(HashSet::new()),
            listing_failures: AtomicU32::new(0),
        }
    }

    pub fn fail_listings(&self, n: u32) {
        self.listing_failures.store(n, Ordering::SeqCst);
    }

    pub fn break_account(&self, id: &AccountId) {
        self.broken.lock().insert(id.clone());
    }

    pub fn heal(&self) {
        self.broken.lock().clear();
    }

    fn check(&self, id: &AccountId) -> Result<(), StoreError> {
        if self.broken.lock().contains(id) {
            Err(injected("read"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: AccountStore> AccountStore for FlakyAccounts<S> {
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.check(id)?;
        self.inner.get(id).await
    }

    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError> {
        self.check(id)?;
        self.inner
            .compare_and_swap_balance(id, expected_last_accrual, write)
            .await
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        if take_one(&self.listing_failures) {
            return Err(injected("listing"));
        }
        self.inner.list_account_ids().await
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.create_account(account).await
    }

    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError> {
        self.inner.set_circle_size(id, circle_size).await
    }

    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError> {
        self.inner.set_boost(id, boost_bps).await
    }

    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError> {
        self.inner.rebase_accrued(id, expected, new_total).await
    }
}

/// Delays reads of every account by a fixed duration.
pub struct SlowAccounts<S> {
    inner: Arc<S>,
    delay: Duration,
}

impl<S> SlowAccounts<S> {
    pub fn new(inner: Arc<S>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: AccountStore> AccountStore for SlowAccounts<S> {
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError> {
        self.inner
            .compare_and_swap_balance(id, expected_last_accrual, write)
            .await
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        self.inner.list_account_ids().await
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.create_account(account).await
    }

    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError> {
        self.inner.set_circle_size(id, circle_size).await
    }

    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError> {
        self.inner.set_boost(id, boost_bps).await
    }

    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError> {
        self.inner.rebase_accrued(id, expected, new_total).await
    }
}

/// Where a [`StalledCas`] stalls relative to applying the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stall {
    /// The write lands, then the acknowledgement is delayed.
    AfterApply,
    /// The call hangs before the write reaches the store.
    BeforeApply,
}

/// Stalls every compare-and-swap by a fixed duration.
pub struct StalledCas<S> {
    inner: Arc<S>,
    delay: Duration,
    stall: Stall,
}

impl<S> StalledCas<S> {
    pub fn new(inner: Arc<S>, delay: Duration, stall: Stall) -> Self {
        Self {
            inner,
            delay,
            stall,
        }
    }
}

#[async_trait]
impl<S: AccountStore> AccountStore for StalledCas<S> {
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.get(id).await
    }

    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError> {
        if self.stall == Stall::BeforeApply {
            tokio::time::sleep(self.delay).await;
        }
        let outcome = self
            .inner
            .compare_and_swap_balance(id, expected_last_accrual, write)
            .await?;
        if self.stall == Stall::AfterApply {
            tokio::time::sleep(self.delay).await;
        }
        Ok(outcome)
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        self.inner.list_account_ids().await
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.create_account(account).await
    }

    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError> {
        self.inner.set_circle_size(id, circle_size).await
    }

    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError> {
        self.inner.set_boost(id, boost_bps).await
    }

    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError> {
        self.inner.rebase_accrued(id, expected, new_total).await
    }
}

// ---------------------------------------------------------------------------
// Ledger wrapper
// ---------------------------------------------------------------------------

/// Fails the next `n` appends; reads always pass through.
pub struct FailingLedger<L> {
    inner: Arc<L>,
    failures_left: AtomicU32,
}

impl<L> FailingLedger<L> {
    pub fn new(inner: Arc<L>) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(0),
        }
    }

    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn failures_left(&self) -> u32 {
        self.failures_left.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<L: Ledger> Ledger for FailingLedger<L> {
    async fn append(&self, entry: LedgerEntry) -> Result<u64, StoreError> {
        if take_one(&self.failures_left) {
            return Err(injected("append"));
        }
        self.inner.append(entry).await
    }

    async fn entries_for(&self, id: &AccountId) -> Result<Vec<RecordedEntry>, StoreError> {
        self.inner.entries_for(id).await
    }
}
