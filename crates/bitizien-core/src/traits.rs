//! Store contracts consumed by the accrual engine.
//!
//! - [`AccountStore`] — account records with compare-and-swap accrual writes
//!   (bitizien-accrual `MemoryStore` and bitizien-node `RocksStore` implement)
//! - [`Ledger`] — append-only accrual history (same implementors)
//!
//! Both are async so every call can be bounded by a timeout at the engine.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{
    Account, AccountId, AccrualWrite, CasOutcome, HistoryPage, LedgerEntry, RecordedEntry,
    Timestamp,
};

/// Durable account records.
///
/// Implementations must make [`compare_and_swap_balance`](Self::compare_and_swap_balance)
/// atomic per account: the write lands only if the stored `last_accrual`
/// still equals `expected_last_accrual`. Different accounts must not
/// serialize on a single global lock.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch an account. `Ok(None)` if the id does not resolve.
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// Apply an accrual if `last_accrual` is still `expected_last_accrual`.
    ///
    /// On [`CasOutcome::Swapped`] the record holds `write.new_balance`,
    /// `write.new_last_accrual`, `accrued_total + write.grant.amount` and
    /// `last_grant = Some(write.grant)`. On conflict nothing changes.
    /// Fails with [`StoreError::NotFound`] if the account is gone.
    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError>;

    /// Every account id currently stored.
    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError>;

    /// Insert a newly registered account. Fails if the id already exists.
    async fn create_account(&self, account: Account) -> Result<(), StoreError>;

    /// Update the circle size (referral collaborator).
    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError>;

    /// Update the boost factor in bps (promotion collaborator).
    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError>;

    /// Re-derive the audit counter from the ledger.
    ///
    /// If `accrued_total` still equals `expected`, sets it to `new_total`
    /// and shifts `balance` by the same difference (saturating at zero).
    /// Returns `false` without writing when `accrued_total` moved.
    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError>;
}

/// Append-only accrual ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Append an entry, returning its sequence number.
    ///
    /// Appending an entry equal to one already recorded for the same account
    /// returns the existing sequence number instead of a duplicate. Grant
    /// timestamps strictly increase per account, so implementations only
    /// need to look back through entries no older than `entry.timestamp`.
    async fn append(&self, entry: LedgerEntry) -> Result<u64, StoreError>;

    /// All entries for an account, oldest first.
    async fn entries_for(&self, id: &AccountId) -> Result<Vec<RecordedEntry>, StoreError>;

    /// Sum of `amount` over all entries for an account.
    async fn sum_for(&self, id: &AccountId) -> Result<u64, StoreError> {
        let entries = self.entries_for(id).await?;
        entries
            .iter()
            .try_fold(0u64, |acc, e| acc.checked_add(e.entry.amount))
            .ok_or_else(|| StoreError::Corrupt(format!("ledger sum overflow for {id}")))
    }

    /// Most recent entry for an account.
    async fn latest_for(&self, id: &AccountId) -> Result<Option<RecordedEntry>, StoreError> {
        Ok(self.entries_for(id).await?.pop())
    }

    /// One page of history, newest first. `page` is 1-based.
    async fn history(
        &self,
        id: &AccountId,
        page: usize,
        limit: usize,
    ) -> Result<HistoryPage, StoreError> {
        let mut entries = self.entries_for(id).await?;
        entries.reverse();
        Ok(HistoryPage::paginate(entries, page, limit))
    }
}
