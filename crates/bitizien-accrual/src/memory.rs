//! In-memory account store and ledger.
//!
//! Accounts live in a [`DashMap`], so a compare-and-swap holds only the
//! shard lock of the account it touches. The ledger is a single append log
//! behind a `parking_lot::RwLock` with a per-account index.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use bitizien_core::error::StoreError;
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::{
    rebased_balance, Account, AccountId, AccrualWrite, CasOutcome, LedgerEntry, RecordedEntry,
    Timestamp,
};

#[derive(Default)]
struct LedgerLog {
    /// `entries[i]` has sequence number `i + 1`.
    entries: Vec<LedgerEntry>,
    by_account: HashMap<AccountId, Vec<usize>>,
}

impl LedgerLog {
    /// Sequence number of an existing entry equal to `entry`, if any.
    fn recorded_seq(&self, entry: &LedgerEntry) -> Option<u64> {
        let indices = self.by_account.get(&entry.account_id)?;
        indices
            .iter()
            .rev()
            .map(|&i| (i, &self.entries[i]))
            .take_while(|(_, e)| e.timestamp >= entry.timestamp)
            .find(|(_, e)| *e == entry)
            .map(|(i, _)| i as u64 + 1)
    }
}

/// Process-local [`AccountStore`] and [`Ledger`].
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    ledger: RwLock<LedgerLog>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Number of ledger entries across all accounts.
    pub fn ledger_len(&self) -> usize {
        self.ledger.read().entries.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(id).map(|a| a.value().clone()))
    }

    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError> {
        let mut slot = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if slot.last_accrual != expected_last_accrual {
            return Ok(CasOutcome::Conflict {
                current: slot.last_accrual,
            });
        }

        let accrued_total = slot
            .accrued_total
            .checked_add(write.grant.amount)
            .ok_or_else(|| StoreError::Corrupt(format!("accrued total overflow for {id}")))?;

        slot.balance = write.new_balance;
        slot.last_accrual = Some(write.new_last_accrual);
        slot.accrued_total = accrued_total;
        slot.last_grant = Some(write.grant);
        Ok(CasOutcome::Swapped)
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(account.id)),
            Entry::Vacant(v) => {
                v.insert(account);
                Ok(())
            }
        }
    }

    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError> {
        let mut slot = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        slot.circle_size = circle_size;
        Ok(())
    }

    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError> {
        let mut slot = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        slot.boost_bps = boost_bps;
        Ok(())
    }

    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError> {
        let mut slot = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if slot.accrued_total != expected {
            return Ok(false);
        }
        slot.balance = rebased_balance(slot.balance, expected, new_total);
        slot.accrued_total = new_total;
        Ok(true)
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn append(&self, entry: LedgerEntry) -> Result<u64, StoreError> {
        let mut log = self.ledger.write();
        if let Some(seq) = log.recorded_seq(&entry) {
            return Ok(seq);
        }
        let index = log.entries.len();
        log.by_account
            .entry(entry.account_id.clone())
            .or_default()
            .push(index);
        log.entries.push(entry);
        Ok(index as u64 + 1)
    }

    async fn entries_for(&self, id: &AccountId) -> Result<Vec<RecordedEntry>, StoreError> {
        let log = self.ledger.read();
        let Some(indices) = log.by_account.get(id) else {
            return Ok(Vec::new());
        };
        Ok(indices
            .iter()
            .map(|&i| RecordedEntry {
                seq: i as u64 + 1,
                entry: log.entries[i].clone(),
            })
            .collect())
    }
}
