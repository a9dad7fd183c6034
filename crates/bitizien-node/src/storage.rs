//! RocksDB-backed account store and ledger.
//!
//! Implements [`AccountStore`] and [`Ledger`] using column families:
//!
//! | CF                  | key                               | value          |
//! |---------------------|-----------------------------------|----------------|
//! | `accounts`          | account id bytes                  | `Account`      |
//! | `ledger`            | seq (u64 BE)                      | `LedgerEntry`  |
//! | `ledger_by_account` | id len (u32 BE) ++ id ++ seq (BE) | empty          |
//! | `metadata`          | `next_seq`                        | u64 LE         |
//!
//! Read-modify-write of an account holds one of [`LOCK_STRIPES`] mutexes
//! chosen by id hash, so different accounts rarely contend. Ledger appends
//! serialize on a single sequence lock and land in one [`WriteBatch`].
//!
//! RocksDB calls block, so every trait method runs its body on Tokio's
//! blocking pool. A caller's timeout can then fire while a call is stalled;
//! the abandoned call still completes in the background.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use tracing::debug;

use bitizien_core::error::StoreError;
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::{
    rebased_balance, Account, AccountId, AccrualWrite, CasOutcome, LedgerEntry, RecordedEntry,
    Timestamp,
};

// --- Column family names ---

const CF_ACCOUNTS: &str = "accounts";
const CF_LEDGER: &str = "ledger";
const CF_LEDGER_BY_ACCOUNT: &str = "ledger_by_account";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_ACCOUNTS, CF_LEDGER, CF_LEDGER_BY_ACCOUNT, CF_METADATA];

// --- Metadata keys ---

const META_NEXT_SEQ: &[u8] = b"next_seq";

/// Number of per-account lock stripes.
pub const LOCK_STRIPES: usize = 64;

/// Persistent [`AccountStore`] and [`Ledger`] in a single RocksDB instance.
pub struct RocksStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: DB,
    stripes: Vec<Mutex<()>>,
    seq_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a database at `path`, creating missing column families.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(unavailable)?;

        debug!(path = %path.as_ref().display(), "opened accrual store");
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
                seq_lock: Mutex::new(()),
            }),
        })
    }

    /// Number of ledger entries ever appended.
    pub fn ledger_len(&self) -> Result<u64, StoreError> {
        Ok(self.inner.next_seq()? - 1)
    }

    /// Run `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

impl Inner {
    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Corrupt(format!("missing column family: {name}")))
    }

    fn lock(&self, id: &AccountId) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        let stripe = (hasher.finish() % LOCK_STRIPES as u64) as usize;
        self.stripes[stripe].lock()
    }

    fn read_account(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.as_bytes()).map_err(unavailable)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_account(&self, account: &Account) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        self.db
            .put_cf(cf, account.id.as_bytes(), encode(account)?)
            .map_err(unavailable)
    }

    fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        let _guard = self.lock(&account.id);
        if self.read_account(&account.id)?.is_some() {
            return Err(StoreError::AlreadyExists(account.id.clone()));
        }
        self.write_account(account)
    }

    /// Read-modify-write an existing account under its stripe lock.
    fn update_account<T>(
        &self,
        id: &AccountId,
        f: impl FnOnce(&mut Account) -> Result<(T, bool), StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock(id);
        let mut account = self
            .read_account(id)?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let (out, dirty) = f(&mut account)?;
        if dirty {
            self.write_account(&account)?;
        }
        Ok(out)
    }

    fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item.map_err(unavailable)?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Corrupt(format!("account key: {e}")))?;
            ids.push(AccountId(id));
        }
        Ok(ids)
    }

    fn next_seq(&self) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self.db.get_cf(cf, META_NEXT_SEQ).map_err(unavailable)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| StoreError::Corrupt("invalid next_seq length".into()))?;
                Ok(u64::from_le_bytes(raw))
            }
            None => Ok(1),
        }
    }

    fn read_entry(&self, seq: u64) -> Result<LedgerEntry, StoreError> {
        let cf = self.cf_handle(CF_LEDGER)?;
        let bytes = self
            .db
            .get_cf(cf, seq.to_be_bytes())
            .map_err(unavailable)?
            .ok_or_else(|| StoreError::Corrupt(format!("ledger entry {seq} missing")))?;
        decode(&bytes)
    }

    fn append(&self, entry: &LedgerEntry) -> Result<u64, StoreError> {
        let cf_ledger = self.cf_handle(CF_LEDGER)?;
        let cf_index = self.cf_handle(CF_LEDGER_BY_ACCOUNT)?;
        let cf_meta = self.cf_handle(CF_METADATA)?;

        let _guard = self.seq_lock.lock();
        if let Some(seq) = self.recorded_seq(entry)? {
            debug!(account = %entry.account_id, seq, "ledger entry already recorded");
            return Ok(seq);
        }
        let seq = self.next_seq()?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_ledger, seq.to_be_bytes(), encode(entry)?);
        batch.put_cf(cf_index, index_key(&entry.account_id, seq), b"");
        batch.put_cf(cf_meta, META_NEXT_SEQ, (seq + 1).to_le_bytes());
        self.db.write(batch).map_err(unavailable)?;
        Ok(seq)
    }

    /// Sequence number of an existing entry equal to `entry`, if any.
    fn recorded_seq(&self, entry: &LedgerEntry) -> Result<Option<u64>, StoreError> {
        let mut found = None;
        self.visit_newest_first(&entry.account_id, |seq, recorded| {
            if recorded.timestamp < entry.timestamp {
                return false;
            }
            if recorded == *entry {
                found = Some(seq);
                return false;
            }
            true
        })?;
        Ok(found)
    }

    fn entries_for(&self, id: &AccountId) -> Result<Vec<RecordedEntry>, StoreError> {
        let cf_index = self.cf_handle(CF_LEDGER_BY_ACCOUNT)?;
        let prefix = index_prefix(id);

        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf_index, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(unavailable)?;
            let Some(seq) = index_seq(&prefix, &key)? else {
                break;
            };
            entries.push(RecordedEntry {
                seq,
                entry: self.read_entry(seq)?,
            });
        }
        Ok(entries)
    }

    fn latest_for(&self, id: &AccountId) -> Result<Option<RecordedEntry>, StoreError> {
        let mut latest = None;
        self.visit_newest_first(id, |seq, entry| {
            latest = Some(RecordedEntry { seq, entry });
            false
        })?;
        Ok(latest)
    }

    /// Walk `id`'s ledger entries newest first while `visit` returns `true`.
    fn visit_newest_first(
        &self,
        id: &AccountId,
        mut visit: impl FnMut(u64, LedgerEntry) -> bool,
    ) -> Result<(), StoreError> {
        let cf_index = self.cf_handle(CF_LEDGER_BY_ACCOUNT)?;
        let prefix = index_prefix(id);
        let start = index_key(id, u64::MAX);

        let iter = self
            .db
            .iterator_cf(cf_index, IteratorMode::From(&start, Direction::Reverse));
        for item in iter {
            let (key, _) = item.map_err(unavailable)?;
            let Some(seq) = index_seq(&prefix, &key)? else {
                break;
            };
            if !visit(seq, self.read_entry(seq)?) {
                break;
            }
        }
        Ok(())
    }
}

/// `len(id) ++ id`, the prefix of every index key for an account.
fn index_prefix(id: &AccountId) -> Vec<u8> {
    let bytes = id.as_bytes();
    let mut key = Vec::with_capacity(4 + bytes.len() + 8);
    key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    key.extend_from_slice(bytes);
    key
}

fn index_key(id: &AccountId, seq: u64) -> Vec<u8> {
    let mut key = index_prefix(id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// The seq of an index key under `prefix`, or `None` past the account's range.
fn index_seq(prefix: &[u8], key: &[u8]) -> Result<Option<u64>, StoreError> {
    if key.len() != prefix.len() + 8 || !key.starts_with(prefix) {
        return Ok(None);
    }
    let raw: [u8; 8] = key[prefix.len()..]
        .try_into()
        .map_err(|_| StoreError::Corrupt("invalid ledger index key".into()))?;
    Ok(Some(u64::from_be_bytes(raw)))
}

fn unavailable(e: rocksdb::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Corrupt(e.to_string()))
}

#[async_trait]
impl AccountStore for RocksStore {
    async fn get(&self, id: &AccountId) -> Result<Option<Account>, StoreError> {
        let id = id.clone();
        self.blocking(move |db| db.read_account(&id)).await
    }

    async fn compare_and_swap_balance(
        &self,
        id: &AccountId,
        expected_last_accrual: Option<Timestamp>,
        write: AccrualWrite,
    ) -> Result<CasOutcome, StoreError> {
        let id = id.clone();
        self.blocking(move |db| {
            db.update_account(&id, |account| {
                if account.last_accrual != expected_last_accrual {
                    let current = account.last_accrual;
                    return Ok((CasOutcome::Conflict { current }, false));
                }
                account.accrued_total = account
                    .accrued_total
                    .checked_add(write.grant.amount)
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!("accrued total overflow for {id}"))
                    })?;
                account.balance = write.new_balance;
                account.last_accrual = Some(write.new_last_accrual);
                account.last_grant = Some(write.grant);
                Ok((CasOutcome::Swapped, true))
            })
        })
        .await
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        self.blocking(|db| db.list_account_ids()).await
    }

    async fn create_account(&self, account: Account) -> Result<(), StoreError> {
        self.blocking(move |db| db.create_account(&account)).await
    }

    async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), StoreError> {
        let id = id.clone();
        self.blocking(move |db| {
            db.update_account(&id, |account| {
                account.circle_size = circle_size;
                Ok(((), true))
            })
        })
        .await
    }

    async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), StoreError> {
        let id = id.clone();
        self.blocking(move |db| {
            db.update_account(&id, |account| {
                account.boost_bps = boost_bps;
                Ok(((), true))
            })
        })
        .await
    }

    async fn rebase_accrued(
        &self,
        id: &AccountId,
        expected: u64,
        new_total: u64,
    ) -> Result<bool, StoreError> {
        let id = id.clone();
        self.blocking(move |db| {
            db.update_account(&id, |account| {
                if account.accrued_total != expected {
                    return Ok((false, false));
                }
                account.balance = rebased_balance(account.balance, expected, new_total);
                account.accrued_total = new_total;
                Ok((true, true))
            })
        })
        .await
    }
}

#[async_trait]
impl Ledger for RocksStore {
    async fn append(&self, entry: LedgerEntry) -> Result<u64, StoreError> {
        self.blocking(move |db| db.append(&entry)).await
    }

    async fn entries_for(&self, id: &AccountId) -> Result<Vec<RecordedEntry>, StoreError> {
        let id = id.clone();
        self.blocking(move |db| db.entries_for(&id)).await
    }

    async fn latest_for(&self, id: &AccountId) -> Result<Option<RecordedEntry>, StoreError> {
        let id = id.clone();
        self.blocking(move |db| db.latest_for(&id)).await
    }
}
