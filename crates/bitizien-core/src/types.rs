//! Core accrual types: accounts, ledger entries, timestamps.
//!
//! All monetary values are in units (1 coin = 10^8 units).
//! Rates are in basis points; timestamps are Unix milliseconds.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::NEUTRAL_BOOST_BPS;

/// Opaque account identifier assigned by the registration flow.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Point in time as signed Unix milliseconds.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The Unix epoch.
    pub const EPOCH: Self = Self(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    /// `None` only for values chrono cannot represent.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.0)
    }

    /// `self + d`, saturating at `i64::MAX`.
    pub fn saturating_add(&self, d: Duration) -> Self {
        let millis = i64::try_from(d.as_millis()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }

    /// Time elapsed from `earlier` to `self`; zero if `earlier` is in the future.
    pub fn elapsed_since(&self, earlier: Timestamp) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        Duration::from_millis(diff.max(0) as u64)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339()),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// One immutable record of a successful accrual.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct LedgerEntry {
    pub account_id: AccountId,
    /// Units credited to the balance.
    pub amount: u64,
    /// Rate applied for this grant, in bps.
    pub effective_rate_bps: u64,
    /// Units attributable to the referral circle.
    pub circle_bonus: u64,
    /// Units attributable to the boost; negative under a penalty boost.
    pub other_bonus: i64,
    pub timestamp: Timestamp,
}

/// A ledger entry together with its append sequence number.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RecordedEntry {
    pub seq: u64,
    #[serde(flatten)]
    pub entry: LedgerEntry,
}

/// Durable account record as seen by the accrual engine.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Account {
    pub id: AccountId,
    /// Spendable balance in units.
    pub balance: u64,
    /// Time of the most recent successful accrual.
    pub last_accrual: Option<Timestamp>,
    /// Members in the referral circle (maintained by the referral collaborator).
    pub circle_size: u32,
    /// Promotion multiplier in bps (maintained by the promotion collaborator).
    pub boost_bps: u32,
    /// Sum of every engine credit ever applied to `balance`.
    pub accrued_total: u64,
    /// Breakdown of the most recent grant, written atomically with the balance.
    pub last_grant: Option<LedgerEntry>,
}

impl Account {
    /// A freshly registered account: zero balance, never accrued, no boost.
    pub fn new(id: impl Into<AccountId>) -> Self {
        Self {
            id: id.into(),
            balance: 0,
            last_accrual: None,
            circle_size: 0,
            boost_bps: NEUTRAL_BOOST_BPS,
            accrued_total: 0,
            last_grant: None,
        }
    }

    pub fn with_circle(mut self, circle_size: u32) -> Self {
        self.circle_size = circle_size;
        self
    }

    pub fn with_boost(mut self, boost_bps: u32) -> Self {
        self.boost_bps = boost_bps;
        self
    }
}

/// The state an accrual writes through compare-and-swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccrualWrite {
    pub new_balance: u64,
    pub new_last_accrual: Timestamp,
    /// Grant being applied; the store adds `grant.amount` to `accrued_total`
    /// and records it as `last_grant` in the same write.
    pub grant: LedgerEntry,
}

/// Result of a compare-and-swap on `last_accrual`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Swapped,
    /// The stored `last_accrual` no longer matched the expected value.
    Conflict { current: Option<Timestamp> },
}

/// What a successful `accrue_one` returns.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccrualOutcome {
    pub reward: u64,
    pub new_balance: u64,
    pub entry: LedgerEntry,
}

/// One page of an account's ledger history, newest first.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryPage {
    pub entries: Vec<RecordedEntry>,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
}

impl HistoryPage {
    /// Slice a newest-first list into the requested page.
    pub fn paginate(newest_first: Vec<RecordedEntry>, page: usize, limit: usize) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = newest_first.len();
        let total_pages = total.div_ceil(limit);
        let entries = newest_first
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .collect();
        Self {
            entries,
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// Shift `balance` by `new_total - old_total`, saturating at the u64 bounds.
///
/// Used when an account's `accrued_total` is rebased onto its ledger sum.
pub fn rebased_balance(balance: u64, old_total: u64, new_total: u64) -> u64 {
    if new_total >= old_total {
        balance.saturating_add(new_total - old_total)
    } else {
        balance.saturating_sub(old_total - new_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(amount: u64, ts: i64) -> RecordedEntry {
        RecordedEntry {
            seq: ts as u64,
            entry: LedgerEntry {
                account_id: AccountId::from("a"),
                amount,
                effective_rate_bps: 10_000,
                circle_bonus: 0,
                other_bonus: 0,
                timestamp: Timestamp(ts),
            },
        }
    }

    #[test]
    fn new_account_is_unaccrued() {
        let acct = Account::new("alice");
        assert_eq!(acct.balance, 0);
        assert_eq!(acct.last_accrual, None);
        assert_eq!(acct.boost_bps, NEUTRAL_BOOST_BPS);
        assert_eq!(acct.accrued_total, 0);
    }

    #[test]
    fn elapsed_since_never_negative() {
        let t = Timestamp(1_000);
        assert_eq!(t.elapsed_since(Timestamp(400)), Duration::from_millis(600));
        assert_eq!(t.elapsed_since(Timestamp(5_000)), Duration::ZERO);
    }

    #[test]
    fn saturating_add_clamps() {
        let t = Timestamp(i64::MAX - 1);
        assert_eq!(t.saturating_add(Duration::from_secs(10)), Timestamp(i64::MAX));
    }

    #[test]
    fn timestamp_display_is_rfc3339() {
        assert_eq!(Timestamp::EPOCH.to_string(), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn rebased_balance_moves_both_ways_and_saturates() {
        assert_eq!(rebased_balance(100, 100, 60), 60);
        assert_eq!(rebased_balance(60, 60, 90), 90);
        assert_eq!(rebased_balance(5, 100, 0), 0);
        assert_eq!(rebased_balance(u64::MAX, 0, 10), u64::MAX);
    }

    #[test]
    fn paginate_second_page() {
        let items: Vec<_> = (0..25).rev().map(|i| entry(i, i as i64)).collect();
        let page = HistoryPage::paginate(items, 2, 10);
        assert_eq!(page.total, 25);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.entries.len(), 10);
        assert_eq!(page.entries[0].entry.amount, 14);
    }

    #[test]
    fn paginate_past_end_is_empty() {
        let items: Vec<_> = (0..3).map(|i| entry(i, i as i64)).collect();
        let page = HistoryPage::paginate(items, 5, 10);
        assert!(page.entries.is_empty());
        assert_eq!(page.total_pages, 1);
    }

    #[test]
    fn paginate_zero_page_treated_as_first() {
        let items: Vec<_> = (0..3).map(|i| entry(i, i as i64)).collect();
        let page = HistoryPage::paginate(items, 0, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.limit, 1);
        assert_eq!(page.entries.len(), 1);
    }
}
