//! Startup reconciliation of balances against the ledger.
//!
//! Each account carries `accrued_total`, the sum of every grant its CAS
//! writes applied, and `last_grant`, the most recent one. A healthy account
//! has `accrued_total == ledger.sum_for(id)`. When an accrual's ledger
//! append failed after its balance write landed, the ledger is short by
//! exactly `last_grant.amount` and the missing entry can be restored.
//! Any other mismatch is rebased onto the ledger, which is authoritative.
//!
//! Run only while no accruals are in flight (before the scheduler starts):
//! an append racing with the check would otherwise be duplicated.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use bitizien_core::error::StoreError;
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::AccountId;

use crate::engine::bounded;

/// Action taken on an inconsistent account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Repair {
    /// The missing ledger entry for `last_grant` was appended as `seq`.
    LedgerEntryRestored { seq: u64 },
    /// `accrued_total` (and the balance) moved from `from` to `to`.
    Rebased { from: u64, to: u64 },
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub consistent: usize,
    pub restored: usize,
    pub rebased: usize,
    pub failed: usize,
}

pub struct Reconciler {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(accounts: Arc<dyn AccountStore>, ledger: Arc<dyn Ledger>, timeout: Duration) -> Self {
        Self {
            accounts,
            ledger,
            timeout,
        }
    }

    /// Check one account, repairing it if needed. `Ok(None)` when consistent.
    pub async fn reconcile_account(&self, id: &AccountId) -> Result<Option<Repair>, StoreError> {
        let account = bounded(self.timeout, self.accounts.get(id))
            .await?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let ledger_sum = bounded(self.timeout, self.ledger.sum_for(id)).await?;

        if account.accrued_total == ledger_sum {
            return Ok(None);
        }

        if let Some(grant) = &account.last_grant {
            let short_by_last = ledger_sum.checked_add(grant.amount) == Some(account.accrued_total);
            if short_by_last {
                let latest = bounded(self.timeout, self.ledger.latest_for(id)).await?;
                if latest.as_ref().map(|r| &r.entry) != Some(grant) {
                    let seq = bounded(self.timeout, self.ledger.append(grant.clone())).await?;
                    warn!(account = %id, amount = grant.amount, seq, "restored missing ledger entry");
                    return Ok(Some(Repair::LedgerEntryRestored { seq }));
                }
            }
        }

        let rebased = bounded(
            self.timeout,
            self.accounts.rebase_accrued(id, account.accrued_total, ledger_sum),
        )
        .await?;
        if !rebased {
            return Err(StoreError::Corrupt(format!(
                "accrued total for {id} changed during reconciliation"
            )));
        }
        error!(
            account = %id,
            from = account.accrued_total,
            to = ledger_sum,
            "balance diverged from ledger; rebased onto ledger"
        );
        Ok(Some(Repair::Rebased {
            from: account.accrued_total,
            to: ledger_sum,
        }))
    }

    /// Reconcile every account. Per-account failures are counted, not fatal.
    pub async fn reconcile_all(&self) -> Result<ReconcileReport, StoreError> {
        let ids = bounded(self.timeout, self.accounts.list_account_ids()).await?;
        let mut report = ReconcileReport::default();

        for id in ids {
            report.checked += 1;
            match self.reconcile_account(&id).await {
                Ok(None) => report.consistent += 1,
                Ok(Some(Repair::LedgerEntryRestored { .. })) => report.restored += 1,
                Ok(Some(Repair::Rebased { .. })) => report.rebased += 1,
                Err(e) => {
                    warn!(account = %id, "reconciliation failed: {e}");
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            restored = report.restored,
            rebased = report.rebased,
            failed = report.failed,
            "reconciliation complete"
        );
        Ok(report)
    }
}
