//! Accrual engine.
//!
//! One accrual is: read the account, reject if its cooldown has not elapsed,
//! compute the reward, compare-and-swap the balance on `last_accrual`, then
//! append the ledger entry. The CAS is what makes concurrent accruals of the
//! same account safe; the ledger append only happens after it lands.
//!
//! An account's previous grant must be in the ledger before it is credited
//! again. If an earlier accrual credited the balance but never recorded its
//! entry, the next accrual records it first or fails with `PartialCommit`.
//! Ledger appends are idempotent per entry, so recording it twice is harmless.
//!
//! Every store call is bounded by `MiningConfig::store_timeout`. A balance
//! write that times out is checked by re-reading the account: if it landed,
//! the accrual carries on to the ledger append.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use bitizien_core::clock::Clock;
use bitizien_core::config::MiningConfig;
use bitizien_core::constants::MAX_HISTORY_LIMIT;
use bitizien_core::error::{AccrualError, CalcError, ConfigError, StoreError};
use bitizien_core::reward::RewardCalculator;
use bitizien_core::traits::{AccountStore, Ledger};
use bitizien_core::types::{
    Account, AccountId, AccrualOutcome, AccrualWrite, CasOutcome, HistoryPage, LedgerEntry,
    Timestamp,
};

/// Await a store call, failing with [`StoreError::Timeout`] after `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

/// Counts from one pass over all accounts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Accounts credited this sweep.
    pub accrued: usize,
    /// Accounts skipped because their cooldown had not elapsed.
    pub cooling_down: usize,
    /// Accounts that failed for any other reason.
    pub failed: usize,
    /// Units credited across all accounts.
    pub total_reward: u64,
}

/// Read-only view of an account's mining position.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MiningStats {
    pub account_id: AccountId,
    pub balance: u64,
    /// Circle size after clamping to `max_circle`.
    pub circle_size: u32,
    pub max_circle: u32,
    pub circle_bonus_bps: u64,
    /// Boost after the configured policy.
    pub boost_bps: u32,
    pub effective_rate_bps: u64,
    /// Units the next accrual would credit.
    pub next_reward: u64,
    pub last_accrual: Option<Timestamp>,
    pub can_accrue_now: bool,
    pub remaining_ms: u64,
    pub next_accrual_at: Option<Timestamp>,
}

/// Orchestrates cooldown checks, reward calculation and store writes.
pub struct AccrualEngine {
    accounts: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    config: MiningConfig,
    calculator: RewardCalculator,
}

impl AccrualEngine {
    /// Create an engine. Fails if `config` does not validate.
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        config: MiningConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let calculator = config.calculator();
        Ok(Self {
            accounts,
            ledger,
            clock,
            config,
            calculator,
        })
    }

    pub fn config(&self) -> &MiningConfig {
        &self.config
    }

    /// Grant the reward for one interval to `id`.
    ///
    /// Fails with `CooldownActive` (no write) if the account accrued less
    /// than `cooldown` ago. A lost compare-and-swap is re-read and retried
    /// once; a second loss means another accrual landed first.
    pub async fn accrue_one(&self, id: &AccountId) -> Result<AccrualOutcome, AccrualError> {
        let mut account = self.load(id).await?;
        self.settle_last_grant(&account).await?;

        for attempt in 0..2 {
            let now = self.clock.now();
            if let Some(remaining) = self.cooldown_remaining(&account, now) {
                return Err(AccrualError::cooldown(remaining));
            }

            let grant = self.grant_for(&account, now)?;
            let new_balance = account
                .balance
                .checked_add(grant.amount)
                .ok_or(CalcError::Overflow)?;
            let write = AccrualWrite {
                new_balance,
                new_last_accrual: now,
                grant: grant.clone(),
            };

            let cas = self.store(
                self.accounts
                    .compare_and_swap_balance(id, account.last_accrual, write),
            );
            let outcome = match cas.await {
                Ok(outcome) => outcome,
                Err(e @ (StoreError::Timeout(_) | StoreError::Unavailable(_))) => {
                    if self.grant_landed(id, &grant).await {
                        warn!(account = %id, "balance write landed despite error: {e}");
                        return self.record(grant, new_balance).await;
                    }
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            };

            match outcome {
                CasOutcome::Swapped => return self.record(grant, new_balance).await,
                CasOutcome::Conflict { current } => {
                    debug!(account = %id, attempt, ?current, "lost accrual race");
                    if attempt == 0 {
                        account = self.load(id).await?;
                    }
                }
            }
        }

        let latest = self.load(id).await?;
        match self.cooldown_remaining(&latest, self.clock.now()) {
            Some(remaining) => Err(AccrualError::cooldown(remaining)),
            None => Err(AccrualError::WriteConflict(id.clone())),
        }
    }

    /// Attempt an accrual for every account.
    ///
    /// Up to `sweep_concurrency` accounts are processed in parallel. Cooldown
    /// rejections are counted; any other per-account failure is logged and
    /// counted without stopping the sweep. Only failing to list the accounts
    /// fails the sweep itself.
    pub async fn sweep_all(self: &Arc<Self>) -> Result<SweepReport, AccrualError> {
        let ids = self.store(self.accounts.list_account_ids()).await?;
        let mut report = SweepReport::default();
        let mut tasks = JoinSet::new();

        for id in ids {
            while tasks.len() >= self.config.sweep_concurrency {
                if let Some(joined) = tasks.join_next().await {
                    tally(&mut report, joined);
                }
            }
            let engine = Arc::clone(self);
            tasks.spawn(async move {
                let result = engine.accrue_one(&id).await;
                (id, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            tally(&mut report, joined);
        }

        info!(
            accrued = report.accrued,
            cooling_down = report.cooling_down,
            failed = report.failed,
            total_reward = report.total_reward,
            "sweep complete"
        );
        Ok(report)
    }

    /// Current mining position of `id`, without side effects.
    pub async fn stats(&self, id: &AccountId) -> Result<MiningStats, AccrualError> {
        let account = self.load(id).await?;
        let now = self.clock.now();
        let circle_size = account.circle_size.min(self.config.max_circle);
        let boost_bps = self.config.boost_policy.apply(account.boost_bps);
        let breakdown = self.calculator.compute(circle_size, boost_bps)?;
        let remaining = self.cooldown_remaining(&account, now);

        Ok(MiningStats {
            account_id: account.id.clone(),
            balance: account.balance,
            circle_size,
            max_circle: self.config.max_circle,
            circle_bonus_bps: self.calculator.circle_fraction_bps(circle_size)?,
            boost_bps,
            effective_rate_bps: breakdown.effective_rate_bps,
            next_reward: breakdown.total_reward,
            last_accrual: account.last_accrual,
            can_accrue_now: remaining.is_none(),
            remaining_ms: remaining
                .map(|r| u64::try_from(r.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0),
            next_accrual_at: account
                .last_accrual
                .map(|t| t.saturating_add(self.config.cooldown)),
        })
    }

    /// One page of `id`'s ledger, newest first. `limit` is capped.
    pub async fn history(
        &self,
        id: &AccountId,
        page: usize,
        limit: usize,
    ) -> Result<HistoryPage, AccrualError> {
        self.load(id).await?;
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store(self.ledger.history(id, page, limit)).await?)
    }

    /// Record `account.last_grant` if its balance write landed without a
    /// ledger entry. A gap the last grant does not explain is left to the
    /// reconciler.
    async fn settle_last_grant(&self, account: &Account) -> Result<(), AccrualError> {
        let Some(grant) = &account.last_grant else {
            return Ok(());
        };
        let latest = self.store(self.ledger.latest_for(&account.id)).await?;
        if latest.is_some_and(|r| &r.entry == grant) {
            return Ok(());
        }
        let ledger_sum = self.store(self.ledger.sum_for(&account.id)).await?;
        if ledger_sum.checked_add(grant.amount) != Some(account.accrued_total) {
            return Ok(());
        }

        warn!(
            account = %account.id,
            amount = grant.amount,
            "previous grant missing from ledger; recording it"
        );
        self.record(grant.clone(), account.balance).await.map(|_| ())
    }

    /// Whether the account now carries `grant` as its last applied write.
    async fn grant_landed(&self, id: &AccountId, grant: &LedgerEntry) -> bool {
        match self.store(self.accounts.get(id)).await {
            Ok(Some(account)) => account.last_grant.as_ref() == Some(grant),
            _ => false,
        }
    }

    async fn load(&self, id: &AccountId) -> Result<Account, AccrualError> {
        self.store(self.accounts.get(id))
            .await?
            .ok_or_else(|| AccrualError::AccountNotFound(id.clone()))
    }

    async fn store<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        bounded(self.config.store_timeout, fut).await
    }

    fn cooldown_remaining(&self, account: &Account, now: Timestamp) -> Option<Duration> {
        let last = account.last_accrual?;
        let elapsed = now.elapsed_since(last);
        (elapsed < self.config.cooldown).then(|| self.config.cooldown - elapsed)
    }

    fn grant_for(&self, account: &Account, now: Timestamp) -> Result<LedgerEntry, CalcError> {
        let circle_size = account.circle_size.min(self.config.max_circle);
        let boost_bps = self.config.boost_policy.apply(account.boost_bps);
        let breakdown = self.calculator.compute(circle_size, boost_bps)?;
        Ok(LedgerEntry {
            account_id: account.id.clone(),
            amount: breakdown.total_reward,
            effective_rate_bps: breakdown.effective_rate_bps,
            circle_bonus: breakdown.circle_bonus,
            other_bonus: breakdown.other_bonus,
            timestamp: now,
        })
    }

    /// Append the ledger entry for a grant whose balance write already landed.
    async fn record(
        &self,
        grant: LedgerEntry,
        new_balance: u64,
    ) -> Result<AccrualOutcome, AccrualError> {
        let attempts = self.config.ledger_append_attempts;
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.store(self.ledger.append(grant.clone())).await {
                Ok(seq) => {
                    debug!(
                        account = %grant.account_id,
                        amount = grant.amount,
                        rate_bps = grant.effective_rate_bps,
                        seq,
                        "accrued"
                    );
                    return Ok(AccrualOutcome {
                        reward: grant.amount,
                        new_balance,
                        entry: grant,
                    });
                }
                Err(e) => {
                    warn!(account = %grant.account_id, attempt, "ledger append failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
        error!(
            account = %grant.account_id,
            amount = grant.amount,
            "balance credited without ledger entry: {reason}"
        );
        Err(AccrualError::PartialCommit {
            account: grant.account_id,
            amount: grant.amount,
            reason,
        })
    }
}

fn tally(
    report: &mut SweepReport,
    joined: Result<(AccountId, Result<AccrualOutcome, AccrualError>), tokio::task::JoinError>,
) {
    match joined {
        Ok((_, Ok(outcome))) => {
            report.accrued += 1;
            report.total_reward = report.total_reward.saturating_add(outcome.reward);
        }
        Ok((_, Err(AccrualError::CooldownActive { .. }))) => report.cooling_down += 1,
        Ok((id, Err(e))) => {
            warn!(account = %id, "sweep accrual failed: {e}");
            report.failed += 1;
        }
        Err(e) => {
            error!("sweep accrual task aborted: {e}");
            report.failed += 1;
        }
    }
}
