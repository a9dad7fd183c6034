//! Validated accrual parameters.
//!
//! [`MiningConfig`] holds the engine's runtime constants in their internal
//! representation (units, bps, `Duration`). Loading from files and the
//! environment lives in the node crate; whatever the source, the result is
//! checked by [`MiningConfig::validate`] before the engine starts, and an
//! invalid configuration is fatal.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BPS_PRECISION, COIN, DEFAULT_BASE_REWARD, DEFAULT_COOLDOWN_SECS,
    DEFAULT_LEDGER_APPEND_ATTEMPTS, DEFAULT_PER_MEMBER_BONUS_BPS, DEFAULT_STORE_TIMEOUT_MS,
    DEFAULT_SWEEP_CONCURRENCY, DEFAULT_SWEEP_INTERVAL_SECS, MAX_CIRCLE, MAX_CIRCLE_LIMIT,
    MAX_PER_MEMBER_BONUS_BPS, NEUTRAL_BOOST_BPS,
};
use crate::error::ConfigError;
use crate::reward::RewardCalculator;

/// How the engine treats a boost factor below 1.0.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoostPolicy {
    /// Boosts below 1.0 reduce the reward.
    #[default]
    Allow,
    /// Boosts below 1.0 are raised to 1.0 before calculation.
    Clamp,
}

impl BoostPolicy {
    pub fn apply(&self, boost_bps: u32) -> u32 {
        match self {
            Self::Allow => boost_bps,
            Self::Clamp => boost_bps.max(NEUTRAL_BOOST_BPS),
        }
    }
}

impl FromStr for BoostPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "clamp" => Ok(Self::Clamp),
            other => Err(ConfigError::Invalid {
                field: "boost_policy",
                reason: format!("expected \"allow\" or \"clamp\", got {other:?}"),
            }),
        }
    }
}

impl fmt::Display for BoostPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Clamp => f.write_str("clamp"),
        }
    }
}

/// Runtime parameters of the accrual engine and scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiningConfig {
    /// Units granted to a zero-circle, unboosted account per interval.
    pub base_reward: u64,
    /// Bonus fraction per circle member, in bps.
    pub per_member_bonus_bps: u64,
    /// Circle sizes above this cap earn no further bonus.
    pub max_circle: u32,
    /// Minimum time between two accruals of one account.
    pub cooldown: Duration,
    /// Scheduler tick.
    pub sweep_interval: Duration,
    /// Bound on every store call.
    pub store_timeout: Duration,
    /// Accounts accrued in parallel within one sweep.
    pub sweep_concurrency: usize,
    /// Ledger append attempts before reporting a partial commit.
    pub ledger_append_attempts: u32,
    pub boost_policy: BoostPolicy,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            base_reward: DEFAULT_BASE_REWARD,
            per_member_bonus_bps: DEFAULT_PER_MEMBER_BONUS_BPS,
            max_circle: MAX_CIRCLE,
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            ledger_append_attempts: DEFAULT_LEDGER_APPEND_ATTEMPTS,
            boost_policy: BoostPolicy::Allow,
        }
    }
}

impl MiningConfig {
    pub fn calculator(&self) -> RewardCalculator {
        RewardCalculator::new(self.base_reward, self.per_member_bonus_bps)
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.per_member_bonus_bps > MAX_PER_MEMBER_BONUS_BPS {
            return Err(invalid(
                "per_member_bonus",
                format!("{} bps exceeds {MAX_PER_MEMBER_BONUS_BPS}", self.per_member_bonus_bps),
            ));
        }
        if self.max_circle > MAX_CIRCLE_LIMIT {
            return Err(invalid(
                "max_circle",
                format!("{} exceeds {MAX_CIRCLE_LIMIT}", self.max_circle),
            ));
        }
        if self.cooldown.is_zero() {
            return Err(invalid("cooldown", "must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval", "must be positive".into()));
        }
        if self.store_timeout.is_zero() {
            return Err(invalid("store_timeout", "must be positive".into()));
        }
        if self.sweep_concurrency == 0 {
            return Err(invalid("sweep_concurrency", "must be at least 1".into()));
        }
        if self.ledger_append_attempts == 0 {
            return Err(invalid("ledger_append_attempts", "must be at least 1".into()));
        }
        // A full circle at neutral boost must be computable.
        self.calculator()
            .compute(self.max_circle, NEUTRAL_BOOST_BPS)
            .map_err(|e| invalid("base_reward", e.to_string()))?;
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

/// Convert a decimal coin amount (e.g. `10.5`) to units.
pub fn coin_to_units(field: &'static str, coins: f64) -> Result<u64, ConfigError> {
    if !coins.is_finite() {
        return Err(invalid(field, format!("{coins} is not a finite number")));
    }
    if coins < 0.0 {
        return Err(invalid(field, format!("{coins} is negative")));
    }
    let units = (coins * COIN as f64).round();
    if units > u64::MAX as f64 {
        return Err(invalid(field, format!("{coins} is too large")));
    }
    Ok(units as u64)
}

/// Convert a fraction (e.g. `0.2`) to bps.
pub fn fraction_to_bps(field: &'static str, fraction: f64) -> Result<u64, ConfigError> {
    if !fraction.is_finite() {
        return Err(invalid(field, format!("{fraction} is not a finite number")));
    }
    if fraction < 0.0 {
        return Err(invalid(field, format!("{fraction} is negative")));
    }
    let bps = (fraction * BPS_PRECISION as f64).round();
    if bps > u64::MAX as f64 {
        return Err(invalid(field, format!("{fraction} is too large")));
    }
    Ok(bps as u64)
}
