//! Reward calculation for a single accrual.
//!
//! The reward for one interval is
//!
//! ```text
//! circle_fraction = circle_size * per_member_bonus
//! effective_rate  = (1 + circle_fraction) * boost
//! total_reward    = base_reward * effective_rate
//! circle_bonus    = base_reward * circle_fraction
//! other_bonus     = base_reward * (boost - 1)
//! ```
//!
//! Fractions and the boost are basis points, amounts are units, and every
//! product goes through u128 so the result is exact up to one final
//! truncating division. The calculator never reads the clock and never
//! clamps its inputs; callers clamp `circle_size` to the configured cap.

use serde::{Deserialize, Serialize};

use crate::constants::BPS_PRECISION;
use crate::error::CalcError;

/// Outcome of one reward computation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardBreakdown {
    /// `(1 + circle_fraction) * boost`, in bps.
    pub effective_rate_bps: u64,
    /// Units attributable to the circle.
    pub circle_bonus: u64,
    /// Units attributable to the boost (negative when boost < 1).
    pub other_bonus: i64,
    /// Units to credit.
    pub total_reward: u64,
}

/// Pure reward calculator parameterized by the configured constants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RewardCalculator {
    base_reward: u64,
    per_member_bonus_bps: u64,
}

impl RewardCalculator {
    pub const fn new(base_reward: u64, per_member_bonus_bps: u64) -> Self {
        Self {
            base_reward,
            per_member_bonus_bps,
        }
    }

    pub fn base_reward(&self) -> u64 {
        self.base_reward
    }

    pub fn per_member_bonus_bps(&self) -> u64 {
        self.per_member_bonus_bps
    }

    /// Circle bonus fraction in bps: `circle_size * per_member_bonus`.
    pub fn circle_fraction_bps(&self, circle_size: u32) -> Result<u64, CalcError> {
        (circle_size as u64)
            .checked_mul(self.per_member_bonus_bps)
            .ok_or(CalcError::Overflow)
    }

    /// Effective rate in bps: `(1 + circle_fraction) * boost`.
    pub fn effective_rate_bps(&self, circle_size: u32, boost_bps: u32) -> Result<u64, CalcError> {
        let multiplier = BPS_PRECISION
            .checked_add(self.circle_fraction_bps(circle_size)?)
            .ok_or(CalcError::Overflow)?;
        let rate = (multiplier as u128) * (boost_bps as u128) / BPS_PRECISION as u128;
        u64::try_from(rate).map_err(|_| CalcError::Overflow)
    }

    /// Compute the full breakdown for one accrual.
    pub fn compute(&self, circle_size: u32, boost_bps: u32) -> Result<RewardBreakdown, CalcError> {
        let base = self.base_reward as u128;
        let bps = BPS_PRECISION as u128;
        let fraction = self.circle_fraction_bps(circle_size)? as u128;
        let boost = boost_bps as u128;

        // total = base * (bps + fraction) * boost / bps^2, divided once at the end.
        let total = base
            .checked_mul(bps + fraction)
            .and_then(|v| v.checked_mul(boost))
            .ok_or(CalcError::Overflow)?
            / (bps * bps);

        let circle_bonus = base.checked_mul(fraction).ok_or(CalcError::Overflow)? / bps;

        let boost_delta = boost as i128 - bps as i128;
        let other_bonus = (base as i128)
            .checked_mul(boost_delta)
            .ok_or(CalcError::Overflow)?
            / bps as i128;

        Ok(RewardBreakdown {
            effective_rate_bps: self.effective_rate_bps(circle_size, boost_bps)?,
            circle_bonus: u64::try_from(circle_bonus).map_err(|_| CalcError::Overflow)?,
            other_bonus: i64::try_from(other_bonus).map_err(|_| CalcError::Overflow)?,
            total_reward: u64::try_from(total).map_err(|_| CalcError::Overflow)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{COIN, DEFAULT_BASE_REWARD, DEFAULT_PER_MEMBER_BONUS_BPS, MAX_CIRCLE};
    use proptest::prelude::*;

    fn calc() -> RewardCalculator {
        RewardCalculator::new(DEFAULT_BASE_REWARD, DEFAULT_PER_MEMBER_BONUS_BPS)
    }

    // ------------------------------------------------------------------
    // Worked examples
    // ------------------------------------------------------------------

    #[test]
    fn three_members_no_boost() {
        let r = calc().compute(3, 10_000).unwrap();
        assert_eq!(r.effective_rate_bps, 16_000);
        assert_eq!(r.total_reward, 16 * COIN);
        assert_eq!(r.circle_bonus, 6 * COIN);
        assert_eq!(r.other_bonus, 0);
    }

    #[test]
    fn empty_circle_no_boost_is_base() {
        let r = calc().compute(0, 10_000).unwrap();
        assert_eq!(r.effective_rate_bps, 10_000);
        assert_eq!(r.total_reward, DEFAULT_BASE_REWARD);
        assert_eq!(r.circle_bonus, 0);
        assert_eq!(r.other_bonus, 0);
    }

    #[test]
    fn boost_multiplies_circle_rate() {
        // (1 + 5 * 0.2) * 1.5 = 3.0
        let r = calc().compute(MAX_CIRCLE, 15_000).unwrap();
        assert_eq!(r.effective_rate_bps, 30_000);
        assert_eq!(r.total_reward, 30 * COIN);
        assert_eq!(r.circle_bonus, 10 * COIN);
        assert_eq!(r.other_bonus, 5 * COIN as i64);
    }

    #[test]
    fn penalty_boost_yields_negative_other_bonus() {
        let r = calc().compute(0, 5_000).unwrap();
        assert_eq!(r.total_reward, 5 * COIN);
        assert_eq!(r.other_bonus, -(5 * COIN as i64));
    }

    #[test]
    fn zero_boost_yields_zero_reward() {
        let r = calc().compute(4, 0).unwrap();
        assert_eq!(r.total_reward, 0);
        assert_eq!(r.effective_rate_bps, 0);
        assert_eq!(r.other_bonus, -(DEFAULT_BASE_REWARD as i64));
    }

    #[test]
    fn circle_is_not_clamped() {
        let r = calc().compute(10, 10_000).unwrap();
        assert_eq!(r.effective_rate_bps, 30_000);
    }

    #[test]
    fn huge_base_overflows_cleanly() {
        let c = RewardCalculator::new(u64::MAX, 100_000);
        assert_eq!(c.compute(u32::MAX, u32::MAX), Err(CalcError::Overflow));
    }

    #[test]
    fn effective_rate_matches_compute() {
        let c = calc();
        for circle in 0..=MAX_CIRCLE {
            for boost in [0u32, 5_000, 10_000, 12_500, 20_000] {
                let r = c.compute(circle, boost).unwrap();
                assert_eq!(r.effective_rate_bps, c.effective_rate_bps(circle, boost).unwrap());
            }
        }
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    proptest! {
        #[test]
        fn compute_is_deterministic(
            circle in 0u32..=MAX_CIRCLE,
            boost in 0u32..=50_000,
        ) {
            let c = calc();
            prop_assert_eq!(c.compute(circle, boost), c.compute(circle, boost));
        }

        #[test]
        fn total_matches_formula(
            base in 0u64..=1_000 * COIN,
            bonus in 0u64..=10_000,
            circle in 0u32..=MAX_CIRCLE,
            boost in 0u32..=50_000,
        ) {
            let c = RewardCalculator::new(base, bonus);
            let r = c.compute(circle, boost).unwrap();
            let expected = base as f64
                * (1.0 + circle as f64 * bonus as f64 / 10_000.0)
                * (boost as f64 / 10_000.0);
            // Integer truncation loses strictly less than one unit.
            prop_assert!((r.total_reward as f64 - expected).abs() <= 1.0 + expected * 1e-12);
        }

        #[test]
        fn neutral_boost_total_is_base_plus_circle(
            base in 0u64..=1_000 * COIN,
            circle in 0u32..=MAX_CIRCLE,
        ) {
            let c = RewardCalculator::new(base, DEFAULT_PER_MEMBER_BONUS_BPS);
            let r = c.compute(circle, 10_000).unwrap();
            prop_assert_eq!(r.total_reward, base + r.circle_bonus);
            prop_assert_eq!(r.other_bonus, 0);
        }

        #[test]
        fn reward_nondecreasing_in_circle(
            circle in 0u32..MAX_CIRCLE,
            boost in 0u32..=50_000,
        ) {
            let c = calc();
            let lo = c.compute(circle, boost).unwrap();
            let hi = c.compute(circle + 1, boost).unwrap();
            prop_assert!(hi.total_reward >= lo.total_reward);
        }
    }
}
