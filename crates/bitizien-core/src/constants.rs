//! Protocol constants. All monetary values in units (1 coin = 10^8 units).
//! All rates and fractions in basis points (10_000 bps = 1.0).

/// Units per whole coin.
pub const COIN: u64 = 100_000_000;

/// Basis-point denominator: `BPS_PRECISION` bps == a factor of 1.0.
pub const BPS_PRECISION: u64 = 10_000;

/// Boost factor of 1.0 (no promotion applied).
pub const NEUTRAL_BOOST_BPS: u32 = 10_000;

/// Reward granted to a zero-circle, unboosted account per interval.
pub const DEFAULT_BASE_REWARD: u64 = 10 * COIN;

/// Bonus fraction contributed by each circle member (20%).
pub const DEFAULT_PER_MEMBER_BONUS_BPS: u64 = 2_000;

/// Largest circle that still earns a bonus.
pub const MAX_CIRCLE: u32 = 5;

/// Upper bound accepted for a configured circle cap.
pub const MAX_CIRCLE_LIMIT: u32 = 1_000;

/// Upper bound accepted for a configured per-member bonus (10x per member).
pub const MAX_PER_MEMBER_BONUS_BPS: u64 = 100_000;

/// Minimum time between two accruals of one account.
pub const DEFAULT_COOLDOWN_SECS: u64 = 60 * 60;

/// Period between scheduled sweeps.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Bound on any single store call.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Accounts accrued in parallel during one sweep.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 16;

/// Ledger append attempts before a grant is reported as a partial commit.
pub const DEFAULT_LEDGER_APPEND_ATTEMPTS: u32 = 3;

/// Default page size for ledger history.
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Largest page size served by ledger history.
pub const MAX_HISTORY_LIMIT: usize = 500;
