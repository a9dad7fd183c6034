//! Node configuration for the Bitizien accrual node.
//!
//! [`NodeConfig`] holds the data directory, log filter, and the validated
//! [`MiningConfig`]. [`NodeConfig::load`] layers an optional TOML file under
//! `BITIZIEN_`-prefixed environment variables. Both use human units:
//!
//! ```toml
//! base_reward = 10.0        # coins per interval
//! per_member_bonus = 0.2    # fraction per circle member
//! cooldown_secs = 3600
//! boost_policy = "allow"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

use bitizien_core::config::{coin_to_units, fraction_to_bps, BoostPolicy, MiningConfig};
use bitizien_core::constants::{
    BPS_PRECISION, COIN, DEFAULT_BASE_REWARD, DEFAULT_COOLDOWN_SECS,
    DEFAULT_LEDGER_APPEND_ATTEMPTS, DEFAULT_PER_MEMBER_BONUS_BPS, DEFAULT_STORE_TIMEOUT_MS,
    DEFAULT_SWEEP_CONCURRENCY, DEFAULT_SWEEP_INTERVAL_SECS, MAX_CIRCLE,
};
use bitizien_core::error::ConfigError;

/// Prefix for environment overrides, e.g. `BITIZIEN_COOLDOWN_SECS`.
pub const ENV_PREFIX: &str = "BITIZIEN";

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "bitizien_accrual=debug").
    pub log_level: String,
    pub mining: MiningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            mining: MiningConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bitizien")
}

/// File/environment shape, in human units.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    log_level: String,
    base_reward: f64,
    per_member_bonus: f64,
    max_circle: u32,
    cooldown_secs: u64,
    sweep_interval_secs: u64,
    store_timeout_ms: u64,
    sweep_concurrency: usize,
    ledger_append_attempts: u32,
    boost_policy: String,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: "info".to_string(),
            base_reward: DEFAULT_BASE_REWARD as f64 / COIN as f64,
            per_member_bonus: DEFAULT_PER_MEMBER_BONUS_BPS as f64 / BPS_PRECISION as f64,
            max_circle: MAX_CIRCLE,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT_MS,
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            ledger_append_attempts: DEFAULT_LEDGER_APPEND_ATTEMPTS,
            boost_policy: BoostPolicy::default().to_string(),
        }
    }
}

impl RawConfig {
    fn into_node_config(self) -> Result<NodeConfig, ConfigError> {
        let mining = MiningConfig {
            base_reward: coin_to_units("base_reward", self.base_reward)?,
            per_member_bonus_bps: fraction_to_bps("per_member_bonus", self.per_member_bonus)?,
            max_circle: self.max_circle,
            cooldown: Duration::from_secs(self.cooldown_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            sweep_concurrency: self.sweep_concurrency,
            ledger_append_attempts: self.ledger_append_attempts,
            boost_policy: self.boost_policy.parse()?,
        };
        mining.validate()?;

        Ok(NodeConfig {
            data_dir: self.data_dir.unwrap_or_else(default_data_dir),
            log_level: self.log_level,
            mining,
        })
    }
}

impl NodeConfig {
    /// Load from an optional TOML file, then apply `BITIZIEN_*` overrides.
    ///
    /// A missing `path` is an error; `None` uses defaults plus environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        Self::from_builder(builder)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let raw: RawConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        raw.into_node_config()
    }

    /// Path to the RocksDB data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("accrualdata")
    }
}
