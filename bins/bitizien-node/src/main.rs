//! Bitizien accrual node binary.
//!
//! `run` opens the RocksDB store, reconciles balances against the ledger,
//! and sweeps every account on the configured interval until Ctrl+C. The
//! other subcommands operate once against the same store and print JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use bitizien_core::config::fraction_to_bps;
use bitizien_core::types::{Account, AccountId};
use bitizien_node::{Node, NodeConfig};

/// Bitizien reward accrual node.
#[derive(Parser, Debug)]
#[command(name = "bitizien-node", version, about = "Periodic reward accrual over RocksDB")]
struct Cli {
    /// TOML configuration file (environment overrides use the BITIZIEN_ prefix)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile, then sweep on the configured interval until Ctrl+C.
    Run,
    /// Accrue one account now.
    Accrue { id: String },
    /// Run a single sweep over all accounts.
    Sweep,
    /// Show an account's mining stats.
    Stats { id: String },
    /// Show an account's accrual history, newest first.
    History {
        id: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = bitizien_core::constants::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Repair balance/ledger divergence.
    Reconcile,
    /// Register a new account.
    Register {
        id: String,
        /// Referral circle size
        #[arg(long, default_value_t = 0)]
        circle: u32,
        /// Boost factor (1.0 = neutral)
        #[arg(long, default_value_t = 1.0)]
        boost: f64,
    },
    /// Update an account's referral circle size.
    SetCircle { id: String, circle: u32 },
    /// Update an account's boost factor (1.0 = neutral).
    SetBoost { id: String, boost: f64 },
}

impl Cli {
    /// Load file/environment configuration and apply CLI overrides.
    fn node_config(&self) -> Result<NodeConfig> {
        let mut config =
            NodeConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        Ok(config)
    }
}

fn boost_to_bps(boost: f64) -> Result<u32> {
    let bps = fraction_to_bps("boost", boost)?;
    u32::try_from(bps).with_context(|| format!("boost {boost} is too large"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.node_config()?;

    init_logging(&config.log_level, &cli.log_format);
    info!("Bitizien node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);

    let node = Node::open(config).context("failed to open node")?;

    match cli.command {
        Command::Run => {
            info!(
                sweep_interval_secs = node.config().mining.sweep_interval.as_secs(),
                cooldown_secs = node.config().mining.cooldown.as_secs(),
                "node running (Ctrl+C to stop)"
            );
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("failed to listen for Ctrl+C: {e}");
                }
                info!("received Ctrl+C, shutting down...");
            };
            node.run(shutdown).await?;
            info!("Bitizien node shutdown complete");
        }
        Command::Accrue { id } => {
            let outcome = node
                .engine()
                .accrue_one(&AccountId::from(id.as_str()))
                .await
                .with_context(|| format!("accrual for {id} failed"))?;
            print_json(&outcome)?;
        }
        Command::Sweep => {
            let report = node.engine().sweep_all().await?;
            print_json(&report)?;
        }
        Command::Stats { id } => {
            let stats = node
                .engine()
                .stats(&AccountId::from(id.as_str()))
                .await
                .with_context(|| format!("stats for {id} failed"))?;
            print_json(&stats)?;
        }
        Command::History { id, page, limit } => {
            let history = node
                .engine()
                .history(&AccountId::from(id.as_str()), page, limit)
                .await
                .with_context(|| format!("history for {id} failed"))?;
            print_json(&history)?;
        }
        Command::Reconcile => {
            let report = node.reconcile().await?;
            print_json(&report)?;
        }
        Command::Register { id, circle, boost } => {
            let account = Account::new(id.as_str())
                .with_circle(circle)
                .with_boost(boost_to_bps(boost)?);
            node.register(account.clone())
                .await
                .with_context(|| format!("failed to register {id}"))?;
            print_json(&account)?;
        }
        Command::SetCircle { id, circle } => {
            node.set_circle_size(&AccountId::from(id.as_str()), circle)
                .await
                .with_context(|| format!("failed to update circle for {id}"))?;
        }
        Command::SetBoost { id, boost } => {
            node.set_boost(&AccountId::from(id.as_str()), boost_to_bps(boost)?)
                .await
                .with_context(|| format!("failed to update boost for {id}"))?;
        }
    }

    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text. Logs go to stderr so command output on
/// stdout stays machine-readable.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
