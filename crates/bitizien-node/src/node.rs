//! Node composition and lifecycle.
//!
//! The [`Node`] owns one [`RocksStore`] serving as both account store and
//! ledger, and wires it into the accrual engine, the sweep scheduler, and
//! the reconciler. [`Node::run`] reconciles first, then schedules sweeps
//! until the shutdown future resolves.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use bitizien_accrual::{AccrualEngine, ReconcileReport, Reconciler, Scheduler};
use bitizien_core::clock::{Clock, SystemClock};
use bitizien_core::error::{AccrualError, ConfigError, StoreError};
use bitizien_core::traits::AccountStore;
use bitizien_core::types::{Account, AccountId};

use crate::config::NodeConfig;
use crate::storage::RocksStore;

/// Errors surfaced by node operations.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error(transparent)]
    Accrual(#[from] AccrualError),
    #[error("data directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A running accrual node.
pub struct Node {
    config: NodeConfig,
    store: Arc<RocksStore>,
    engine: Arc<AccrualEngine>,
    scheduler: Scheduler,
    reconciler: Reconciler,
}

impl Node {
    /// Open the node's database under `config.data_dir` using the system clock.
    pub fn open(config: NodeConfig) -> Result<Self, NodeError> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: NodeConfig, clock: Arc<dyn Clock>) -> Result<Self, NodeError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let store = Arc::new(RocksStore::open(config.db_path())?);
        let engine = Arc::new(AccrualEngine::new(
            store.clone(),
            store.clone(),
            clock,
            config.mining.clone(),
        )?);
        let scheduler = Scheduler::new(Arc::clone(&engine));
        let reconciler = Reconciler::new(store.clone(), store.clone(), config.mining.store_timeout);

        info!(data_dir = %config.data_dir.display(), "node opened");
        Ok(Self {
            config,
            store,
            engine,
            scheduler,
            reconciler,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<AccrualEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<RocksStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Register a new account with zero balance.
    pub async fn register(&self, account: Account) -> Result<(), NodeError> {
        let id = account.id.clone();
        self.store.create_account(account).await?;
        info!(account = %id, "account registered");
        Ok(())
    }

    pub async fn set_circle_size(&self, id: &AccountId, circle_size: u32) -> Result<(), NodeError> {
        Ok(self.store.set_circle_size(id, circle_size).await?)
    }

    pub async fn set_boost(&self, id: &AccountId, boost_bps: u32) -> Result<(), NodeError> {
        Ok(self.store.set_boost(id, boost_bps).await?)
    }

    /// Repair balance/ledger divergence. Call only while the scheduler is stopped.
    pub async fn reconcile(&self) -> Result<ReconcileReport, NodeError> {
        Ok(self.reconciler.reconcile_all().await?)
    }

    /// Reconcile, then sweep every `sweep_interval` until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()>,
    {
        let report = self.reconcile().await?;
        if report.failed > 0 {
            warn!(failed = report.failed, "starting with unreconciled accounts");
        }

        self.scheduler.start(self.config.mining.sweep_interval);
        shutdown.await;
        info!("shutdown requested");
        self.scheduler.shutdown().await;
        Ok(())
    }
}
