//! # bitizien-node — Persistent storage, configuration, and node wiring.
//!
//! Composes the accrual subsystem into a running process:
//! - [`storage::RocksStore`] — accounts and ledger backed by RocksDB
//! - [`node::Node`] — opens storage, reconciles, and drives the scheduler
//! - [`config::NodeConfig`] — layered file/environment configuration

pub mod config;
pub mod node;
pub mod storage;

pub use config::NodeConfig;
pub use node::{Node, NodeError};
pub use storage::RocksStore;
