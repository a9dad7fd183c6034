//! # bitizien-accrual — Reward accrual engine.
//!
//! - **Engine**: cooldown check, reward calculation, compare-and-swap balance
//!   update and ledger append for one account; parallel sweeps over all.
//! - **Scheduler**: a restartable periodic sweep task with explicit
//!   start/stop lifecycle.
//! - **Reconciler**: detects and repairs accounts whose audit total and
//!   ledger disagree after a partial commit.
//! - **MemoryStore**: in-process account store and ledger.

pub mod engine;
pub mod memory;
pub mod reconcile;
pub mod scheduler;

pub use engine::{AccrualEngine, MiningStats, SweepReport};
pub use memory::MemoryStore;
pub use reconcile::{ReconcileReport, Reconciler, Repair};
pub use scheduler::{Scheduler, SchedulerState};
