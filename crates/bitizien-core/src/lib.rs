//! # bitizien-core
//! Foundation types, the reward calculator, and the store contracts shared
//! by the accrual engine and its storage backends.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod reward;
pub mod traits;
pub mod types;
