//! Integration test suite for the Bitizien accrual engine.
//!
//! Exercises the engine, scheduler, and reconciler against both stores,
//! with fault-injecting wrappers from [`helpers`] standing in for an
//! unreliable database.

pub mod helpers;
