//! Error types for the accrual engine and its stores.
use std::time::Duration;

use thiserror::Error;

use crate::types::AccountId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("store call timed out after {0} ms")] Timeout(u64),
    #[error("corrupt record: {0}")] Corrupt(String),
    #[error("account already exists: {0}")] AlreadyExists(AccountId),
    #[error("account not found: {0}")] NotFound(AccountId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalcError {
    #[error("arithmetic overflow")] Overflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")] Invalid { field: &'static str, reason: String },
    #[error("config load: {0}")] Load(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccrualError {
    #[error("account not found: {0}")] AccountNotFound(AccountId),
    #[error("cooldown active: {remaining_ms} ms remaining")] CooldownActive { remaining_ms: u64 },
    #[error("write conflict on account {0}")] WriteConflict(AccountId),
    #[error(transparent)] StoreUnavailable(StoreError),
    #[error("partial commit on {account}: {amount} units credited without ledger entry ({reason})")]
    PartialCommit { account: AccountId, amount: u64, reason: String },
    #[error(transparent)] Calculation(#[from] CalcError),
}

impl AccrualError {
    /// Build a cooldown rejection from the remaining wait.
    pub fn cooldown(remaining: Duration) -> Self {
        Self::CooldownActive {
            remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether an on-demand caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::WriteConflict(_) | Self::CooldownActive { .. }
        )
    }

    pub fn is_cooldown(&self) -> bool {
        matches!(self, Self::CooldownActive { .. })
    }

    /// Remaining cooldown, for `CooldownActive` only.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            Self::CooldownActive { remaining_ms } => Some(Duration::from_millis(*remaining_ms)),
            _ => None,
        }
    }
}

impl From<StoreError> for AccrualError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::AccountNotFound(id),
            other => Self::StoreUnavailable(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_account_not_found() {
        let err: AccrualError = StoreError::NotFound(AccountId::from("x")).into();
        assert_eq!(err, AccrualError::AccountNotFound(AccountId::from("x")));
    }

    #[test]
    fn timeout_maps_to_store_unavailable() {
        let err: AccrualError = StoreError::Timeout(5).into();
        assert!(matches!(err, AccrualError::StoreUnavailable(StoreError::Timeout(5))));
        assert!(err.is_retryable());
    }

    #[test]
    fn cooldown_carries_remaining() {
        let err = AccrualError::cooldown(Duration::from_secs(90));
        assert!(err.is_cooldown());
        assert_eq!(err.remaining(), Some(Duration::from_secs(90)));
        assert_eq!(err.to_string(), "cooldown active: 90000 ms remaining");
    }

    #[test]
    fn partial_commit_is_not_retryable() {
        let err = AccrualError::PartialCommit {
            account: AccountId::from("x"),
            amount: 1,
            reason: "ledger down".into(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.remaining(), None);
    }
}
