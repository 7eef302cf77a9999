//! Failure modes of the vault client.
//!
//! Every operation that can fail returns a [`VaultError`]. The variants map
//! one-to-one onto the points of a run where something can go wrong, so a
//! caller can tell a rejected transaction from one whose outcome is unknown.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::LedgerError;
use crate::model::units::UnitsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Allowance,
    Submission,
    ConfirmationTimeout,
    Read,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// Input rejected before any ledger call was made.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The approval could not be submitted, reverted, or was not confirmed in time.
    /// `in_doubt` marks the last case: the approval may still land.
    #[error("approval failed: {reason}")]
    Allowance {
        reason: String,
        tx_hash: Option<String>,
        in_doubt: bool,
    },

    /// The ledger refused the transaction or mined it with a reverted status.
    #[error("transaction failed: {reason}")]
    Submission {
        reason: String,
        tx_hash: Option<String>,
    },

    /// Finality was not observed in time. The transaction may still land.
    #[error("outcome unknown: {tx_hash} not confirmed within {timeout_ms}ms")]
    ConfirmationTimeout { tx_hash: String, timeout_ms: u64 },

    #[error("failed to read vault state: {0}")]
    Read(String),

    /// Another operation or refresh is already in flight for this session.
    #[error("another vault operation is in progress")]
    Busy,
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Validation(_) => ErrorKind::Validation,
            VaultError::Allowance { .. } => ErrorKind::Allowance,
            VaultError::Submission { .. } => ErrorKind::Submission,
            VaultError::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            VaultError::Read(_) => ErrorKind::Read,
            VaultError::Busy => ErrorKind::Busy,
        }
    }

    /// True when a transaction was sent but its final status is not known.
    pub fn is_in_doubt(&self) -> bool {
        matches!(
            self,
            VaultError::ConfirmationTimeout { .. } | VaultError::Allowance { in_doubt: true, .. }
        )
    }

    pub fn tx_hash(&self) -> Option<&str> {
        match self {
            VaultError::Allowance { tx_hash, .. } | VaultError::Submission { tx_hash, .. } => {
                tx_hash.as_deref()
            }
            VaultError::ConfirmationTimeout { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }

    pub(crate) fn read(err: LedgerError) -> Self {
        VaultError::Read(err.to_string())
    }

    pub(crate) fn submission(err: LedgerError) -> Self {
        VaultError::Submission {
            reason: err.to_string(),
            tx_hash: None,
        }
    }
}

impl From<UnitsError> for VaultError {
    fn from(err: UnitsError) -> Self {
        VaultError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_are_in_doubt() {
        let timeout = VaultError::ConfirmationTimeout {
            tx_hash: "0xabc".to_string(),
            timeout_ms: 30_000,
        };
        let reverted = VaultError::Submission {
            reason: "reverted".to_string(),
            tx_hash: Some("0xabc".to_string()),
        };

        assert!(timeout.is_in_doubt());
        assert!(!reverted.is_in_doubt());
        assert_ne!(timeout.kind(), reverted.kind());
        assert_eq!(timeout.tx_hash(), Some("0xabc"));
    }

    #[test]
    fn unconfirmed_approvals_are_in_doubt() {
        let timed_out = VaultError::Allowance {
            reason: "not confirmed".to_string(),
            tx_hash: Some("0xabc".to_string()),
            in_doubt: true,
        };
        let rejected = VaultError::Allowance {
            reason: "user rejected".to_string(),
            tx_hash: None,
            in_doubt: false,
        };

        assert!(timed_out.is_in_doubt());
        assert!(!rejected.is_in_doubt());
        assert_eq!(timed_out.kind(), ErrorKind::Allowance);
    }

    #[test]
    fn unit_errors_are_validation_errors() {
        let err: VaultError = UnitsError::Negative.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn ledger_errors_keep_their_message() {
        let err = VaultError::read(LedgerError::Unreachable("connection refused".to_string()));
        assert_eq!(
            err.to_string(),
            "failed to read vault state: ledger unreachable: connection refused"
        );
    }
}
