use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use super::error::VaultError;
use crate::api::Ledger;
use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Existing allowance already covered the amount; nothing was sent.
    Sufficient,
    Approved { tx_hash: String },
}

/// Tops up an ERC-20 allowance to exactly what the next operation needs.
#[derive(Clone)]
pub struct ApprovalGate {
    ledger: Arc<dyn Ledger>,
    token: String,
    confirmation_timeout: Duration,
}

impl ApprovalGate {
    pub fn new(ledger: Arc<dyn Ledger>, token: impl Into<String>, confirmation_timeout: Duration) -> Self {
        Self {
            ledger,
            token: token.into(),
            confirmation_timeout,
        }
    }

    /// Approves `required` only if the current allowance falls short of it.
    pub async fn ensure_allowance(
        &self,
        owner: &str,
        spender: &str,
        required: RawAmount,
    ) -> Result<ApprovalOutcome, VaultError> {
        self.ensure_allowance_with(owner, spender, required, || {}).await
    }

    /// Same as [`ensure_allowance`](Self::ensure_allowance), calling `before_approve`
    /// once the read shows an approval is needed and before it is sent.
    pub async fn ensure_allowance_with<F>(
        &self,
        owner: &str,
        spender: &str,
        required: RawAmount,
        before_approve: F,
    ) -> Result<ApprovalOutcome, VaultError>
    where
        F: FnOnce() + Send,
    {
        let current = self
            .ledger
            .allowance(&self.token, owner, spender)
            .await
            .map_err(VaultError::read)?;
        if current >= required {
            debug!("🔓 Allowance {} covers {}, no approval needed", current, required);
            return Ok(ApprovalOutcome::Sufficient);
        }

        before_approve();
        let tx_hash = self.approve_exact(owner, spender, required).await?;
        Ok(ApprovalOutcome::Approved { tx_hash })
    }

    async fn approve_exact(&self, owner: &str, spender: &str, amount: RawAmount) -> Result<String, VaultError> {
        info!("🔐 Approving {} for spender {}", amount, spender);
        let tx_hash = self
            .ledger
            .approve(&self.token, owner, spender, amount)
            .await
            .map_err(|e| VaultError::Allowance {
                reason: e.to_string(),
                tx_hash: None,
                in_doubt: false,
            })?;

        let receipt = tokio::time::timeout(
            self.confirmation_timeout,
            self.ledger.wait_for_confirmation(&tx_hash),
        )
        .await
        .map_err(|_| VaultError::Allowance {
            reason: format!(
                "approval not confirmed within {}ms, its outcome is unknown",
                self.confirmation_timeout.as_millis()
            ),
            tx_hash: Some(tx_hash.clone()),
            in_doubt: true,
        })?
        .map_err(|e| VaultError::Allowance {
            reason: e.to_string(),
            tx_hash: Some(tx_hash.clone()),
            in_doubt: false,
        })?;

        if receipt.status == TxStatus::Reverted {
            return Err(VaultError::Allowance {
                reason: "approval reverted".to_string(),
                tx_hash: Some(tx_hash),
                in_doubt: false,
            });
        }
        debug!("✅ Approval {} confirmed", tx_hash);
        Ok(tx_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::demo::{DemoLedger, LedgerCall, DEMO_ASSET, DEMO_VAULT};
    use crate::vault::error::ErrorKind;

    const OWNER: &str = "0x00000000000000000000000000000000000a11ce";

    fn gate(ledger: &Arc<DemoLedger>, timeout_ms: u64) -> ApprovalGate {
        ApprovalGate::new(ledger.clone(), DEMO_ASSET, Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn sufficient_allowance_submits_nothing() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.set_allowance(OWNER, DEMO_VAULT, 500).await;

        let outcome = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 500).await.unwrap();

        assert_eq!(outcome, ApprovalOutcome::Sufficient);
        assert!(ledger.writes().await.is_empty());
    }

    #[tokio::test]
    async fn approves_exactly_the_required_amount() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.set_allowance(OWNER, DEMO_VAULT, 10).await;

        let outcome = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 100_000_000).await.unwrap();

        assert!(matches!(outcome, ApprovalOutcome::Approved { .. }));
        assert_eq!(
            ledger.writes().await,
            vec![LedgerCall::Approve {
                spender: DEMO_VAULT.to_string(),
                amount: 100_000_000,
            }]
        );
        assert_eq!(ledger.allowance(DEMO_ASSET, OWNER, DEMO_VAULT).await.unwrap(), 100_000_000);
    }

    #[tokio::test]
    async fn waits_for_the_approval_to_confirm() {
        let ledger = Arc::new(DemoLedger::new(6, 18));

        let outcome = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap();
        let ApprovalOutcome::Approved { tx_hash } = outcome else {
            panic!("expected an approval");
        };

        let calls = ledger.calls().await;
        assert_eq!(calls.last(), Some(&LedgerCall::Confirm { tx_hash }));
    }

    #[tokio::test]
    async fn rejected_approval_is_an_allowance_error() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.reject_approvals(true).await;

        let err = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allowance);
        assert_eq!(err.tx_hash(), None);
    }

    #[tokio::test]
    async fn reverted_approval_is_an_allowance_error() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.revert_next_transaction().await;

        let err = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allowance);
        assert!(err.tx_hash().is_some());
    }

    #[tokio::test]
    async fn unconfirmed_approval_times_out() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.stall_confirmations(true).await;

        let err = gate(&ledger, 50).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allowance);
        assert!(err.is_in_doubt());
        assert!(err.tx_hash().is_some());
    }

    #[tokio::test]
    async fn rejected_and_reverted_approvals_are_not_in_doubt() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.revert_next_transaction().await;
        let reverted = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();

        ledger.reject_approvals(true).await;
        let rejected = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();

        assert!(!reverted.is_in_doubt());
        assert!(!rejected.is_in_doubt());
    }

    #[tokio::test]
    async fn hook_runs_only_when_an_approval_is_sent() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.set_allowance(OWNER, DEMO_VAULT, 100).await;
        let gate = gate(&ledger, 1_000);

        let mut called = false;
        gate.ensure_allowance_with(OWNER, DEMO_VAULT, 100, || called = true).await.unwrap();
        assert!(!called);

        gate.ensure_allowance_with(OWNER, DEMO_VAULT, 101, || called = true).await.unwrap();
        assert!(called);
        assert_eq!(ledger.writes().await.len(), 1);
    }

    #[tokio::test]
    async fn allowance_read_failure_is_a_read_error() {
        let ledger = Arc::new(DemoLedger::new(6, 18));
        ledger.set_reads_unreachable(true).await;

        let err = gate(&ledger, 1_000).ensure_allowance(OWNER, DEMO_VAULT, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Read);
        assert!(ledger.writes().await.is_empty());
    }
}
