//! Vault operations as explicit state machines.
//!
//! Each run moves strictly forward through its phases:
//!
//! - deposit: `Validating → CheckingAllowance → [Approving] → Submitting → Confirming → Refreshing → Done`
//! - withdraw, redeem, harvest, rebalance, set-fees: `Validating → Submitting → Confirming → Refreshing → Done`
//!
//! Any phase may end in `Failed`. A phase starts only after the previous one
//! has settled, and only `Approving` and `Submitting` write to the ledger. The
//! store's snapshot is replaced only when the closing refresh succeeds.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::approval::{ApprovalGate, ApprovalOutcome};
use super::error::VaultError;
use super::reader::ChainReader;
use super::store::VaultStateStore;
use crate::api::Ledger;
use crate::model::units::{parse_units, percent_to_bps};
use crate::model::*;

/// What a completed run did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationReport {
    pub id: Uuid,
    pub kind: OperationKind,
    pub amount: Option<TokenAmount>,
    pub approval: Option<ApprovalOutcome>,
    pub tx_hash: String,
    pub transitions: Vec<OperationPhase>,
}

/// A request after validation, in ledger units.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Amount(TokenAmount),
    Strategy(String),
    Allocations(Vec<(String, RawAmount)>),
    Fees(FeeRates),
}

const MAX_FEE_BPS: u32 = 10_000;

fn validate_fees(request: &OperationRequest) -> Result<Input, VaultError> {
    let Some(AdminParams::Fees { performance, management }) = &request.admin else {
        return Err(VaultError::Validation("fee update needs both rates".to_string()));
    };
    let fees = FeeRates {
        performance_bps: percent_to_bps(performance)?,
        management_bps: percent_to_bps(management)?,
    };
    if fees.performance_bps > MAX_FEE_BPS || fees.management_bps > MAX_FEE_BPS {
        return Err(VaultError::Validation("fee rates cannot exceed 100%".to_string()));
    }
    Ok(Input::Fees(fees))
}

pub struct TransactionSequencer {
    ledger: Arc<dyn Ledger>,
    reader: ChainReader,
    approvals: ApprovalGate,
    store: Arc<VaultStateStore>,
    handles: VaultHandles,
    precision: Precision,
    confirmation_timeout: Duration,
}

struct Run<'a> {
    store: &'a VaultStateStore,
    request: &'a OperationRequest,
    transitions: Vec<OperationPhase>,
}

impl Run<'_> {
    fn enter(&mut self, phase: OperationPhase) {
        debug!("🔁 {} [{}] -> {:?}", self.request.kind, self.request.id, phase);
        self.store.set_phase(phase);
        self.transitions.push(phase);
    }
}

impl TransactionSequencer {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<VaultStateStore>,
        handles: VaultHandles,
        precision: Precision,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            reader: ChainReader::new(ledger.clone()),
            approvals: ApprovalGate::new(ledger.clone(), handles.asset.clone(), confirmation_timeout),
            ledger,
            store,
            handles,
            precision,
            confirmation_timeout,
        }
    }

    pub async fn deposit(&self, assets: &str, account: &str) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::deposit(assets, account)).await
    }

    pub async fn withdraw(&self, assets: &str, account: &str) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::withdraw(assets, account)).await
    }

    pub async fn redeem(&self, shares: &str, account: &str) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::redeem(shares, account)).await
    }

    pub async fn harvest(&self, strategy: &str, account: &str) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::harvest(strategy, account)).await
    }

    pub async fn rebalance(
        &self,
        allocations: Vec<AllocationTarget>,
        account: &str,
    ) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::rebalance(allocations, account)).await
    }

    pub async fn set_fees(
        &self,
        performance: &str,
        management: &str,
        account: &str,
    ) -> Result<OperationReport, VaultError> {
        self.execute(&OperationRequest::set_fees(performance, management, account)).await
    }

    /// Runs one request to completion. Rejected with `Busy` while another run
    /// or refresh holds the store.
    pub async fn execute(&self, request: &OperationRequest) -> Result<OperationReport, VaultError> {
        let _busy = self.store.try_begin()?;
        match &request.admin {
            Some(params) => info!(
                "🚀 Starting {} with {:?} for {} [{}]",
                request.kind, params, request.account, request.id
            ),
            None => info!(
                "🚀 Starting {} of {:?} for {} [{}]",
                request.kind, request.amount, request.account, request.id
            ),
        }

        let mut run = Run {
            store: &self.store,
            request,
            transitions: Vec::new(),
        };
        match self.drive(&mut run).await {
            Ok(report) => {
                info!("✅ {} [{}] done in tx {}", request.kind, request.id, report.tx_hash);
                Ok(report)
            }
            Err(e) => {
                run.enter(OperationPhase::Failed);
                if e.is_in_doubt() {
                    warn!("⏳ {} [{}] outcome unknown: {}", request.kind, request.id, e);
                } else {
                    error!("❌ {} [{}] failed: {}", request.kind, request.id, e);
                }
                self.store.record_error(e.clone());
                Err(e)
            }
        }
    }

    async fn drive(&self, run: &mut Run<'_>) -> Result<OperationReport, VaultError> {
        let request = run.request;

        run.enter(OperationPhase::Validating);
        let input = self.validate(request)?;

        let approval = match (&input, request.kind) {
            (Input::Amount(assets), OperationKind::Deposit) => {
                run.enter(OperationPhase::CheckingAllowance);
                let outcome = self
                    .approvals
                    .ensure_allowance_with(&request.account, &self.handles.vault, assets.raw, || {
                        run.enter(OperationPhase::Approving)
                    })
                    .await?;
                Some(outcome)
            }
            _ => None,
        };

        run.enter(OperationPhase::Submitting);
        let tx_hash = self.submit(request, &input).await?;

        run.enter(OperationPhase::Confirming);
        self.confirm(&tx_hash).await?;

        run.enter(OperationPhase::Refreshing);
        let snapshot = self
            .reader
            .fetch_snapshot(&self.handles, Some(&request.account))
            .await
            .map_err(|e| {
                warn!("⚠️ {} confirmed in {} but the refresh failed", request.kind, tx_hash);
                e
            })?;
        self.store.commit(snapshot);

        run.enter(OperationPhase::Done);
        Ok(OperationReport {
            id: request.id,
            kind: request.kind,
            amount: match input {
                Input::Amount(amount) => Some(amount),
                _ => None,
            },
            approval,
            tx_hash,
            transitions: run.transitions.clone(),
        })
    }

    /// Checks the request without touching the ledger.
    fn validate(&self, request: &OperationRequest) -> Result<Input, VaultError> {
        if request.account.trim().is_empty() {
            return Err(VaultError::Validation("no account connected".to_string()));
        }

        let decimals = match request.kind {
            OperationKind::Deposit | OperationKind::Withdraw => self.precision.asset,
            OperationKind::Redeem => self.precision.share,
            OperationKind::Harvest => {
                let strategy = request.amount.trim();
                if strategy.is_empty() {
                    return Err(VaultError::Validation("no strategy selected".to_string()));
                }
                return Ok(Input::Strategy(strategy.to_string()));
            }
            OperationKind::Rebalance => return self.validate_allocations(request),
            OperationKind::SetFees => return validate_fees(request),
        };

        let raw = parse_units(&request.amount, decimals)?;
        if raw == 0 {
            return Err(VaultError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        Ok(Input::Amount(TokenAmount::new(raw, decimals)))
    }

    fn validate_allocations(&self, request: &OperationRequest) -> Result<Input, VaultError> {
        let Some(AdminParams::Rebalance(targets)) = &request.admin else {
            return Err(VaultError::Validation("rebalance needs target allocations".to_string()));
        };
        if targets.is_empty() {
            return Err(VaultError::Validation("rebalance needs target allocations".to_string()));
        }

        let mut allocations: Vec<(String, RawAmount)> = Vec::with_capacity(targets.len());
        for target in targets {
            let strategy = target.strategy.trim().to_ascii_lowercase();
            if strategy.is_empty() {
                return Err(VaultError::Validation("allocation without a strategy".to_string()));
            }
            if allocations.iter().any(|(seen, _)| *seen == strategy) {
                return Err(VaultError::Validation(format!(
                    "strategy {} listed more than once",
                    strategy
                )));
            }
            // Zero is a valid target: it pulls everything back to idle.
            let raw = parse_units(&target.amount, self.precision.asset)?;
            allocations.push((strategy, raw));
        }
        Ok(Input::Allocations(allocations))
    }

    async fn submit(&self, request: &OperationRequest, input: &Input) -> Result<String, VaultError> {
        let vault = self.handles.vault.as_str();
        let account = request.account.as_str();

        let submitted = match (request.kind, input) {
            (OperationKind::Deposit, Input::Amount(a)) => {
                self.ledger.deposit(vault, account, a.raw, account).await
            }
            (OperationKind::Withdraw, Input::Amount(a)) => {
                self.ledger.withdraw(vault, account, a.raw, account, account).await
            }
            (OperationKind::Redeem, Input::Amount(s)) => {
                self.ledger.redeem(vault, account, s.raw, account, account).await
            }
            (OperationKind::Harvest, Input::Strategy(strategy)) => {
                self.ledger.harvest(vault, account, strategy).await
            }
            (OperationKind::Rebalance, Input::Allocations(allocations)) => {
                self.ledger.rebalance(vault, account, allocations).await
            }
            (OperationKind::SetFees, Input::Fees(fees)) => {
                self.ledger.set_fees(vault, account, *fees).await
            }
            (kind, input) => {
                return Err(VaultError::Validation(format!(
                    "{} cannot be submitted with {:?}",
                    kind, input
                )))
            }
        };
        let tx_hash = submitted.map_err(VaultError::submission)?;
        debug!("📤 {} submitted as {}", request.kind, tx_hash);
        Ok(tx_hash)
    }

    async fn confirm(&self, tx_hash: &str) -> Result<TxReceipt, VaultError> {
        let waited = tokio::time::timeout(
            self.confirmation_timeout,
            self.ledger.wait_for_confirmation(tx_hash),
        )
        .await;

        let receipt = match waited {
            Err(_) => {
                return Err(VaultError::ConfirmationTimeout {
                    tx_hash: tx_hash.to_string(),
                    timeout_ms: u64::try_from(self.confirmation_timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Ok(Err(e)) => {
                return Err(VaultError::Submission {
                    reason: e.to_string(),
                    tx_hash: Some(tx_hash.to_string()),
                })
            }
            Ok(Ok(receipt)) => receipt,
        };

        if receipt.status == TxStatus::Reverted {
            return Err(VaultError::Submission {
                reason: "transaction reverted".to_string(),
                tx_hash: Some(tx_hash.to_string()),
            });
        }
        Ok(receipt)
    }
}
