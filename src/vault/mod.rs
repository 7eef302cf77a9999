pub mod approval;
pub mod converter;
pub mod error;
pub mod reader;
pub mod sequencer;
pub mod store;

pub use approval::{ApprovalGate, ApprovalOutcome};
pub use converter::UnitConverter;
pub use error::{ErrorKind, VaultError};
pub use reader::ChainReader;
pub use sequencer::{OperationReport, TransactionSequencer};
pub use store::{VaultState, VaultStateStore};

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::api::Ledger;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Upper bound on waiting for any one transaction to confirm.
    pub confirmation_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// One connected vault for one (optional) account.
///
/// Built on connect, dropped on disconnect. Owns the state store; every
/// mutation of UI-visible state goes through the components held here.
pub struct VaultSession {
    ledger: Arc<dyn Ledger>,
    handles: VaultHandles,
    account: Option<String>,
    precision: Precision,
    reader: ChainReader,
    converter: UnitConverter,
    sequencer: TransactionSequencer,
    store: Arc<VaultStateStore>,
}

impl VaultSession {
    /// Resolves both token precisions and wires up the components. Nothing is
    /// fetched into the store until the first `refresh`.
    pub async fn connect(
        ledger: Arc<dyn Ledger>,
        handles: VaultHandles,
        account: Option<String>,
        options: SessionOptions,
    ) -> Result<Self, VaultError> {
        let reader = ChainReader::new(ledger.clone());
        let precision = reader.precision(&handles).await?;
        info!(
            "🔌 Connected to vault {} (asset {}, {} / {} decimals)",
            handles.vault, handles.asset, precision.asset, precision.share
        );

        let store = Arc::new(VaultStateStore::new());
        let converter = UnitConverter::new(ledger.clone(), handles.vault.clone(), precision);
        let sequencer = TransactionSequencer::new(
            ledger.clone(),
            store.clone(),
            handles.clone(),
            precision,
            options.confirmation_timeout,
        );

        Ok(Self {
            ledger,
            handles,
            account: account.filter(|a| !a.trim().is_empty()),
            precision,
            reader,
            converter,
            sequencer,
            store,
        })
    }

    pub fn handles(&self) -> &VaultHandles {
        &self.handles
    }

    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    pub fn converter(&self) -> &UnitConverter {
        &self.converter
    }

    pub fn store(&self) -> &VaultStateStore {
        &self.store
    }

    pub fn subscribe(&self) -> watch::Receiver<VaultState> {
        self.store.subscribe()
    }

    /// Fetches a fresh snapshot and replaces the stored one. On failure the
    /// previous snapshot stays and the error is recorded.
    pub async fn refresh(&self) -> Result<Snapshot, VaultError> {
        let _busy = self.store.try_begin()?;
        self.store.set_phase(OperationPhase::Refreshing);

        match self.reader.fetch_snapshot(&self.handles, self.account()).await {
            Ok(snapshot) => {
                self.store.commit(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                warn!("⚠️ Refresh of vault {} failed: {}", self.handles.vault, e);
                self.store.record_error(e.clone());
                Err(e)
            }
        }
    }

    pub async fn deposit(&self, assets: &str) -> Result<OperationReport, VaultError> {
        self.sequencer.deposit(assets, self.signer()).await
    }

    pub async fn withdraw(&self, assets: &str) -> Result<OperationReport, VaultError> {
        self.sequencer.withdraw(assets, self.signer()).await
    }

    pub async fn redeem(&self, shares: &str) -> Result<OperationReport, VaultError> {
        self.sequencer.redeem(shares, self.signer()).await
    }

    pub async fn harvest(&self, strategy: &str) -> Result<OperationReport, VaultError> {
        self.sequencer.harvest(strategy, self.signer()).await
    }

    pub async fn rebalance(&self, allocations: Vec<AllocationTarget>) -> Result<OperationReport, VaultError> {
        self.sequencer.rebalance(allocations, self.signer()).await
    }

    /// Updates both vault fees; rates are percentages such as "10" or "2.5".
    pub async fn set_fees(&self, performance: &str, management: &str) -> Result<OperationReport, VaultError> {
        self.sequencer.set_fees(performance, management, self.signer()).await
    }

    pub fn disconnect(self) {
        info!("👋 Disconnected from vault {}", self.handles.vault);
    }

    // An empty account is rejected by the sequencer's validation step.
    fn signer(&self) -> &str {
        self.account.as_deref().unwrap_or_default()
    }
}
