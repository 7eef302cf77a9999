use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataSourceStatus {
    Connected,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    Unreachable(String),
    #[error("invalid ledger handle: {0}")]
    InvalidHandle(String),
    #[error("call reverted: {0}")]
    CallReverted(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Read and write entry points of the vault, its asset token and its strategies.
///
/// Amounts are raw fixed-point integers. Write calls return once the ledger has
/// accepted the transaction; finality is observed separately through
/// [`Ledger::wait_for_confirmation`].
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn decimals(&self, token: &str) -> LedgerResult<u8>;
    async fn balance_of(&self, token: &str, account: &str) -> LedgerResult<RawAmount>;
    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> LedgerResult<RawAmount>;

    async fn total_assets(&self, vault: &str) -> LedgerResult<RawAmount>;
    async fn total_supply(&self, vault: &str) -> LedgerResult<RawAmount>;
    async fn total_allocated(&self, vault: &str) -> LedgerResult<RawAmount>;
    async fn max_deposit(&self, vault: &str, receiver: &str) -> LedgerResult<RawAmount>;
    async fn max_withdraw(&self, vault: &str, owner: &str) -> LedgerResult<RawAmount>;
    async fn fee_rates(&self, vault: &str) -> LedgerResult<FeeRates>;
    async fn active_strategies(&self, vault: &str) -> LedgerResult<Vec<String>>;
    async fn strategy_info(&self, vault: &str, strategy: &str) -> LedgerResult<StrategyInfo>;

    async fn convert_to_shares(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount>;
    async fn convert_to_assets(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount>;
    async fn preview_deposit(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount>;
    async fn preview_withdraw(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount>;
    async fn preview_redeem(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount>;

    async fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: RawAmount,
    ) -> LedgerResult<String>;
    async fn deposit(
        &self,
        vault: &str,
        caller: &str,
        assets: RawAmount,
        receiver: &str,
    ) -> LedgerResult<String>;
    async fn withdraw(
        &self,
        vault: &str,
        caller: &str,
        assets: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String>;
    async fn redeem(
        &self,
        vault: &str,
        caller: &str,
        shares: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String>;
    async fn harvest(&self, vault: &str, caller: &str, strategy: &str) -> LedgerResult<String>;
    /// Moves each listed strategy to its target allocation; unlisted strategies keep theirs.
    async fn rebalance(
        &self,
        vault: &str,
        caller: &str,
        allocations: &[(String, RawAmount)],
    ) -> LedgerResult<String>;
    async fn set_fees(&self, vault: &str, caller: &str, fees: FeeRates) -> LedgerResult<String>;

    /// Resolves once `tx_hash` is final. Callers bound this with their own timeout.
    async fn wait_for_confirmation(&self, tx_hash: &str) -> LedgerResult<TxReceipt>;

    async fn get_status(&self) -> DataSourceStatus;
}
