//! JSON-RPC ledger backed by alloy.
//!
//! Transactions are sent with `eth_sendTransaction` from the caller's address,
//! so signing stays with the node or the wallet in front of it.

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::time::Duration;
use url::Url;

use super::provider::{DataSourceStatus, Ledger, LedgerError, LedgerResult};
use crate::config::Config;
use crate::model::*;

sol! {
    #[sol(rpc)]
    interface IERC20 {
        function decimals() external view returns (uint8);
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(rpc)]
    interface IStrategyVault {
        function decimals() external view returns (uint8);
        function totalAssets() external view returns (uint256);
        function totalSupply() external view returns (uint256);
        function totalAllocated() external view returns (uint256);
        function maxDeposit(address receiver) external view returns (uint256);
        function maxWithdraw(address owner) external view returns (uint256);
        function performanceFee() external view returns (uint256);
        function managementFee() external view returns (uint256);
        function getActiveStrategies() external view returns (address[] memory);
        function strategies(address strategy) external view returns (
            string memory name,
            uint256 allocated,
            bool active,
            uint256 performanceFee,
            uint256 lastHarvest
        );

        function convertToShares(uint256 assets) external view returns (uint256);
        function convertToAssets(uint256 shares) external view returns (uint256);
        function previewDeposit(uint256 assets) external view returns (uint256);
        function previewWithdraw(uint256 assets) external view returns (uint256);
        function previewRedeem(uint256 shares) external view returns (uint256);

        function deposit(uint256 assets, address receiver) external returns (uint256 shares);
        function withdraw(uint256 assets, address receiver, address owner) external returns (uint256 shares);
        function redeem(uint256 shares, address receiver, address owner) external returns (uint256 assets);
        function harvest(address strategy) external;
        function rebalance(address[] calldata strategies, uint256[] calldata amounts) external;
        function setFees(uint256 performanceFee, uint256 managementFee) external;
    }
}

pub struct RpcLedger {
    provider: DynProvider,
    poll_interval: Duration,
}

fn address(handle: &str) -> LedgerResult<Address> {
    handle
        .parse::<Address>()
        .map_err(|_| LedgerError::InvalidHandle(handle.to_string()))
}

/// Allowances and deposit/withdraw limits; `u128::MAX` already reads as unlimited.
fn limit(value: U256) -> RawAmount {
    u128::try_from(value).unwrap_or(u128::MAX)
}

/// Balances, totals and conversions. Saturation here misstates a real amount.
fn amount(value: U256, field: &str) -> RawAmount {
    u128::try_from(value).unwrap_or_else(|_| {
        warn!("⚠️ {} {} exceeds the client's range, shown as {}", field, value, u128::MAX);
        u128::MAX
    })
}

fn bps(value: U256) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn call_error(err: alloy::contract::Error) -> LedgerError {
    match err {
        alloy::contract::Error::TransportError(e) if !e.is_error_resp() => {
            LedgerError::Unreachable(e.to_string())
        }
        other => LedgerError::CallReverted(other.to_string()),
    }
}

fn send_error(err: alloy::contract::Error) -> LedgerError {
    match err {
        alloy::contract::Error::TransportError(e) if !e.is_error_resp() => {
            LedgerError::Unreachable(e.to_string())
        }
        other => LedgerError::Rejected(other.to_string()),
    }
}

impl RpcLedger {
    pub async fn new(config: &Config) -> Result<Self> {
        let url = Url::parse(&config.rpc_url)?;
        let provider = ProviderBuilder::new().connect_http(url).erased();

        let chain_id = provider.get_chain_id().await?;
        if chain_id != config.network_id {
            return Err(anyhow::anyhow!(
                "RPC endpoint is on chain {}, config expects {}",
                chain_id,
                config.network_id
            ));
        }
        info!("✅ Connected to {} (chain {})", config.rpc_url, chain_id);

        Ok(Self {
            provider,
            poll_interval: config.receipt_poll_interval(),
        })
    }

    fn vault(&self, handle: &str) -> LedgerResult<IStrategyVault::IStrategyVaultInstance<DynProvider>> {
        Ok(IStrategyVault::new(address(handle)?, self.provider.clone()))
    }

    fn token(&self, handle: &str) -> LedgerResult<IERC20::IERC20Instance<DynProvider>> {
        Ok(IERC20::new(address(handle)?, self.provider.clone()))
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn decimals(&self, token: &str) -> LedgerResult<u8> {
        self.token(token)?.decimals().call().await.map_err(call_error)
    }

    async fn balance_of(&self, token: &str, account: &str) -> LedgerResult<RawAmount> {
        let value = self.token(token)?.balanceOf(address(account)?).call().await.map_err(call_error)?;
        Ok(amount(value, "balance"))
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> LedgerResult<RawAmount> {
        let value = self
            .token(token)?
            .allowance(address(owner)?, address(spender)?)
            .call()
            .await
            .map_err(call_error)?;
        Ok(limit(value))
    }

    async fn total_assets(&self, vault: &str) -> LedgerResult<RawAmount> {
        let value = self.vault(vault)?.totalAssets().call().await.map_err(call_error)?;
        Ok(amount(value, "totalAssets"))
    }

    async fn total_supply(&self, vault: &str) -> LedgerResult<RawAmount> {
        let value = self.vault(vault)?.totalSupply().call().await.map_err(call_error)?;
        Ok(amount(value, "totalSupply"))
    }

    async fn total_allocated(&self, vault: &str) -> LedgerResult<RawAmount> {
        let value = self.vault(vault)?.totalAllocated().call().await.map_err(call_error)?;
        Ok(amount(value, "totalAllocated"))
    }

    async fn max_deposit(&self, vault: &str, receiver: &str) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .maxDeposit(address(receiver)?)
            .call()
            .await
            .map_err(call_error)?;
        Ok(limit(value))
    }

    async fn max_withdraw(&self, vault: &str, owner: &str) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .maxWithdraw(address(owner)?)
            .call()
            .await
            .map_err(call_error)?;
        Ok(limit(value))
    }

    async fn fee_rates(&self, vault: &str) -> LedgerResult<FeeRates> {
        let contract = self.vault(vault)?;
        let performance = contract.performanceFee();
        let management = contract.managementFee();
        let (performance, management) = tokio::try_join!(performance.call(), management.call())
            .map_err(call_error)?;
        Ok(FeeRates {
            performance_bps: bps(performance),
            management_bps: bps(management),
        })
    }

    async fn active_strategies(&self, vault: &str) -> LedgerResult<Vec<String>> {
        let strategies = self
            .vault(vault)?
            .getActiveStrategies()
            .call()
            .await
            .map_err(call_error)?;
        Ok(strategies.iter().map(|a| a.to_string()).collect())
    }

    async fn strategy_info(&self, vault: &str, strategy: &str) -> LedgerResult<StrategyInfo> {
        let info = self
            .vault(vault)?
            .strategies(address(strategy)?)
            .call()
            .await
            .map_err(call_error)?;
        Ok(StrategyInfo {
            name: info.name,
            allocated: amount(info.allocated, "strategy allocation"),
            active: info.active,
            performance_fee_bps: bps(info.performanceFee),
            last_harvest: u64::try_from(info.lastHarvest).unwrap_or(0),
        })
    }

    async fn convert_to_shares(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .convertToShares(U256::from(assets))
            .call()
            .await
            .map_err(call_error)?;
        Ok(amount(value, "convertToShares"))
    }

    async fn convert_to_assets(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .convertToAssets(U256::from(shares))
            .call()
            .await
            .map_err(call_error)?;
        Ok(amount(value, "convertToAssets"))
    }

    async fn preview_deposit(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .previewDeposit(U256::from(assets))
            .call()
            .await
            .map_err(call_error)?;
        Ok(amount(value, "previewDeposit"))
    }

    async fn preview_withdraw(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .previewWithdraw(U256::from(assets))
            .call()
            .await
            .map_err(call_error)?;
        Ok(amount(value, "previewWithdraw"))
    }

    async fn preview_redeem(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount> {
        let value = self
            .vault(vault)?
            .previewRedeem(U256::from(shares))
            .call()
            .await
            .map_err(call_error)?;
        Ok(amount(value, "previewRedeem"))
    }

    async fn approve(&self, token: &str, owner: &str, spender: &str, amount: RawAmount) -> LedgerResult<String> {
        let pending = self
            .token(token)?
            .approve(address(spender)?, U256::from(amount))
            .from(address(owner)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn deposit(&self, vault: &str, caller: &str, assets: RawAmount, receiver: &str) -> LedgerResult<String> {
        let pending = self
            .vault(vault)?
            .deposit(U256::from(assets), address(receiver)?)
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn withdraw(
        &self,
        vault: &str,
        caller: &str,
        assets: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String> {
        let pending = self
            .vault(vault)?
            .withdraw(U256::from(assets), address(receiver)?, address(owner)?)
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn redeem(
        &self,
        vault: &str,
        caller: &str,
        shares: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String> {
        let pending = self
            .vault(vault)?
            .redeem(U256::from(shares), address(receiver)?, address(owner)?)
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn harvest(&self, vault: &str, caller: &str, strategy: &str) -> LedgerResult<String> {
        let pending = self
            .vault(vault)?
            .harvest(address(strategy)?)
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn rebalance(
        &self,
        vault: &str,
        caller: &str,
        allocations: &[(String, RawAmount)],
    ) -> LedgerResult<String> {
        let strategies = allocations
            .iter()
            .map(|(strategy, _)| address(strategy))
            .collect::<LedgerResult<Vec<_>>>()?;
        let amounts = allocations.iter().map(|(_, raw)| U256::from(*raw)).collect::<Vec<_>>();

        let pending = self
            .vault(vault)?
            .rebalance(strategies, amounts)
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    async fn set_fees(&self, vault: &str, caller: &str, fees: FeeRates) -> LedgerResult<String> {
        let pending = self
            .vault(vault)?
            .setFees(U256::from(fees.performance_bps), U256::from(fees.management_bps))
            .from(address(caller)?)
            .send()
            .await
            .map_err(send_error)?;
        Ok(pending.tx_hash().to_string())
    }

    /// Polls for the receipt until it appears. Callers bound the wait.
    async fn wait_for_confirmation(&self, tx_hash: &str) -> LedgerResult<TxReceipt> {
        let hash = tx_hash
            .parse::<B256>()
            .map_err(|_| LedgerError::UnknownTransaction(tx_hash.to_string()))?;
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            interval.tick().await;
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let status = if receipt.status() {
                        TxStatus::Success
                    } else {
                        TxStatus::Reverted
                    };
                    debug!("🧾 Receipt for {}: {:?}", tx_hash, status);
                    return Ok(TxReceipt {
                        tx_hash: tx_hash.to_string(),
                        status,
                        block_number: receipt.block_number(),
                    });
                }
                Ok(None) => debug!("⏳ {} not mined yet", tx_hash),
                Err(e) => warn!("⚠️ Receipt poll for {} failed: {}", tx_hash, e),
            }
        }
    }

    async fn get_status(&self) -> DataSourceStatus {
        match self.provider.get_block_number().await {
            Ok(_) => DataSourceStatus::Connected,
            Err(e) => DataSourceStatus::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_must_be_addresses() {
        assert!(address("0x1234567890123456789012345678901234567890").is_ok());
        assert_eq!(
            address("vault"),
            Err(LedgerError::InvalidHandle("vault".to_string()))
        );
    }

    #[test]
    fn oversized_values_saturate() {
        assert_eq!(limit(U256::MAX), u128::MAX);
        assert_eq!(limit(U256::from(42u64)), 42);
        assert_eq!(amount(U256::from(u128::MAX) + U256::from(1u8), "totalAssets"), u128::MAX);
        assert_eq!(amount(U256::from(7u64), "totalAssets"), 7);
        assert_eq!(bps(U256::from(1000u64)), 1000);
    }
}
