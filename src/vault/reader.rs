use chrono::{TimeZone, Utc};
use futures_util::future::join_all;
use log::{debug, warn};
use std::sync::Arc;

use super::error::VaultError;
use crate::api::{Ledger, LedgerResult};
use crate::model::units::{bps_to_percent, one_unit};
use crate::model::*;

/// Read-only view over the ledger that assembles full snapshots.
#[derive(Clone)]
pub struct ChainReader {
    ledger: Arc<dyn Ledger>,
}

impl ChainReader {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    pub async fn precision(&self, handles: &VaultHandles) -> Result<Precision, VaultError> {
        let (asset, share) = tokio::try_join!(
            self.ledger.decimals(&handles.asset),
            self.ledger.decimals(&handles.vault),
        )
        .map_err(VaultError::read)?;
        Ok(Precision { asset, share })
    }

    pub async fn fetch_snapshot(
        &self,
        handles: &VaultHandles,
        account: Option<&str>,
    ) -> Result<Snapshot, VaultError> {
        let precision = self.precision(handles).await?;
        debug!(
            "📡 Fetching snapshot for vault {} (asset decimals {}, share decimals {})",
            handles.vault, precision.asset, precision.share
        );

        let (mut vault, position, strategies) = tokio::try_join!(
            self.fetch_vault(handles, precision),
            self.fetch_position(handles, precision, account),
            self.fetch_strategies(handles, precision),
        )
        .map_err(VaultError::read)?;
        vault.active_strategy_count = u32::try_from(strategies.len()).unwrap_or(u32::MAX);

        Ok(Snapshot {
            vault,
            position,
            strategies,
        })
    }

    async fn fetch_vault(&self, handles: &VaultHandles, precision: Precision) -> LedgerResult<VaultSnapshot> {
        let vault = handles.vault.as_str();
        let one_share = one_unit(precision.share).unwrap_or(1);

        let (total_assets, total_allocated, total_supply, share_price, fees) = tokio::try_join!(
            self.ledger.total_assets(vault),
            self.ledger.total_allocated(vault),
            self.ledger.total_supply(vault),
            self.ledger.convert_to_assets(vault, one_share),
            self.ledger.fee_rates(vault),
        )?;

        Ok(VaultSnapshot {
            total_assets: TokenAmount::new(total_assets, precision.asset),
            total_allocated: TokenAmount::new(total_allocated, precision.asset),
            total_supply: TokenAmount::new(total_supply, precision.share),
            share_price: TokenAmount::new(share_price, precision.asset),
            active_strategy_count: 0,
            performance_fee_rate: bps_to_percent(fees.performance_bps),
            management_fee_rate: bps_to_percent(fees.management_bps),
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_position(
        &self,
        handles: &VaultHandles,
        precision: Precision,
        account: Option<&str>,
    ) -> LedgerResult<AccountPosition> {
        let Some(account) = account else {
            return Ok(AccountPosition::empty(precision));
        };
        let vault = handles.vault.as_str();
        let asset = handles.asset.as_str();

        let (shares, assets, allowance, max_deposit, max_withdraw) = tokio::try_join!(
            self.ledger.balance_of(vault, account),
            self.ledger.balance_of(asset, account),
            self.ledger.allowance(asset, account, vault),
            self.ledger.max_deposit(vault, account),
            self.ledger.max_withdraw(vault, account),
        )?;
        let share_value = self.ledger.convert_to_assets(vault, shares).await?;

        Ok(AccountPosition {
            share_balance: TokenAmount::new(shares, precision.share),
            share_value: TokenAmount::new(share_value, precision.asset),
            asset_balance: TokenAmount::new(assets, precision.asset),
            asset_allowance: TokenAmount::new(allowance, precision.asset),
            max_depositable: TokenAmount::new(max_deposit, precision.asset),
            max_withdrawable: TokenAmount::new(max_withdraw, precision.asset),
        })
    }

    async fn fetch_strategies(
        &self,
        handles: &VaultHandles,
        precision: Precision,
    ) -> LedgerResult<Vec<StrategyRecord>> {
        let identifiers = self.ledger.active_strategies(&handles.vault).await?;
        let lookups = identifiers.iter().map(|id| self.fetch_strategy(handles, id, precision.asset));
        Ok(join_all(lookups).await)
    }

    async fn fetch_strategy(&self, handles: &VaultHandles, identifier: &str, asset_decimals: u8) -> StrategyRecord {
        match self.ledger.strategy_info(&handles.vault, identifier).await {
            Ok(info) => StrategyRecord {
                identifier: identifier.to_string(),
                display_name: info.name,
                allocated_amount: TokenAmount::new(info.allocated, asset_decimals),
                is_active: info.active,
                performance_fee: bps_to_percent(info.performance_fee_bps),
                last_harvest: harvest_time(info.last_harvest),
            },
            Err(e) => {
                warn!("⚠️ Strategy {} metadata unavailable: {}", identifier, e);
                StrategyRecord::unknown(identifier, asset_decimals)
            }
        }
    }
}

fn harvest_time(seconds: u64) -> Option<chrono::DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    i64::try_from(seconds)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::demo::{DemoLedger, DEMO_ACCOUNT};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const STRATEGY_A: &str = "0x1111111111111111111111111111111111111111";
    const STRATEGY_B: &str = "0x2222222222222222222222222222222222222222";
    const STRATEGY_C: &str = "0x3333333333333333333333333333333333333333";

    fn three_strategy_ledger() -> DemoLedger {
        DemoLedger::new(6, 18)
            .with_fees(1000, 200)
            .with_seed_deposit("0x000000000000000000000000000000000000dead", 3_000_000_000)
            .with_strategy(STRATEGY_A, "Compound Strategy", 1_000_000_000, 200)
            .with_strategy(STRATEGY_B, "Uniswap V3 Strategy", 500_000_000, 300)
            .with_strategy(STRATEGY_C, "Aave Strategy", 250_000_000, 150)
            .with_asset_balance(DEMO_ACCOUNT, 42_000_000)
    }

    #[tokio::test]
    async fn snapshot_uses_each_tokens_own_precision() {
        let ledger = Arc::new(three_strategy_ledger());
        let reader = ChainReader::new(ledger.clone());

        let snapshot = reader
            .fetch_snapshot(&ledger.handles(), Some(DEMO_ACCOUNT))
            .await
            .unwrap();

        assert_eq!(snapshot.vault.total_assets.decimals, 6);
        assert_eq!(snapshot.vault.total_assets.to_string(), "3000");
        assert_eq!(snapshot.vault.total_allocated.to_string(), "1750");
        assert_eq!(snapshot.vault.total_supply.decimals, 18);
        assert_eq!(snapshot.vault.share_price.to_string(), "1");
        assert_eq!(snapshot.vault.performance_fee_rate, dec!(10.00));
        assert_eq!(snapshot.vault.management_fee_rate, dec!(2.00));
        assert_eq!(snapshot.vault.active_strategy_count, 3);
        assert_eq!(snapshot.position.asset_balance.to_string(), "42");
        assert_eq!(snapshot.position.share_balance.decimals, 18);
    }

    #[tokio::test]
    async fn missing_account_yields_an_empty_position() {
        let ledger = Arc::new(three_strategy_ledger());
        let reader = ChainReader::new(ledger.clone());

        let snapshot = reader.fetch_snapshot(&ledger.handles(), None).await.unwrap();

        assert_eq!(snapshot.position, AccountPosition::empty(Precision { asset: 6, share: 18 }));
        assert_eq!(snapshot.strategies.len(), 3);
    }

    #[tokio::test]
    async fn one_failed_strategy_lookup_degrades_only_that_record() {
        let ledger = Arc::new(three_strategy_ledger());
        ledger.fail_strategy_lookup(STRATEGY_B).await;
        let reader = ChainReader::new(ledger.clone());

        let snapshot = reader.fetch_snapshot(&ledger.handles(), None).await.unwrap();
        let strategies = snapshot.strategies;

        assert_eq!(strategies.len(), 3);
        assert_eq!(strategies[0].display_name, "Compound Strategy");
        assert_eq!(strategies[0].allocated_amount.to_string(), "1000");
        assert!(strategies[0].is_active);

        assert_eq!(strategies[1].identifier, STRATEGY_B);
        assert_eq!(strategies[1].display_name, UNKNOWN_STRATEGY_NAME);
        assert!(strategies[1].allocated_amount.is_zero());
        assert!(!strategies[1].is_active);

        assert_eq!(strategies[2].display_name, "Aave Strategy");
        assert_eq!(strategies[2].performance_fee, dec!(1.50));
        assert!(strategies[2].is_active);
    }

    #[tokio::test]
    async fn unreachable_ledger_is_a_read_error() {
        let ledger = Arc::new(three_strategy_ledger());
        ledger.set_reads_unreachable(true).await;
        let reader = ChainReader::new(ledger.clone());

        let result = reader.fetch_snapshot(&ledger.handles(), Some(DEMO_ACCOUNT)).await;
        assert!(matches!(result, Err(VaultError::Read(_))));
    }

    #[tokio::test]
    async fn unbounded_max_deposit_is_carried_through() {
        let ledger = Arc::new(DemoLedger::seeded(6, 18, 0, Duration::ZERO));
        let reader = ChainReader::new(ledger.clone());

        let snapshot = reader
            .fetch_snapshot(&ledger.handles(), Some(DEMO_ACCOUNT))
            .await
            .unwrap();
        assert_eq!(snapshot.position.max_depositable.raw, u128::MAX);
    }

    #[test]
    fn zero_harvest_time_means_never() {
        assert_eq!(harvest_time(0), None);
        assert_eq!(harvest_time(1_700_000_000).map(|t| t.timestamp()), Some(1_700_000_000));
    }
}
