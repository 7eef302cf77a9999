use log::warn;
use std::sync::Arc;

use super::error::VaultError;
use crate::api::{Ledger, LedgerResult};
use crate::model::units::parse_units;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Query {
    ToShares,
    ToAssets,
    PreviewDeposit,
    PreviewWithdraw,
    PreviewRedeem,
}

impl Query {
    fn takes_shares(self) -> bool {
        matches!(self, Query::ToAssets | Query::PreviewRedeem)
    }
}

/// Asset/share conversions delegated to the vault's own entry points.
///
/// The string methods back live previews: they accept whatever the user has
/// typed so far and answer zero for anything that is not a positive amount,
/// or when the ledger cannot be reached.
#[derive(Clone)]
pub struct UnitConverter {
    ledger: Arc<dyn Ledger>,
    vault: String,
    precision: Precision,
}

impl UnitConverter {
    pub fn new(ledger: Arc<dyn Ledger>, vault: impl Into<String>, precision: Precision) -> Self {
        Self {
            ledger,
            vault: vault.into(),
            precision,
        }
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub async fn to_shares(&self, assets: &str) -> TokenAmount {
        self.preview(Query::ToShares, assets).await
    }

    pub async fn to_assets(&self, shares: &str) -> TokenAmount {
        self.preview(Query::ToAssets, shares).await
    }

    pub async fn preview_deposit(&self, assets: &str) -> TokenAmount {
        self.preview(Query::PreviewDeposit, assets).await
    }

    pub async fn preview_withdraw(&self, assets: &str) -> TokenAmount {
        self.preview(Query::PreviewWithdraw, assets).await
    }

    pub async fn preview_redeem(&self, shares: &str) -> TokenAmount {
        self.preview(Query::PreviewRedeem, shares).await
    }

    pub async fn to_shares_raw(&self, assets: RawAmount) -> Result<TokenAmount, VaultError> {
        self.query(Query::ToShares, assets)
            .await
            .map(|raw| TokenAmount::new(raw, self.precision.share))
            .map_err(VaultError::read)
    }

    pub async fn to_assets_raw(&self, shares: RawAmount) -> Result<TokenAmount, VaultError> {
        self.query(Query::ToAssets, shares)
            .await
            .map(|raw| TokenAmount::new(raw, self.precision.asset))
            .map_err(VaultError::read)
    }

    async fn preview(&self, query: Query, input: &str) -> TokenAmount {
        let (input_decimals, output_decimals) = if query.takes_shares() {
            (self.precision.share, self.precision.asset)
        } else {
            (self.precision.asset, self.precision.share)
        };

        let raw = match parse_units(input, input_decimals) {
            Ok(raw) if raw > 0 => raw,
            _ => return TokenAmount::zero(output_decimals),
        };
        match self.query(query, raw).await {
            Ok(out) => TokenAmount::new(out, output_decimals),
            Err(e) => {
                warn!("⚠️ {:?} preview for {:?} failed: {}", query, input, e);
                TokenAmount::zero(output_decimals)
            }
        }
    }

    async fn query(&self, query: Query, raw: RawAmount) -> LedgerResult<RawAmount> {
        let vault = self.vault.as_str();
        match query {
            Query::ToShares => self.ledger.convert_to_shares(vault, raw).await,
            Query::ToAssets => self.ledger.convert_to_assets(vault, raw).await,
            Query::PreviewDeposit => self.ledger.preview_deposit(vault, raw).await,
            Query::PreviewWithdraw => self.ledger.preview_withdraw(vault, raw).await,
            Query::PreviewRedeem => self.ledger.preview_redeem(vault, raw).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::demo::{DemoLedger, DEMO_ACCOUNT, DEMO_VAULT};

    const HOLDER: &str = "0x000000000000000000000000000000000000dead";
    const STRATEGY: &str = "0x1111111111111111111111111111111111111111";

    /// A vault that has harvested once, so one share is worth a little more than at inception.
    async fn grown_vault() -> Arc<DemoLedger> {
        let ledger = DemoLedger::new(6, 18)
            .with_seed_deposit(HOLDER, 1_000_000_000)
            .with_strategy(STRATEGY, "Compound Strategy", 500_000_000, 0);
        let tx = ledger.harvest(DEMO_VAULT, DEMO_ACCOUNT, STRATEGY).await.unwrap();
        ledger.wait_for_confirmation(&tx).await.unwrap();
        Arc::new(ledger)
    }

    fn converter(ledger: &Arc<DemoLedger>) -> UnitConverter {
        UnitConverter::new(ledger.clone(), ledger.handles().vault, Precision { asset: 6, share: 18 })
    }

    #[tokio::test]
    async fn round_trip_stays_within_one_smallest_unit() {
        let ledger = grown_vault().await;
        let converter = converter(&ledger);

        for input in ["1", "0.000001", "123.456789", "999999.5", "0.3"] {
            let shares = converter.to_shares(input).await;
            let back = converter.to_assets(&shares.to_string()).await;
            let original = parse_units(input, 6).unwrap();
            assert!(back.raw <= original);
            assert!(
                original - back.raw <= 1,
                "{} -> {} shares -> {} assets",
                input,
                shares,
                back
            );
        }
    }

    #[tokio::test]
    async fn previews_follow_the_ledger_rounding() {
        let ledger = grown_vault().await;
        let converter = converter(&ledger);

        let deposit = converter.preview_deposit("10").await;
        let withdraw = converter.preview_withdraw("10").await;
        assert_eq!(deposit.decimals, 18);
        assert!(withdraw.raw >= deposit.raw);
        assert_eq!(deposit, converter.to_shares("10").await);
    }

    #[tokio::test]
    async fn partial_or_invalid_input_previews_as_zero() {
        let ledger = grown_vault().await;
        let converter = converter(&ledger);

        for input in ["", "abc", "1.2.3", "-5", "0", "0.0000001"] {
            assert!(converter.to_shares(input).await.is_zero(), "input {:?}", input);
            assert!(converter.preview_deposit(input).await.is_zero(), "input {:?}", input);
        }
        assert_eq!(converter.to_assets("").await, TokenAmount::zero(6));
    }

    #[tokio::test]
    async fn ledger_failures_preview_as_zero_but_raw_calls_propagate() {
        let ledger = grown_vault().await;
        ledger.set_reads_unreachable(true).await;
        let converter = converter(&ledger);

        assert!(converter.preview_redeem("1").await.is_zero());
        assert!(matches!(converter.to_assets_raw(1).await, Err(VaultError::Read(_))));
    }

    #[tokio::test]
    async fn redeem_preview_is_denominated_in_assets() {
        let ledger = grown_vault().await;
        let converter = converter(&ledger);

        let assets = converter.preview_redeem("1").await;
        assert_eq!(assets.decimals, 6);
        assert!(assets.raw > 1_000_000);
    }
}
