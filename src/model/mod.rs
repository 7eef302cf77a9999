pub mod units;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use units::{RawAmount, TokenAmount};

pub const UNKNOWN_STRATEGY_NAME: &str = "Unknown Strategy";

/// Ledger addresses that identify one vault deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHandles {
    pub vault: String,
    pub asset: String,
}

/// Decimal precision of the two tokens involved, each read from its own `decimals()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub asset: u8,
    pub share: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub total_assets: TokenAmount,
    pub total_allocated: TokenAmount,
    pub total_supply: TokenAmount,
    pub share_price: TokenAmount,
    pub active_strategy_count: u32,
    pub performance_fee_rate: Decimal,
    pub management_fee_rate: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl VaultSnapshot {
    pub fn idle_assets(&self) -> TokenAmount {
        TokenAmount::new(
            self.total_assets.raw.saturating_sub(self.total_allocated.raw),
            self.total_assets.decimals,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPosition {
    pub share_balance: TokenAmount,
    pub share_value: TokenAmount,
    pub asset_balance: TokenAmount,
    pub asset_allowance: TokenAmount,
    pub max_depositable: TokenAmount,
    pub max_withdrawable: TokenAmount,
}

impl AccountPosition {
    /// Position reported when no account is connected.
    pub fn empty(precision: Precision) -> Self {
        Self {
            share_balance: TokenAmount::zero(precision.share),
            share_value: TokenAmount::zero(precision.asset),
            asset_balance: TokenAmount::zero(precision.asset),
            asset_allowance: TokenAmount::zero(precision.asset),
            max_depositable: TokenAmount::zero(precision.asset),
            max_withdrawable: TokenAmount::zero(precision.asset),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub identifier: String,
    pub display_name: String,
    pub allocated_amount: TokenAmount,
    pub is_active: bool,
    pub performance_fee: Decimal,
    pub last_harvest: Option<DateTime<Utc>>,
}

impl StrategyRecord {
    /// Placeholder for a strategy whose metadata lookup failed.
    pub fn unknown(identifier: &str, asset_decimals: u8) -> Self {
        Self {
            identifier: identifier.to_string(),
            display_name: UNKNOWN_STRATEGY_NAME.to_string(),
            allocated_amount: TokenAmount::zero(asset_decimals),
            is_active: false,
            performance_fee: Decimal::ZERO,
            last_harvest: None,
        }
    }
}

/// The triple a fetch produces; always stored and replaced as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub vault: VaultSnapshot,
    pub position: AccountPosition,
    pub strategies: Vec<StrategyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Deposit,
    Withdraw,
    Redeem,
    Harvest,
    Rebalance,
    SetFees,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::Redeem => "redeem",
            OperationKind::Harvest => "harvest",
            OperationKind::Rebalance => "rebalance",
            OperationKind::SetFees => "set-fees",
        };
        f.write_str(name)
    }
}

/// Target allocation for one strategy, in asset units as typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub strategy: String,
    pub amount: String,
}

impl AllocationTarget {
    pub fn new(strategy: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            amount: amount.into(),
        }
    }
}

/// Inputs of the administrative operations that do not fit in a single amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminParams {
    Rebalance(Vec<AllocationTarget>),
    /// Percentages with at most two decimals.
    Fees { performance: String, management: String },
}

/// One user-submitted operation. For harvest, `amount` carries the strategy
/// handle; rebalance and fee updates leave it empty and use `admin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub id: Uuid,
    pub kind: OperationKind,
    pub amount: String,
    pub account: String,
    pub admin: Option<AdminParams>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind, amount: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            amount: amount.into(),
            account: account.into(),
            admin: None,
        }
    }

    pub fn deposit(assets: impl Into<String>, account: impl Into<String>) -> Self {
        Self::new(OperationKind::Deposit, assets, account)
    }

    pub fn withdraw(assets: impl Into<String>, account: impl Into<String>) -> Self {
        Self::new(OperationKind::Withdraw, assets, account)
    }

    pub fn redeem(shares: impl Into<String>, account: impl Into<String>) -> Self {
        Self::new(OperationKind::Redeem, shares, account)
    }

    pub fn harvest(strategy: impl Into<String>, account: impl Into<String>) -> Self {
        Self::new(OperationKind::Harvest, strategy, account)
    }

    pub fn rebalance(allocations: Vec<AllocationTarget>, account: impl Into<String>) -> Self {
        Self {
            admin: Some(AdminParams::Rebalance(allocations)),
            ..Self::new(OperationKind::Rebalance, "", account)
        }
    }

    pub fn set_fees(
        performance: impl Into<String>,
        management: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        Self {
            admin: Some(AdminParams::Fees {
                performance: performance.into(),
                management: management.into(),
            }),
            ..Self::new(OperationKind::SetFees, "", account)
        }
    }
}

/// Steps of a composite operation, in the order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationPhase {
    Validating,
    CheckingAllowance,
    Approving,
    Submitting,
    Confirming,
    Refreshing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub status: TxStatus,
    pub block_number: Option<u64>,
}

/// Basis-point fee rates as the vault reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRates {
    pub performance_bps: u32,
    pub management_bps: u32,
}

/// Raw per-strategy metadata as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyInfo {
    pub name: String,
    pub allocated: RawAmount,
    pub active: bool,
    pub performance_fee_bps: u32,
    pub last_harvest: u64,
}
