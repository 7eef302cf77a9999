//! In-memory ERC-4626 vault used by demo mode and the test suite.
//!
//! Conversions follow the virtual-share scheme: the share token carries
//! `share_decimals - asset_decimals` extra decimals and every ratio adds one
//! virtual asset and `10^offset` virtual shares, so the first depositor is not
//! exposed to donation rounding. Faults can be injected to exercise the
//! client's degraded paths, and every value-moving call is recorded.

use async_trait::async_trait;
use log::{debug, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

use super::provider::{DataSourceStatus, Ledger, LedgerError, LedgerResult};
use crate::model::*;

pub const DEMO_VAULT: &str = "0x1234567890123456789012345678901234567890";
pub const DEMO_ASSET: &str = "0xa0b86a33e6441b8435b662303c0f098c8c8c0f8c";
pub const DEMO_ACCOUNT: &str = "0xdfc24b077bc1425ad1dea75bcb6f8158e10df303";

const HARVEST_YIELD_BPS: u128 = 10;
const BPS_DENOMINATOR: u128 = 10_000;
const MAX_PERFORMANCE_FEE_BPS: u32 = 5_000;
const MAX_MANAGEMENT_FEE_BPS: u32 = 1_000;

/// A call that reached the ledger, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Allowance { owner: String, spender: String },
    Approve { spender: String, amount: RawAmount },
    Deposit { assets: RawAmount, receiver: String },
    Withdraw { assets: RawAmount, receiver: String, owner: String },
    Redeem { shares: RawAmount, receiver: String, owner: String },
    Harvest { strategy: String },
    Rebalance { allocations: Vec<(String, RawAmount)> },
    SetFees { fees: FeeRates },
    Confirm { tx_hash: String },
}

impl LedgerCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, LedgerCall::Allowance { .. } | LedgerCall::Confirm { .. })
    }
}

#[derive(Debug, Default)]
struct Faults {
    reads_unreachable: bool,
    failing_strategies: HashSet<String>,
    stall_confirmations: bool,
    revert_next: bool,
    reject_approvals: bool,
}

#[derive(Debug, Clone)]
struct DemoStrategy {
    address: String,
    name: String,
    allocated: RawAmount,
    active: bool,
    performance_fee_bps: u32,
    last_harvest: u64,
}

#[derive(Debug)]
struct Book {
    asset_decimals: u8,
    share_decimals: u8,
    asset_balances: HashMap<String, RawAmount>,
    allowances: HashMap<(String, String), RawAmount>,
    share_balances: HashMap<String, RawAmount>,
    total_supply: RawAmount,
    idle: RawAmount,
    strategies: Vec<DemoStrategy>,
    fees: FeeRates,
    deposit_cap: Option<RawAmount>,
    keeper: String,
    receipts: HashMap<String, TxReceipt>,
    block_number: u64,
}

fn key(address: &str) -> String {
    address.to_ascii_lowercase()
}

fn mul_div(x: RawAmount, y: RawAmount, denominator: RawAmount, round_up: bool) -> LedgerResult<RawAmount> {
    if denominator == 0 {
        return Err(LedgerError::CallReverted("division by zero".to_string()));
    }
    let product = x
        .checked_mul(y)
        .ok_or_else(|| LedgerError::CallReverted("arithmetic overflow".to_string()))?;
    let quotient = product / denominator;
    if round_up && product % denominator != 0 {
        Ok(quotient + 1)
    } else {
        Ok(quotient)
    }
}

fn random_tx_hash() -> String {
    let mut rng = rand::thread_rng();
    format!("0x{:032x}{:032x}", rng.gen::<u128>(), rng.gen::<u128>())
}

impl Book {
    fn total_allocated(&self) -> RawAmount {
        self.strategies.iter().map(|s| s.allocated).sum()
    }

    fn total_assets(&self) -> RawAmount {
        self.idle + self.total_allocated()
    }

    fn virtual_shares(&self) -> LedgerResult<RawAmount> {
        let offset = self.share_decimals.saturating_sub(self.asset_decimals);
        one_unit_or_revert(offset)
    }

    fn to_shares(&self, assets: RawAmount, round_up: bool) -> LedgerResult<RawAmount> {
        let supply = self.total_supply + self.virtual_shares()?;
        mul_div(assets, supply, self.total_assets() + 1, round_up)
    }

    fn to_assets(&self, shares: RawAmount, round_up: bool) -> LedgerResult<RawAmount> {
        let supply = self.total_supply + self.virtual_shares()?;
        mul_div(shares, self.total_assets() + 1, supply, round_up)
    }

    fn asset_balance(&self, account: &str) -> RawAmount {
        self.asset_balances.get(&key(account)).copied().unwrap_or(0)
    }

    fn share_balance(&self, account: &str) -> RawAmount {
        self.share_balances.get(&key(account)).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: &str, spender: &str) -> RawAmount {
        self.allowances
            .get(&(key(owner), key(spender)))
            .copied()
            .unwrap_or(0)
    }

    fn max_deposit(&self) -> RawAmount {
        match self.deposit_cap {
            Some(cap) => cap.saturating_sub(self.total_assets()),
            None => RawAmount::MAX,
        }
    }

    fn max_withdraw(&self, owner: &str) -> LedgerResult<RawAmount> {
        let owned = self.to_assets(self.share_balance(owner), false)?;
        Ok(owned.min(self.idle))
    }

    fn mint_shares(&mut self, receiver: &str, shares: RawAmount) {
        *self.share_balances.entry(key(receiver)).or_insert(0) += shares;
        self.total_supply += shares;
    }

    fn burn_shares(&mut self, owner: &str, shares: RawAmount) -> LedgerResult<()> {
        let balance = self.share_balance(owner);
        if balance < shares {
            return Err(LedgerError::Rejected(
                "ERC4626: burn amount exceeds balance".to_string(),
            ));
        }
        self.share_balances.insert(key(owner), balance - shares);
        self.total_supply -= shares;
        Ok(())
    }

    fn pay_out(&mut self, receiver: &str, assets: RawAmount) -> LedgerResult<()> {
        if self.idle < assets {
            return Err(LedgerError::Rejected(
                "insufficient idle liquidity in vault".to_string(),
            ));
        }
        self.idle -= assets;
        *self.asset_balances.entry(key(receiver)).or_insert(0) += assets;
        Ok(())
    }

    fn deposit(&mut self, vault: &str, caller: &str, assets: RawAmount, receiver: &str) -> LedgerResult<()> {
        if assets > self.max_deposit() {
            return Err(LedgerError::Rejected("ERC4626: deposit more than max".to_string()));
        }
        let shares = self.to_shares(assets, false)?;

        let allowance = self.allowance(caller, vault);
        if allowance < assets {
            return Err(LedgerError::Rejected("ERC20: insufficient allowance".to_string()));
        }
        let balance = self.asset_balance(caller);
        if balance < assets {
            return Err(LedgerError::Rejected(
                "ERC20: transfer amount exceeds balance".to_string(),
            ));
        }

        if allowance != RawAmount::MAX {
            self.allowances.insert((key(caller), key(vault)), allowance - assets);
        }
        self.asset_balances.insert(key(caller), balance - assets);
        self.idle += assets;
        self.mint_shares(receiver, shares);
        Ok(())
    }

    fn withdraw(&mut self, caller: &str, assets: RawAmount, receiver: &str, owner: &str) -> LedgerResult<()> {
        if key(caller) != key(owner) {
            return Err(LedgerError::Rejected("caller is not the share owner".to_string()));
        }
        if assets > self.max_withdraw(owner)? {
            return Err(LedgerError::Rejected("ERC4626: withdraw more than max".to_string()));
        }
        let shares = self.to_shares(assets, true)?;
        self.burn_shares(owner, shares)?;
        self.pay_out(receiver, assets)
    }

    fn redeem(&mut self, caller: &str, shares: RawAmount, receiver: &str, owner: &str) -> LedgerResult<()> {
        if key(caller) != key(owner) {
            return Err(LedgerError::Rejected("caller is not the share owner".to_string()));
        }
        if shares > self.share_balance(owner) {
            return Err(LedgerError::Rejected("ERC4626: redeem more than max".to_string()));
        }
        let assets = self.to_assets(shares, false)?;
        if assets > self.idle {
            return Err(LedgerError::Rejected(
                "insufficient idle liquidity in vault".to_string(),
            ));
        }
        self.burn_shares(owner, shares)?;
        self.pay_out(receiver, assets)
    }

    fn harvest(&mut self, caller: &str, strategy: &str) -> LedgerResult<()> {
        self.ensure_keeper(caller)?;
        let record = self
            .strategies
            .iter_mut()
            .find(|s| s.address == key(strategy) && s.active)
            .ok_or_else(|| LedgerError::Rejected(format!("strategy {} is not active", strategy)))?;

        let gain = mul_div(record.allocated, HARVEST_YIELD_BPS, BPS_DENOMINATOR, false)?;
        let fee = mul_div(gain, u128::from(record.performance_fee_bps), BPS_DENOMINATOR, false)?;
        record.allocated += gain - fee;
        record.last_harvest = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        Ok(())
    }

    fn ensure_keeper(&self, caller: &str) -> LedgerResult<()> {
        if key(caller) != key(&self.keeper) {
            return Err(LedgerError::Rejected("caller is not the keeper".to_string()));
        }
        Ok(())
    }

    fn rebalance(&mut self, caller: &str, allocations: &[(String, RawAmount)]) -> LedgerResult<()> {
        self.ensure_keeper(caller)?;

        let mut targets = self.strategies.clone();
        for (strategy, amount) in allocations {
            let record = targets
                .iter_mut()
                .find(|s| s.address == key(strategy) && s.active)
                .ok_or_else(|| LedgerError::Rejected(format!("strategy {} is not active", strategy)))?;
            record.allocated = *amount;
        }

        let total = self.total_assets();
        let allocated = targets
            .iter()
            .try_fold(0u128, |sum, s| sum.checked_add(s.allocated))
            .filter(|sum| *sum <= total)
            .ok_or_else(|| LedgerError::Rejected("allocations exceed total assets".to_string()))?;

        self.idle = total - allocated;
        self.strategies = targets;
        Ok(())
    }

    fn set_fees(&mut self, caller: &str, fees: FeeRates) -> LedgerResult<()> {
        self.ensure_keeper(caller)?;
        if fees.performance_bps > MAX_PERFORMANCE_FEE_BPS || fees.management_bps > MAX_MANAGEMENT_FEE_BPS {
            return Err(LedgerError::Rejected("fee above the vault maximum".to_string()));
        }
        self.fees = fees;
        Ok(())
    }
}

fn one_unit_or_revert(decimals: u8) -> LedgerResult<RawAmount> {
    units::one_unit(decimals)
        .ok_or_else(|| LedgerError::CallReverted("decimal offset too large".to_string()))
}

pub struct DemoLedger {
    vault: String,
    asset: String,
    book: Mutex<Book>,
    faults: Mutex<Faults>,
    calls: Mutex<Vec<LedgerCall>>,
    confirmation_latency: Duration,
}

impl DemoLedger {
    pub fn new(asset_decimals: u8, share_decimals: u8) -> Self {
        Self {
            vault: key(DEMO_VAULT),
            asset: key(DEMO_ASSET),
            book: Mutex::new(Book {
                asset_decimals,
                share_decimals,
                asset_balances: HashMap::new(),
                allowances: HashMap::new(),
                share_balances: HashMap::new(),
                total_supply: 0,
                idle: 0,
                strategies: Vec::new(),
                fees: FeeRates {
                    performance_bps: 0,
                    management_bps: 0,
                },
                deposit_cap: None,
                keeper: key(DEMO_ACCOUNT),
                receipts: HashMap::new(),
                block_number: 1,
            }),
            faults: Mutex::new(Faults::default()),
            calls: Mutex::new(Vec::new()),
            confirmation_latency: Duration::ZERO,
        }
    }

    /// The deployment shipped with demo mode: a 6-decimal stablecoin vault with
    /// two strategies and a funded demo account.
    pub fn seeded(
        asset_decimals: u8,
        share_decimals: u8,
        account_balance: RawAmount,
        confirmation_latency: Duration,
    ) -> Self {
        let whole = units::one_unit(asset_decimals).unwrap_or(1);
        Self::new(asset_decimals, share_decimals)
            .with_fees(1000, 200)
            .with_seed_deposit("0x000000000000000000000000000000000000dead", 2_456_789 * whole)
            .with_strategy(
                "0x1111111111111111111111111111111111111111",
                "Compound Strategy",
                1_200_000 * whole,
                200,
            )
            .with_strategy(
                "0x2222222222222222222222222222222222222222",
                "Uniswap V3 Strategy",
                800_000 * whole,
                300,
            )
            .with_asset_balance(DEMO_ACCOUNT, account_balance)
            .with_confirmation_latency(confirmation_latency)
    }

    pub fn handles(&self) -> VaultHandles {
        VaultHandles {
            vault: self.vault.clone(),
            asset: self.asset.clone(),
        }
    }

    pub fn with_fees(mut self, performance_bps: u32, management_bps: u32) -> Self {
        self.book.get_mut().fees = FeeRates {
            performance_bps,
            management_bps,
        };
        self
    }

    pub fn with_asset_balance(mut self, account: &str, amount: RawAmount) -> Self {
        self.book.get_mut().asset_balances.insert(key(account), amount);
        self
    }

    /// Mints shares to `holder` as if it had deposited `assets`.
    pub fn with_seed_deposit(mut self, holder: &str, assets: RawAmount) -> Self {
        let book = self.book.get_mut();
        match book.to_shares(assets, false) {
            Ok(shares) => {
                book.idle += assets;
                book.mint_shares(holder, shares);
            }
            Err(e) => warn!("⚠️ Demo seed deposit skipped: {}", e),
        }
        self
    }

    /// Registers a strategy funded from idle assets.
    pub fn with_strategy(mut self, address: &str, name: &str, allocated: RawAmount, performance_fee_bps: u32) -> Self {
        let book = self.book.get_mut();
        let allocated = allocated.min(book.idle);
        book.idle -= allocated;
        book.strategies.push(DemoStrategy {
            address: key(address),
            name: name.to_string(),
            allocated,
            active: true,
            performance_fee_bps,
            last_harvest: 0,
        });
        self
    }

    pub fn with_confirmation_latency(mut self, latency: Duration) -> Self {
        self.confirmation_latency = latency;
        self
    }

    pub async fn mint_assets(&self, account: &str, amount: RawAmount) {
        let mut book = self.book.lock().await;
        *book.asset_balances.entry(key(account)).or_insert(0) += amount;
    }

    pub async fn set_allowance(&self, owner: &str, spender: &str, amount: RawAmount) {
        let mut book = self.book.lock().await;
        book.allowances.insert((key(owner), key(spender)), amount);
    }

    pub async fn set_deposit_cap(&self, cap: Option<RawAmount>) {
        self.book.lock().await.deposit_cap = cap;
    }

    /// Returns the strategy's allocation to idle and drops it from the enumeration.
    pub async fn remove_strategy(&self, address: &str) {
        let mut book = self.book.lock().await;
        let (removed, kept): (Vec<_>, Vec<_>) = book
            .strategies
            .drain(..)
            .partition(|s| s.address == key(address));
        book.strategies = kept;
        book.idle += removed.iter().map(|s| s.allocated).sum::<RawAmount>();
    }

    pub async fn set_reads_unreachable(&self, unreachable: bool) {
        self.faults.lock().await.reads_unreachable = unreachable;
    }

    pub async fn fail_strategy_lookup(&self, address: &str) {
        self.faults.lock().await.failing_strategies.insert(key(address));
    }

    pub async fn stall_confirmations(&self, stall: bool) {
        self.faults.lock().await.stall_confirmations = stall;
    }

    /// The next accepted transaction is mined with a reverted status.
    pub async fn revert_next_transaction(&self) {
        self.faults.lock().await.revert_next = true;
    }

    pub async fn reject_approvals(&self, reject: bool) {
        self.faults.lock().await.reject_approvals = reject;
    }

    pub async fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().await.clone()
    }

    pub async fn writes(&self) -> Vec<LedgerCall> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.is_write())
            .cloned()
            .collect()
    }

    async fn record(&self, call: LedgerCall) {
        self.calls.lock().await.push(call);
    }

    async fn ensure_reachable(&self) -> LedgerResult<()> {
        if self.faults.lock().await.reads_unreachable {
            return Err(LedgerError::Unreachable("demo ledger is offline".to_string()));
        }
        Ok(())
    }

    async fn read<T>(&self, vault: &str, f: impl FnOnce(&Book) -> LedgerResult<T> + Send) -> LedgerResult<T> {
        self.ensure_reachable().await?;
        self.expect_vault(vault)?;
        let book = self.book.lock().await;
        f(&*book)
    }

    fn expect_vault(&self, vault: &str) -> LedgerResult<()> {
        if key(vault) != self.vault {
            return Err(LedgerError::InvalidHandle(vault.to_string()));
        }
        Ok(())
    }

    fn expect_token(&self, token: &str) -> LedgerResult<()> {
        let token = key(token);
        if token != self.vault && token != self.asset {
            return Err(LedgerError::InvalidHandle(token));
        }
        Ok(())
    }

    async fn submit(
        &self,
        call: LedgerCall,
        apply: impl FnOnce(&mut Book) -> LedgerResult<()> + Send,
    ) -> LedgerResult<String> {
        let is_approval = matches!(call, LedgerCall::Approve { .. });
        self.record(call).await;

        let revert = {
            let mut faults = self.faults.lock().await;
            if is_approval && faults.reject_approvals {
                return Err(LedgerError::Rejected("user rejected the approval".to_string()));
            }
            std::mem::take(&mut faults.revert_next)
        };

        let mut book = self.book.lock().await;
        let status = if revert {
            TxStatus::Reverted
        } else {
            apply(&mut *book)?;
            TxStatus::Success
        };

        let tx_hash = random_tx_hash();
        book.block_number += 1;
        let receipt = TxReceipt {
            tx_hash: tx_hash.clone(),
            status,
            block_number: Some(book.block_number),
        };
        book.receipts.insert(tx_hash.clone(), receipt);
        debug!("⛓️ Demo ledger accepted {} in block {}", tx_hash, book.block_number);
        Ok(tx_hash)
    }
}

#[async_trait]
impl Ledger for DemoLedger {
    async fn decimals(&self, token: &str) -> LedgerResult<u8> {
        self.ensure_reachable().await?;
        self.expect_token(token)?;
        let book = self.book.lock().await;
        if key(token) == self.vault {
            Ok(book.share_decimals)
        } else {
            Ok(book.asset_decimals)
        }
    }

    async fn balance_of(&self, token: &str, account: &str) -> LedgerResult<RawAmount> {
        self.ensure_reachable().await?;
        self.expect_token(token)?;
        let book = self.book.lock().await;
        if key(token) == self.vault {
            Ok(book.share_balance(account))
        } else {
            Ok(book.asset_balance(account))
        }
    }

    async fn allowance(&self, token: &str, owner: &str, spender: &str) -> LedgerResult<RawAmount> {
        self.record(LedgerCall::Allowance {
            owner: key(owner),
            spender: key(spender),
        })
        .await;
        self.ensure_reachable().await?;
        self.expect_token(token)?;
        Ok(self.book.lock().await.allowance(owner, spender))
    }

    async fn total_assets(&self, vault: &str) -> LedgerResult<RawAmount> {
        self.read(vault, |book| Ok(book.total_assets())).await
    }

    async fn total_supply(&self, vault: &str) -> LedgerResult<RawAmount> {
        self.read(vault, |book| Ok(book.total_supply)).await
    }

    async fn total_allocated(&self, vault: &str) -> LedgerResult<RawAmount> {
        self.read(vault, |book| Ok(book.total_allocated())).await
    }

    async fn max_deposit(&self, vault: &str, _receiver: &str) -> LedgerResult<RawAmount> {
        self.read(vault, |book| Ok(book.max_deposit())).await
    }

    async fn max_withdraw(&self, vault: &str, owner: &str) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.max_withdraw(owner)).await
    }

    async fn fee_rates(&self, vault: &str) -> LedgerResult<FeeRates> {
        self.read(vault, |book| Ok(book.fees)).await
    }

    async fn active_strategies(&self, vault: &str) -> LedgerResult<Vec<String>> {
        self.read(vault, |book| {
            Ok(book
                .strategies
                .iter()
                .filter(|s| s.active)
                .map(|s| s.address.clone())
                .collect())
        })
        .await
    }

    async fn strategy_info(&self, vault: &str, strategy: &str) -> LedgerResult<StrategyInfo> {
        if self.faults.lock().await.failing_strategies.contains(&key(strategy)) {
            return Err(LedgerError::CallReverted(format!(
                "metadata lookup failed for {}",
                strategy
            )));
        }
        self.read(vault, |book| {
            book.strategies
                .iter()
                .find(|s| s.address == key(strategy))
                .map(|s| StrategyInfo {
                    name: s.name.clone(),
                    allocated: s.allocated,
                    active: s.active,
                    performance_fee_bps: s.performance_fee_bps,
                    last_harvest: s.last_harvest,
                })
                .ok_or_else(|| LedgerError::CallReverted(format!("unknown strategy {}", strategy)))
        })
        .await
    }

    async fn convert_to_shares(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.to_shares(assets, false)).await
    }

    async fn convert_to_assets(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.to_assets(shares, false)).await
    }

    async fn preview_deposit(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.to_shares(assets, false)).await
    }

    async fn preview_withdraw(&self, vault: &str, assets: RawAmount) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.to_shares(assets, true)).await
    }

    async fn preview_redeem(&self, vault: &str, shares: RawAmount) -> LedgerResult<RawAmount> {
        self.read(vault, |book| book.to_assets(shares, false)).await
    }

    async fn approve(&self, token: &str, owner: &str, spender: &str, amount: RawAmount) -> LedgerResult<String> {
        self.expect_token(token)?;
        let call = LedgerCall::Approve {
            spender: key(spender),
            amount,
        };
        self.submit(call, |book| {
            book.allowances.insert((key(owner), key(spender)), amount);
            Ok(())
        })
        .await
    }

    async fn deposit(&self, vault: &str, caller: &str, assets: RawAmount, receiver: &str) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        let call = LedgerCall::Deposit {
            assets,
            receiver: key(receiver),
        };
        self.submit(call, |book| book.deposit(vault, caller, assets, receiver)).await
    }

    async fn withdraw(
        &self,
        vault: &str,
        caller: &str,
        assets: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        let call = LedgerCall::Withdraw {
            assets,
            receiver: key(receiver),
            owner: key(owner),
        };
        self.submit(call, |book| book.withdraw(caller, assets, receiver, owner)).await
    }

    async fn redeem(
        &self,
        vault: &str,
        caller: &str,
        shares: RawAmount,
        receiver: &str,
        owner: &str,
    ) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        let call = LedgerCall::Redeem {
            shares,
            receiver: key(receiver),
            owner: key(owner),
        };
        self.submit(call, |book| book.redeem(caller, shares, receiver, owner)).await
    }

    async fn harvest(&self, vault: &str, caller: &str, strategy: &str) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        let call = LedgerCall::Harvest {
            strategy: key(strategy),
        };
        self.submit(call, |book| book.harvest(caller, strategy)).await
    }

    async fn rebalance(
        &self,
        vault: &str,
        caller: &str,
        allocations: &[(String, RawAmount)],
    ) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        let call = LedgerCall::Rebalance {
            allocations: allocations
                .iter()
                .map(|(strategy, amount)| (key(strategy), *amount))
                .collect(),
        };
        self.submit(call, |book| book.rebalance(caller, allocations)).await
    }

    async fn set_fees(&self, vault: &str, caller: &str, fees: FeeRates) -> LedgerResult<String> {
        self.expect_vault(vault)?;
        self.submit(LedgerCall::SetFees { fees }, |book| book.set_fees(caller, fees)).await
    }

    async fn wait_for_confirmation(&self, tx_hash: &str) -> LedgerResult<TxReceipt> {
        self.record(LedgerCall::Confirm {
            tx_hash: tx_hash.to_string(),
        })
        .await;

        let stalled = self.faults.lock().await.stall_confirmations;
        if stalled {
            std::future::pending::<()>().await;
        }
        if !self.confirmation_latency.is_zero() {
            tokio::time::sleep(self.confirmation_latency).await;
        }

        self.book
            .lock()
            .await
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownTransaction(tx_hash.to_string()))
    }

    async fn get_status(&self) -> DataSourceStatus {
        if self.faults.lock().await.reads_unreachable {
            DataSourceStatus::Error("demo ledger is offline".to_string())
        } else {
            DataSourceStatus::Connected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";

    fn usdc(amount: u128) -> RawAmount {
        amount * 1_000_000
    }

    #[tokio::test]
    async fn deposit_spends_allowance_and_mints_shares() {
        let ledger = DemoLedger::new(6, 18).with_asset_balance(ALICE, usdc(500));
        ledger.set_allowance(ALICE, DEMO_VAULT, usdc(100)).await;

        let preview = ledger.preview_deposit(DEMO_VAULT, usdc(100)).await.unwrap();
        let tx = ledger.deposit(DEMO_VAULT, ALICE, usdc(100), ALICE).await.unwrap();
        let receipt = ledger.wait_for_confirmation(&tx).await.unwrap();

        assert_eq!(receipt.status, TxStatus::Success);
        assert_eq!(ledger.balance_of(DEMO_VAULT, ALICE).await.unwrap(), preview);
        assert_eq!(ledger.balance_of(DEMO_ASSET, ALICE).await.unwrap(), usdc(400));
        assert_eq!(ledger.allowance(DEMO_ASSET, ALICE, DEMO_VAULT).await.unwrap(), 0);
        assert_eq!(ledger.total_assets(DEMO_VAULT).await.unwrap(), usdc(100));
    }

    #[tokio::test]
    async fn deposit_without_allowance_is_rejected() {
        let ledger = DemoLedger::new(6, 18).with_asset_balance(ALICE, usdc(500));
        let result = ledger.deposit(DEMO_VAULT, ALICE, usdc(100), ALICE).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(ledger.total_assets(DEMO_VAULT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn preview_withdraw_rounds_against_the_caller() {
        let ledger = DemoLedger::new(6, 6)
            .with_seed_deposit(ALICE, 1_000)
            .with_strategy("0x1111111111111111111111111111111111111111", "A", 0, 0);
        // Simulate yield so that one share is worth more than one asset unit.
        ledger.book.lock().await.idle += 101;

        let floor = ledger.convert_to_shares(DEMO_VAULT, 100).await.unwrap();
        let ceil = ledger.preview_withdraw(DEMO_VAULT, 100).await.unwrap();
        assert_eq!(ceil, floor + 1);
    }

    #[tokio::test]
    async fn reverted_transactions_leave_state_untouched() {
        let ledger = DemoLedger::new(6, 18).with_asset_balance(ALICE, usdc(10));
        ledger.revert_next_transaction().await;

        let tx = ledger.approve(DEMO_ASSET, ALICE, DEMO_VAULT, usdc(10)).await.unwrap();
        let receipt = ledger.wait_for_confirmation(&tx).await.unwrap();

        assert_eq!(receipt.status, TxStatus::Reverted);
        assert_eq!(ledger.allowance(DEMO_ASSET, ALICE, DEMO_VAULT).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn harvest_grows_the_allocation_net_of_fees() {
        let strategy = "0x1111111111111111111111111111111111111111";
        let ledger = DemoLedger::new(6, 18)
            .with_seed_deposit(ALICE, usdc(1_000_000))
            .with_strategy(strategy, "Compound Strategy", usdc(1_000_000), 1000);

        let tx = ledger.harvest(DEMO_VAULT, DEMO_ACCOUNT, strategy).await.unwrap();
        ledger.wait_for_confirmation(&tx).await.unwrap();

        let info = ledger.strategy_info(DEMO_VAULT, strategy).await.unwrap();
        // 0.1% gross yield, 10% of it taken as performance fee.
        assert_eq!(info.allocated, usdc(1_000_900));
        assert!(info.last_harvest > 0);
    }

    #[tokio::test]
    async fn only_the_keeper_may_harvest() {
        let strategy = "0x1111111111111111111111111111111111111111";
        let ledger = DemoLedger::new(6, 18)
            .with_seed_deposit(ALICE, usdc(10))
            .with_strategy(strategy, "Compound Strategy", usdc(10), 0);

        let result = ledger.harvest(DEMO_VAULT, ALICE, strategy).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn rebalance_moves_assets_between_idle_and_strategies() {
        let a = "0x1111111111111111111111111111111111111111";
        let b = "0x2222222222222222222222222222222222222222";
        let ledger = DemoLedger::new(6, 18)
            .with_seed_deposit(ALICE, usdc(1_000))
            .with_strategy(a, "Compound Strategy", usdc(600), 0)
            .with_strategy(b, "Uniswap V3 Strategy", usdc(200), 0);

        let targets = vec![(a.to_string(), usdc(100)), (b.to_string(), usdc(850))];
        let tx = ledger.rebalance(DEMO_VAULT, DEMO_ACCOUNT, &targets).await.unwrap();
        ledger.wait_for_confirmation(&tx).await.unwrap();

        assert_eq!(ledger.total_allocated(DEMO_VAULT).await.unwrap(), usdc(950));
        assert_eq!(ledger.total_assets(DEMO_VAULT).await.unwrap(), usdc(1_000));
        assert_eq!(ledger.strategy_info(DEMO_VAULT, b).await.unwrap().allocated, usdc(850));
    }

    #[tokio::test]
    async fn rebalance_cannot_allocate_more_than_the_vault_holds() {
        let a = "0x1111111111111111111111111111111111111111";
        let ledger = DemoLedger::new(6, 18)
            .with_seed_deposit(ALICE, usdc(1_000))
            .with_strategy(a, "Compound Strategy", usdc(600), 0);

        let result = ledger
            .rebalance(DEMO_VAULT, DEMO_ACCOUNT, &[(a.to_string(), usdc(1_001))])
            .await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
        assert_eq!(ledger.total_allocated(DEMO_VAULT).await.unwrap(), usdc(600));

        let result = ledger.rebalance(DEMO_VAULT, ALICE, &[(a.to_string(), 0)]).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));
    }

    #[tokio::test]
    async fn fee_updates_are_capped_and_keeper_only() {
        let ledger = DemoLedger::new(6, 18).with_fees(1000, 200);
        let fees = FeeRates {
            performance_bps: 1500,
            management_bps: 100,
        };

        assert!(ledger.set_fees(DEMO_VAULT, ALICE, fees).await.is_err());
        let too_high = FeeRates {
            performance_bps: 5001,
            management_bps: 0,
        };
        assert!(ledger.set_fees(DEMO_VAULT, DEMO_ACCOUNT, too_high).await.is_err());

        let tx = ledger.set_fees(DEMO_VAULT, DEMO_ACCOUNT, fees).await.unwrap();
        ledger.wait_for_confirmation(&tx).await.unwrap();
        assert_eq!(ledger.fee_rates(DEMO_VAULT).await.unwrap(), fees);
    }

    #[tokio::test]
    async fn deposit_cap_limits_max_deposit() {
        let ledger = DemoLedger::new(6, 18).with_asset_balance(ALICE, usdc(10));
        ledger.set_deposit_cap(Some(usdc(5))).await;
        ledger.set_allowance(ALICE, DEMO_VAULT, usdc(10)).await;

        assert_eq!(ledger.max_deposit(DEMO_VAULT, ALICE).await.unwrap(), usdc(5));
        let result = ledger.deposit(DEMO_VAULT, ALICE, usdc(6), ALICE).await;
        assert!(matches!(result, Err(LedgerError::Rejected(_))));

        ledger.set_deposit_cap(None).await;
        assert_eq!(ledger.max_deposit(DEMO_VAULT, ALICE).await.unwrap(), RawAmount::MAX);
    }

    #[tokio::test]
    async fn minted_assets_add_to_the_wallet_balance() {
        let ledger = DemoLedger::new(6, 18).with_asset_balance(ALICE, usdc(1));
        ledger.mint_assets(ALICE, usdc(2)).await;
        assert_eq!(ledger.balance_of(DEMO_ASSET, ALICE).await.unwrap(), usdc(3));
    }

    #[tokio::test]
    async fn unknown_handles_are_refused() {
        let ledger = DemoLedger::new(6, 18);
        let result = ledger.total_assets("0xdeadbeef").await;
        assert_eq!(result, Err(LedgerError::InvalidHandle("0xdeadbeef".to_string())));
    }

    #[tokio::test]
    async fn seeded_deployment_has_two_strategies() {
        let ledger = DemoLedger::seeded(6, 18, usdc(1_000_000), Duration::ZERO);
        let strategies = ledger.active_strategies(DEMO_VAULT).await.unwrap();
        assert_eq!(strategies.len(), 2);
        assert_eq!(ledger.total_allocated(DEMO_VAULT).await.unwrap(), usdc(2_000_000));
        assert_eq!(ledger.balance_of(DEMO_ASSET, DEMO_ACCOUNT).await.unwrap(), usdc(1_000_000));
    }
}
