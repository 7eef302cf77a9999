use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};
use serde_json::json;
use std::sync::Arc;

use vaultdeck::api::{DemoLedger, Ledger};
use vaultdeck::config::{self, Config, OperatingMode};
use vaultdeck::model::*;
use vaultdeck::vault::{OperationReport, SessionOptions, VaultSession};

#[derive(Parser)]
#[command(name = "vaultdeck")]
#[command(about = "Vault dashboard client for a yield-aggregating ERC-4626 vault")]
struct Args {
    #[arg(long)]
    generate_config: bool,

    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    debug: bool,

    /// Print results as JSON instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Show vault totals, the connected account's position and strategies.
    Status,
    /// Preview a conversion without sending anything.
    Preview {
        #[arg(value_enum)]
        kind: PreviewKind,
        amount: String,
    },
    /// Deposit assets, approving the exact amount first if needed.
    Deposit { amount: String },
    /// Withdraw an amount of assets.
    Withdraw { amount: String },
    /// Redeem an amount of shares.
    Redeem { shares: String },
    /// Harvest one strategy (keeper only).
    Harvest { strategy: String },
    /// Set strategy allocations as `strategy=amount` pairs (keeper only).
    Rebalance {
        #[arg(required = true)]
        allocations: Vec<String>,
    },
    /// Set performance and management fees in percent (keeper only).
    SetFees { performance: String, management: String },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum PreviewKind {
    Deposit,
    Withdraw,
    Redeem,
    ToShares,
    ToAssets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    if !args.json {
        print_startup_banner();
    }

    if args.generate_config {
        config::generate_sample_config()?;
        println!("✅ Sample configuration generated at config.toml");
        return Ok(());
    }

    let config = config::load_config(args.config.as_deref())?;
    let command = args.command.clone().unwrap_or(Command::Status);

    let session = match config.operating_mode {
        OperatingMode::Live => connect_live(&config).await?,
        OperatingMode::Demo => connect_demo(&config).await?,
    };

    let result = run_command(&session, command, args.json).await;
    session.disconnect();
    result
}

pub fn print_startup_banner() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                          VAULTDECK                           ║");
    println!("║                                                              ║");
    println!("║              Yield Aggregator Vault Client (4626)            ║");
    println!("║                                                              ║");
    println!("║     Deposit | Withdraw | Redeem | Harvest | Live Previews    ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn session_options(config: &Config) -> SessionOptions {
    SessionOptions {
        confirmation_timeout: config.confirmation_timeout(),
    }
}

#[cfg(feature = "rpc")]
async fn connect_live(config: &Config) -> Result<VaultSession> {
    info!("🚀 Starting live mode against {} (network {})", config.rpc_url, config.network_id);

    let ledger = vaultdeck::api::RpcLedger::new(config).await?;
    let ledger: Arc<dyn Ledger> = Arc::new(ledger);
    Ok(VaultSession::connect(ledger, config.handles(), config.account.clone(), session_options(config)).await?)
}

#[cfg(not(feature = "rpc"))]
async fn connect_live(_config: &Config) -> Result<VaultSession> {
    Err(anyhow::anyhow!(
        "live mode needs the `rpc` feature; rebuild with --features rpc or set operating_mode = \"Demo\""
    ))
}

async fn connect_demo(config: &Config) -> Result<VaultSession> {
    info!("🧪 Starting demo mode with a seeded in-memory vault");

    let demo = &config.demo_settings;
    let ledger = DemoLedger::seeded(
        demo.asset_decimals,
        demo.share_decimals,
        demo.account_balance_raw()?,
        demo.confirmation_latency(),
    );
    let handles = ledger.handles();
    if handles.vault != config.vault_address.to_ascii_lowercase() {
        warn!("⚠️ Demo mode ignores vault_address {}, using {}", config.vault_address, handles.vault);
    }

    let ledger: Arc<dyn Ledger> = Arc::new(ledger);
    Ok(VaultSession::connect(ledger, handles, config.account.clone(), session_options(config)).await?)
}

async fn run_command(session: &VaultSession, command: Command, as_json: bool) -> Result<()> {
    let report = match command {
        Command::Status => {
            info!("📡 Ledger status: {:?}", session.ledger().get_status().await);
            let snapshot = session.refresh().await?;
            return print_snapshot(&snapshot, as_json);
        }
        Command::Preview { kind, amount } => return print_preview(session, kind, &amount, as_json).await,
        Command::Deposit { amount } => session.deposit(&amount).await?,
        Command::Withdraw { amount } => session.withdraw(&amount).await?,
        Command::Redeem { shares } => session.redeem(&shares).await?,
        Command::Harvest { strategy } => session.harvest(&strategy).await?,
        Command::Rebalance { allocations } => {
            let targets = allocations
                .iter()
                .map(|pair| parse_allocation(pair))
                .collect::<Result<Vec<_>>>()?;
            session.rebalance(targets).await?
        }
        Command::SetFees { performance, management } => session.set_fees(&performance, &management).await?,
    };

    print_report(&report, as_json)?;
    match session.store().snapshot() {
        Some(snapshot) => print_snapshot(&snapshot, as_json),
        None => Ok(()),
    }
}

fn parse_allocation(pair: &str) -> Result<AllocationTarget> {
    match pair.split_once('=') {
        Some((strategy, amount)) => Ok(AllocationTarget::new(strategy, amount)),
        None => Err(anyhow::anyhow!("allocation `{}` is not of the form strategy=amount", pair)),
    }
}

async fn print_preview(session: &VaultSession, kind: PreviewKind, amount: &str, as_json: bool) -> Result<()> {
    let converter = session.converter();
    let (result, unit) = match kind {
        PreviewKind::Deposit => (converter.preview_deposit(amount).await, "shares"),
        PreviewKind::Withdraw => (converter.preview_withdraw(amount).await, "shares burned"),
        PreviewKind::Redeem => (converter.preview_redeem(amount).await, "assets"),
        PreviewKind::ToShares => (converter.to_shares(amount).await, "shares"),
        PreviewKind::ToAssets => (converter.to_assets(amount).await, "assets"),
    };

    if as_json {
        let value = json!({
            "kind": format!("{:?}", kind),
            "input": amount,
            "output": result.to_string(),
            "raw": result.raw.to_string(),
            "decimals": result.decimals,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("🔮 {:?} {} → {} {}", kind, amount, result, unit);
    }
    Ok(())
}

fn print_report(report: &OperationReport, as_json: bool) -> Result<()> {
    if as_json {
        let value = json!({
            "id": report.id.to_string(),
            "kind": report.kind.to_string(),
            "amount": report.amount.map(|a| a.to_string()),
            "approval": report.approval.as_ref().map(|a| format!("{:?}", a)),
            "tx_hash": report.tx_hash,
            "transitions": report.transitions,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("✅ {} confirmed in {}", report.kind, report.tx_hash);
    if let Some(amount) = report.amount {
        println!("   amount:      {}", amount);
    }
    if let Some(approval) = &report.approval {
        println!("   approval:    {:?}", approval);
    }
    println!("   transitions: {:?}", report.transitions);
    println!();
    Ok(())
}

fn display_limit(amount: &TokenAmount) -> String {
    if amount.raw == RawAmount::MAX {
        "unlimited".to_string()
    } else {
        amount.to_string()
    }
}

fn print_snapshot(snapshot: &Snapshot, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
        return Ok(());
    }

    let vault = &snapshot.vault;
    println!("🏦 Vault");
    println!("   total assets:      {}", vault.total_assets);
    println!("   allocated:         {}", vault.total_allocated);
    println!("   idle:              {}", vault.idle_assets());
    println!("   total supply:      {}", vault.total_supply);
    println!("   share price:       {}", vault.share_price);
    println!("   strategies:        {}", vault.active_strategy_count);
    println!("   performance fee:   {}%", vault.performance_fee_rate);
    println!("   management fee:    {}%", vault.management_fee_rate);
    println!("   fetched at:        {}", vault.fetched_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();

    let position = &snapshot.position;
    println!("👤 Position");
    println!("   shares:            {}", position.share_balance);
    println!("   share value:       {}", position.share_value);
    println!("   wallet assets:     {}", position.asset_balance);
    println!("   allowance:         {}", display_limit(&position.asset_allowance));
    println!("   max deposit:       {}", display_limit(&position.max_depositable));
    println!("   max withdraw:      {}", position.max_withdrawable);
    println!();

    println!("📈 Strategies");
    for strategy in &snapshot.strategies {
        let harvested = strategy
            .last_harvest
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "   {} {:<22} {:>18}  fee {}%  harvested {}  ({})",
            if strategy.is_active { "🟢" } else { "⚪" },
            strategy.display_name,
            strategy.allocated_amount.to_string(),
            strategy.performance_fee,
            harvested,
            strategy.identifier
        );
    }
    Ok(())
}
