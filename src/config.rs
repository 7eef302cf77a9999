use anyhow::Result;
use figment::{Figment, providers::{Format, Toml, Env}};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use url::Url;

use crate::api::demo::{DEMO_ACCOUNT, DEMO_ASSET, DEMO_VAULT};
use crate::model::units::{parse_units, RawAmount};
use crate::model::VaultHandles;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub operating_mode: OperatingMode,
    pub rpc_url: String,
    pub network_id: u64,
    pub vault_address: String,
    pub asset_address: String,
    pub account: Option<String>,
    pub confirmation_timeout_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub demo_settings: DemoSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperatingMode {
    Live,
    Demo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoSettings {
    pub asset_decimals: u8,
    pub share_decimals: u8,
    /// Whole asset units credited to the demo account.
    pub account_balance: String,
    pub confirmation_latency_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            operating_mode: OperatingMode::Demo,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            network_id: 31337,
            vault_address: DEMO_VAULT.to_string(),
            asset_address: DEMO_ASSET.to_string(),
            account: Some(DEMO_ACCOUNT.to_string()),
            confirmation_timeout_ms: 60_000,
            receipt_poll_interval_ms: 1_000,
            demo_settings: DemoSettings::default(),
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            asset_decimals: 6,
            share_decimals: 18,
            account_balance: "1000000".to_string(),
            confirmation_latency_ms: 250,
        }
    }
}

impl Config {
    pub fn handles(&self) -> VaultHandles {
        VaultHandles {
            vault: self.vault_address.clone(),
            asset: self.asset_address.clone(),
        }
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

impl DemoSettings {
    pub fn account_balance_raw(&self) -> Result<RawAmount> {
        Ok(parse_units(&self.account_balance, self.asset_decimals)?)
    }

    pub fn confirmation_latency(&self) -> Duration {
        Duration::from_millis(self.confirmation_latency_ms)
    }
}

pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    let config_file = config_path.unwrap_or("config.toml");

    let config: Config = Figment::new()
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("VAULTDECK_"))
        .extract()?;

    validate_config(&config)?;

    Ok(config)
}

pub fn generate_sample_config() -> Result<()> {
    save_config_to_file(&Config::default(), "config.toml")
}

fn is_address(handle: &str) -> bool {
    handle.len() == 42
        && handle.starts_with("0x")
        && handle[2..].chars().all(|c| c.is_ascii_hexdigit())
}

pub fn validate_config(config: &Config) -> Result<()> {
    let url = Url::parse(&config.rpc_url)
        .map_err(|e| anyhow::anyhow!("rpc_url is not a valid URL: {}", e))?;
    if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
        return Err(anyhow::anyhow!("rpc_url must use http(s) or ws(s), got {}", url.scheme()));
    }

    if !is_address(&config.vault_address) {
        return Err(anyhow::anyhow!("vault_address must be a 0x-prefixed 20-byte address"));
    }

    if !is_address(&config.asset_address) {
        return Err(anyhow::anyhow!("asset_address must be a 0x-prefixed 20-byte address"));
    }

    if let Some(account) = &config.account {
        if !is_address(account) {
            return Err(anyhow::anyhow!("Please set a valid account in config"));
        }
    }

    if config.confirmation_timeout_ms < 1_000 {
        return Err(anyhow::anyhow!("confirmation_timeout_ms must be at least 1000ms"));
    }

    if config.receipt_poll_interval_ms < 100 {
        return Err(anyhow::anyhow!("receipt_poll_interval_ms must be at least 100ms"));
    }

    if config.receipt_poll_interval_ms >= config.confirmation_timeout_ms {
        return Err(anyhow::anyhow!(
            "receipt_poll_interval_ms must be shorter than confirmation_timeout_ms"
        ));
    }

    let demo = &config.demo_settings;
    if demo.asset_decimals > 36 || demo.share_decimals > 36 {
        return Err(anyhow::anyhow!("demo token decimals must be at most 36"));
    }
    if demo.share_decimals < demo.asset_decimals {
        return Err(anyhow::anyhow!("demo share_decimals must not be below asset_decimals"));
    }
    demo.account_balance_raw()
        .map_err(|e| anyhow::anyhow!("demo account_balance is invalid: {}", e))?;

    Ok(())
}

pub fn save_config_to_file(config: &Config, path: &str) -> Result<()> {
    let toml_content = toml::to_string_pretty(config)?;
    fs::write(path, toml_content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn rejects_a_malformed_rpc_url() {
        let config = Config {
            rpc_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_short_confirmation_timeouts() {
        let config = Config {
            confirmation_timeout_ms: 500,
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_bad_handles() {
        let config = Config {
            vault_address: "0x1234".to_string(),
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());

        let config = Config {
            account: Some("alice".to_string()),
            ..Config::default()
        };
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn demo_balance_is_parsed_in_asset_units() {
        let settings = DemoSettings::default();
        assert_eq!(settings.account_balance_raw().unwrap(), 1_000_000_000_000);
    }

    #[test]
    fn sample_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let config: Config = Figment::new().merge(Toml::string(&text)).extract().unwrap();
        assert_eq!(config.vault_address, DEMO_VAULT);
        assert_eq!(config.demo_settings.share_decimals, 18);
    }
}
