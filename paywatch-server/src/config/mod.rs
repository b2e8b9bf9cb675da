//! Configuration module for paywatch-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments and
//! environment variables, and turns it into the checked settings the core
//! consumes.

pub mod file;

use crate::config::file::{FileConfig, NetworkSection};
use alloy::primitives::Address;
use paywatch_core::config::{
    CatchupConfig, MaintenanceConfig, MatchingConfig, NetworkConfig, PollerConfig, TokenContract,
    WebhookConfig,
};
use paywatch_core::entities::ChainNetwork;
use paywatch_core::payment::MAX_TOKEN_DECIMALS;
use paywatch_core::wallet_pool::WalletDeriver;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("no wallet mnemonic: set WALLET_MNEMONIC or [wallet] mnemonic")]
    MissingMnemonic,

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Wallet pool settings.
pub struct WalletSettings {
    pub deriver: WalletDeriver,
    pub initial_pool_size: usize,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub matching: MatchingConfig,
    /// Shared poller settings; per-network fields are filled in by
    /// [`LoadedConfig::poller_for`].
    pub poller: PollerConfig,
    pub event_channel_capacity: usize,
    pub maintenance: MaintenanceConfig,
    pub catchup: CatchupConfig,
    pub wallet: WalletSettings,
    pub webhook: WebhookConfig,
    pub networks: Vec<NetworkConfig>,
}

impl LoadedConfig {
    pub fn poller_for(&self, network: &NetworkConfig) -> PollerConfig {
        PollerConfig {
            confirmation_depth: network.confirmation_depth,
            start_block: network.start_block,
            ..self.poller.clone()
        }
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
    mnemonic_override: Option<String>,
}

impl ConfigLoader {
    pub fn new(
        config_path: impl AsRef<Path>,
        listen_override: Option<SocketAddr>,
        mnemonic_override: Option<String>,
    ) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
            mnemonic_override,
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Read, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        if let Some(mnemonic) = &self.mnemonic_override {
            file_config.wallet.mnemonic = Some(mnemonic.clone());
        }

        validate(&file_config)?;
        build_loaded_config(file_config)
    }

    /// Re-read only the hot-reloadable matching settings (used on SIGHUP).
    pub fn reload_matching(&self) -> Result<MatchingConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let file_config: FileConfig = toml::from_str(&config_content)?;
        validate_matching(&file_config)?;
        Ok(matching_config(&file_config))
    }
}

/// Get the database URL from environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

fn validation(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn validate_matching(config: &FileConfig) -> Result<(), ConfigError> {
    let factor = config.matching.covering_factor;
    if factor < Decimal::ZERO || factor >= Decimal::ONE_HUNDRED {
        return Err(validation(format!(
            "covering_factor must be in 0..100, got {factor}"
        )));
    }
    if config.matching.order_expiry_secs == 0 {
        return Err(validation("order_expiry_secs must be positive"));
    }
    Ok(())
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    validate_matching(config)?;

    if config.networks.is_empty() {
        return Err(validation("at least one [[networks]] entry is required"));
    }

    let mut networks = HashSet::new();
    for network in &config.networks {
        if !networks.insert(network.network) {
            return Err(validation(format!(
                "network {} is configured twice",
                network.network
            )));
        }
        validate_network(network)?;
    }
    Ok(())
}

fn validate_network(network: &NetworkSection) -> Result<(), ConfigError> {
    if network.tokens.is_empty() {
        return Err(validation(format!(
            "network {} has no tokens",
            network.network
        )));
    }

    let mut symbols = HashSet::new();
    let mut addresses: HashSet<Address> = HashSet::new();
    let contracts = network
        .tokens
        .iter()
        .map(|t| t.address)
        .chain(network.lock_contract)
        .chain(network.membership_contract);
    for address in contracts {
        if !addresses.insert(address) {
            return Err(validation(format!(
                "contract {address} is listed twice on {}",
                network.network
            )));
        }
    }
    for token in &network.tokens {
        if !symbols.insert(token.symbol) {
            return Err(validation(format!(
                "token {} is listed twice on {}",
                token.symbol, network.network
            )));
        }
        if token.decimals > MAX_TOKEN_DECIMALS {
            return Err(validation(format!(
                "token {} on {} has {} decimals, at most {MAX_TOKEN_DECIMALS} are supported",
                token.symbol, network.network, token.decimals
            )));
        }
    }
    Ok(())
}

fn matching_config(config: &FileConfig) -> MatchingConfig {
    MatchingConfig {
        covering_factor: config.matching.covering_factor,
        order_expiry: Duration::from_secs(config.matching.order_expiry_secs),
        working_set_size: config.matching.working_set_size,
    }
}

fn build_loaded_config(config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let matching = matching_config(&config);
    let FileConfig {
        server,
        listener,
        maintenance,
        wallet,
        webhook,
        networks,
        ..
    } = config;

    let mnemonic = wallet
        .mnemonic
        .filter(|m| !m.trim().is_empty())
        .ok_or(ConfigError::MissingMnemonic)?;
    let deriver = WalletDeriver::new(mnemonic, wallet.passphrase, wallet.wallet_type, &wallet.salt);

    Ok(LoadedConfig {
        listen: server.listen,
        matching,
        poller: PollerConfig {
            block_offset: listener.block_offset,
            max_range_per_iteration: listener.max_range_per_iteration,
            chunk_size: listener.chunk_size,
            max_retries: listener.max_retries,
            retry_delay: Duration::from_millis(listener.retry_delay_ms),
            idle_delay: Duration::from_millis(listener.idle_delay_ms),
            confirmation_depth: 0,
            start_block: None,
        },
        event_channel_capacity: listener.event_channel_capacity,
        maintenance: MaintenanceConfig {
            sweep_interval: Duration::from_secs(maintenance.sweep_interval_secs.max(1)),
            cleanup_interval: Duration::from_secs(maintenance.cleanup_interval_secs.max(1)),
            failed_after: Duration::from_secs(maintenance.failed_after_secs),
        },
        catchup: CatchupConfig {
            interval: Duration::from_secs(maintenance.catchup_interval_secs.max(1)),
            chunk_size: listener.chunk_size,
            batch_size: maintenance.catchup_batch_size.max(1),
        },
        wallet: WalletSettings {
            deriver,
            initial_pool_size: wallet.initial_pool_size,
        },
        webhook: WebhookConfig {
            secret: webhook.secret,
            max_attempts: webhook.max_attempts,
        },
        networks: networks.into_iter().map(network_config).collect(),
    })
}

fn network_config(section: NetworkSection) -> NetworkConfig {
    NetworkConfig {
        network: ChainNetwork::from(section.network),
        rpc_url: section.rpc_url,
        confirmation_depth: section.confirmation_depth,
        start_block: section.start_block,
        tokens: section
            .tokens
            .into_iter()
            .map(|t| TokenContract {
                symbol: t.symbol.into(),
                address: t.address,
                decimals: t.decimals,
            })
            .collect(),
        lock_contract: section.lock_contract,
        membership_contract: section.membership_contract,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[wallet]
mnemonic = "test test test test test test test test test test test junk"

[[networks]]
network = "AVAX C-Chain"
rpc_url = "https://avax.example.com"
start_block = 1000

[[networks.tokens]]
symbol = "USDC"
address = "0x1111111111111111111111111111111111111111"
decimals = 6
"#;

    fn parse(extra: &str) -> FileConfig {
        toml::from_str(&format!("{BASE}{extra}")).unwrap()
    }

    #[test]
    fn test_valid_config_builds() {
        let config = parse("");
        validate(&config).unwrap();
        let loaded = build_loaded_config(config).unwrap();
        assert_eq!(loaded.networks[0].network, ChainNetwork::AvaxCChain);
        assert_eq!(loaded.matching.order_expiry, Duration::from_secs(900));
        let poller = loaded.poller_for(&loaded.networks[0]);
        assert_eq!(poller.start_block, Some(1000));
        assert_eq!(poller.retry_delay, Duration::from_secs(2));
        assert!(loaded.wallet.deriver.validate().is_ok());
    }

    #[test]
    fn test_rejects_duplicate_contracts() {
        let mut config = parse("");
        config.networks[0].lock_contract = Some(config.networks[0].tokens[0].address);
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(msg)) if msg.contains("listed twice")
        ));
    }

    #[test]
    fn test_rejects_bad_covering_factor() {
        let mut config = parse("");
        config.matching.covering_factor = Decimal::from(100);
        assert!(validate(&config).is_err());
        config.matching.covering_factor = Decimal::from(-1);
        assert!(validate(&config).is_err());
        config.matching.covering_factor = Decimal::new(995, 1);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_empty_tokens_and_wide_decimals() {
        let mut config = parse("");
        config.networks[0].tokens[0].decimals = 30;
        assert!(validate(&config).is_err());

        config.networks[0].tokens.clear();
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(msg)) if msg.contains("no tokens")
        ));
    }

    #[test]
    fn test_missing_mnemonic() {
        let mut config = parse("");
        config.wallet.mnemonic = None;
        assert!(matches!(
            build_loaded_config(config),
            Err(ConfigError::MissingMnemonic)
        ));
    }
}
