//! TOML file configuration structures.
//!
//! These structs directly map to the `paywatch.toml` file format. Every
//! section except `[[networks]]` may be omitted.

use alloy::primitives::Address;
use paywatch_sdk::objects::{Network, Token};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::net::SocketAddr;
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub matching: MatchingSection,
    #[serde(default)]
    pub listener: ListenerSection,
    #[serde(default)]
    pub maintenance: MaintenanceSection,
    #[serde(default)]
    pub wallet: WalletSection,
    #[serde(default)]
    pub webhook: WebhookSection,
    #[serde(default)]
    pub networks: Vec<NetworkSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchingSection {
    /// Percent of the requested amount a payment may fall short by.
    pub covering_factor: Decimal,
    pub order_expiry_secs: u64,
    pub working_set_size: usize,
}

impl Default for MatchingSection {
    fn default() -> Self {
        Self {
            covering_factor: Decimal::ZERO,
            order_expiry_secs: 15 * 60,
            working_set_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSection {
    pub block_offset: u64,
    pub max_range_per_iteration: u64,
    pub chunk_size: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub idle_delay_ms: u64,
    pub event_channel_capacity: usize,
}

impl Default for ListenerSection {
    fn default() -> Self {
        Self {
            block_offset: 10,
            max_range_per_iteration: 100,
            chunk_size: 10,
            max_retries: 3,
            retry_delay_ms: 2_000,
            idle_delay_ms: 3_000,
            event_channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub sweep_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub failed_after_secs: u64,
    /// Interval of the late payment rescan of expired orders.
    pub catchup_interval_secs: u64,
    pub catchup_batch_size: usize,
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            cleanup_interval_secs: 60,
            failed_after_secs: 600,
            catchup_interval_secs: 60,
            catchup_batch_size: 100,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WalletSection {
    /// BIP-39 phrase. `WALLET_MNEMONIC` takes precedence.
    pub mnemonic: Option<String>,
    pub passphrase: String,
    pub wallet_type: String,
    pub salt: String,
    pub initial_pool_size: usize,
}

impl Default for WalletSection {
    fn default() -> Self {
        Self {
            mnemonic: None,
            passphrase: String::new(),
            wallet_type: "payment".to_string(),
            salt: String::new(),
            initial_pool_size: 0,
        }
    }
}

impl std::fmt::Debug for WalletSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSection")
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("wallet_type", &self.wallet_type)
            .field("initial_pool_size", &self.initial_pool_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookSection {
    pub secret: Option<String>,
    pub max_attempts: u32,
}

impl Default for WebhookSection {
    fn default() -> Self {
        Self {
            secret: None,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSection {
    pub network: Network,
    pub rpc_url: Url,
    #[serde(default)]
    pub confirmation_depth: u64,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub lock_contract: Option<Address>,
    #[serde(default)]
    pub membership_contract: Option<Address>,
    #[serde(default)]
    pub tokens: Vec<TokenSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSection {
    pub symbol: Token,
    pub address: Address,
    pub decimals: u8,
}
