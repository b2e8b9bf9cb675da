//! Validated runtime configuration.
//!
//! The server crate parses the config file and builds these values; the
//! core only ever sees checked settings.

mod config_store;
mod listener;
mod matching;
mod network;
mod webhook;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use listener::{CatchupConfig, MaintenanceConfig, PollerConfig};
pub use matching::MatchingConfig;
pub use network::{NetworkConfig, TokenContract};
pub use webhook::WebhookConfig;
