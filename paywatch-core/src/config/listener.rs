use std::time::Duration;

/// Chain poller settings for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// How far behind the head to start when no cursor is stored.
    pub block_offset: u64,
    /// Upper bound on blocks scanned per iteration.
    pub max_range_per_iteration: u64,
    /// Blocks per `eth_getLogs` call.
    pub chunk_size: u64,
    /// Attempts per chunk before it is skipped.
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Sleep when there are no new blocks.
    pub idle_delay: Duration,
    /// Blocks below the head treated as not yet safe to scan.
    pub confirmation_depth: u64,
    /// Never scan below this block.
    pub start_block: Option<u64>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            block_offset: 10,
            max_range_per_iteration: 100,
            chunk_size: 10,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            idle_delay: Duration::from_secs(3),
            confirmation_depth: 0,
            start_block: None,
        }
    }
}

/// Background maintenance intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub sweep_interval: Duration,
    pub cleanup_interval: Duration,
    /// How long an order stays `Expired` before it is failed and its
    /// wallet released.
    pub failed_after: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            failed_after: Duration::from_secs(10 * 60),
        }
    }
}

/// Late payment rescans of expired orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchupConfig {
    pub interval: Duration,
    /// Blocks per `eth_getLogs` call.
    pub chunk_size: u64,
    /// Expired orders considered per pass.
    pub batch_size: usize,
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            chunk_size: 10,
            batch_size: 100,
        }
    }
}
