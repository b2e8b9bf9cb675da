use rust_decimal::Decimal;
use std::time::Duration;

/// Settings that can change at runtime through a reload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingConfig {
    /// Tolerated underpayment, in percent of the requested amount.
    pub covering_factor: Decimal,
    /// Lifetime of a new order.
    pub order_expiry: Duration,
    /// Target number of orders held in each network's working set.
    pub working_set_size: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            covering_factor: Decimal::ZERO,
            order_expiry: Duration::from_secs(15 * 60),
            working_set_size: 1000,
        }
    }
}
