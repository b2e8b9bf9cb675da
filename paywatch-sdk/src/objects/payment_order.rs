//! Payment order request and response objects.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Network, Token};

/// A single order creation request.
///
/// `request_id` is the caller's idempotency key: submitting the same id
/// twice returns the order created by the first request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentOrder {
    pub request_id: String,
    pub network: Network,
    pub symbol: Token,
    pub amount: Decimal,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePaymentOrders {
    pub orders: Vec<CreatePaymentOrder>,
}

/// Order status for API responses.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `paywatch-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentOrderStatus {
    Pending,
    Partial,
    Success,
    Expired,
    Failed,
}

impl PaymentOrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PaymentOrderStatus::Success | PaymentOrderStatus::Expired | PaymentOrderStatus::Failed
        )
    }
}

impl std::fmt::Display for PaymentOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentOrderStatus::Pending => write!(f, "PENDING"),
            PaymentOrderStatus::Partial => write!(f, "PARTIAL"),
            PaymentOrderStatus::Success => write!(f, "SUCCESS"),
            PaymentOrderStatus::Expired => write!(f, "EXPIRED"),
            PaymentOrderStatus::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOrderResponse {
    pub id: i64,
    pub request_id: String,
    pub network: Network,
    pub symbol: Token,
    pub payment_address: String,
    pub amount: Decimal,
    pub transferred: Decimal,
    pub status: PaymentOrderStatus,
    pub block_height: i64,
    /// Unix timestamp (seconds).
    pub expired_at: i64,
    /// Unix timestamp (seconds).
    pub succeeded_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStateResponse {
    pub network: Network,
    pub last_processed_block: i64,
    pub last_observed_head: i64,
}
