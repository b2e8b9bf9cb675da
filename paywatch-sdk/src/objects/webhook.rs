//! Webhook payload types for order events.

use serde::{Deserialize, Serialize};

use super::{Network, PaymentOrderStatus, Token};
use crate::signature::Signature;

/// Webhook payload for order status change events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChangedPayload {
    pub event_type: String,
    pub order_id: i64,
    pub request_id: String,
    pub network: Network,
    pub symbol: Token,
    pub status: PaymentOrderStatus,
    pub amount: String,
    pub transferred: String,
    pub timestamp: i64,
}

impl OrderStatusChangedPayload {
    pub const EVENT_TYPE: &'static str = "order_status_changed";
}

impl Signature for OrderStatusChangedPayload {}
