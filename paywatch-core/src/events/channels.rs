//! Event channel factories and handles.

use super::types::{ChainEvent, OrderStatusChanged};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for decoded chain events.
pub type ChainEventSender = mpsc::Sender<ChainEvent>;
/// Receiver handle for decoded chain events.
pub type ChainEventReceiver = mpsc::Receiver<ChainEvent>;

/// Sender handle for OrderStatusChanged events.
pub type OrderStatusSender = mpsc::Sender<OrderStatusChanged>;
/// Receiver handle for OrderStatusChanged events.
pub type OrderStatusReceiver = mpsc::Receiver<OrderStatusChanged>;

/// Create the bounded channel between one network's poller and its consumer.
///
/// A full channel blocks the poller, so `capacity` bounds how far the chain
/// scan can run ahead of matching.
pub fn chain_event_channel(capacity: usize) -> (ChainEventSender, ChainEventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Create a new OrderStatusChanged channel.
///
/// Multiple senders can be cloned from the returned sender.
pub fn order_status_channel() -> (OrderStatusSender, OrderStatusReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Publish a status change, logging instead of failing when nobody listens.
pub async fn notify_status(sender: &OrderStatusSender, event: OrderStatusChanged) {
    if let Err(e) = sender.send(event).await {
        tracing::warn!(
            order_id = event.order_id,
            status = ?event.status,
            error = %e,
            "Failed to publish OrderStatusChanged"
        );
    }
}
