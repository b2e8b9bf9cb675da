//! Event system for the chain-to-matcher pipeline.
//!
//! # Event Flow
//!
//! 1. `ChainPoller` decodes logs into `ChainEvent` -> `EventConsumer`
//! 2. `EventConsumer` hands transfers to `PaymentMatcher` and records
//!    lock and membership events
//! 3. `PaymentMatcher`, `ExpirySweeper` and `OrderCleaner` emit
//!    `OrderStatusChanged` -> `WebhookSender`

pub mod channels;
pub mod types;

pub use channels::{
    ChainEventReceiver, ChainEventSender, DEFAULT_CHANNEL_BUFFER, OrderStatusReceiver,
    OrderStatusSender, chain_event_channel, notify_status, order_status_channel,
};

pub use types::{
    ChainEvent, LockEvent, LogPosition, MembershipDuration, MembershipEvent, OrderStatusChanged,
    TransferEvent,
};
