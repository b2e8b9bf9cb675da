//! Long-running tasks of the payment pipeline.
//!
//! Per network:
//! - `ChainPoller`: scans blocks, emits `ChainEvent`
//! - `EventConsumer`: receives `ChainEvent`, drives the `PaymentMatcher`
//! - `ExpirySweeper`: keeps the working set fresh, emits `OrderStatusChanged`
//! - `ExpiredOrderCatchup`: credits late transfers to expired orders
//!
//! Shared:
//! - `OrderCleaner`: expires and fails stale orders, emits `OrderStatusChanged`
//! - `WebhookSender`: receives `OrderStatusChanged`, delivers webhooks

pub mod chain_poller;
pub mod event_consumer;
pub mod expired_order_catchup;
pub mod expiry_sweeper;
pub mod order_cleaner;
pub mod payment_matcher;
pub mod webhook_sender;

pub use chain_poller::{ChainPoller, PollOutcome};
pub use event_consumer::EventConsumer;
pub use expired_order_catchup::{CatchupOutcome, CatchupReport, ExpiredOrderCatchup};
pub use expiry_sweeper::{ExpirySweeper, SweepOutcome, SweepReport};
pub use order_cleaner::{CleanupReport, OrderCleaner};
pub use payment_matcher::{MatchError, MatchOutcome, PaymentMatcher};
pub use webhook_sender::{WebhookError, WebhookSender};
