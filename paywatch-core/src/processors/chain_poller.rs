//! ChainPoller processor.
//!
//! One poller runs per network. Each iteration it:
//! - reads the chain head (lowered by the confirmation depth)
//! - scans `[current, min(current + max_range, head)]` in sub-chunks
//! - decodes every log through the handler registry
//! - pushes events into the bounded pipeline channel
//! - persists the cursor
//!
//! Delivery is at-least-once: a crash between dispatch and the cursor write
//! replays the range, and the matcher dedups on `(order, tx hash, log index)`.

use crate::chain::ChainClient;
use crate::config::PollerConfig;
use crate::decoders::HandlerRegistry;
use crate::entities::ChainNetwork;
use crate::events::ChainEventSender;
use crate::store::PaymentStore;
use alloy::rpc::types::Log;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What one call to [`ChainPoller::poll_once`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A range was scanned.
    Scanned {
        from: u64,
        to: u64,
        events: usize,
        skipped_chunks: usize,
    },
    /// Caught up with the head.
    Idle,
    /// Head or cursor could not be read; try again after the retry delay.
    Retry,
    /// The event channel is closed.
    Stopped,
}

pub struct ChainPoller<C, S> {
    network: ChainNetwork,
    client: C,
    store: S,
    registry: Arc<HandlerRegistry>,
    config: PollerConfig,
    event_tx: ChainEventSender,
    shutdown_rx: watch::Receiver<bool>,
    current_block: Option<u64>,
}

impl<C: ChainClient, S: PaymentStore> ChainPoller<C, S> {
    pub fn new(
        network: ChainNetwork,
        client: C,
        store: S,
        registry: Arc<HandlerRegistry>,
        config: PollerConfig,
        event_tx: ChainEventSender,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            network,
            client,
            store,
            registry,
            config,
            event_tx,
            shutdown_rx,
            current_block: None,
        }
    }

    /// Next block to scan, once known.
    pub fn current_block(&self) -> Option<u64> {
        self.current_block
    }

    pub async fn run(mut self) {
        info!(
            network = %self.network,
            contracts = self.registry.len(),
            "ChainPoller started"
        );

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let delay = match self.poll_once().await {
                PollOutcome::Scanned {
                    from,
                    to,
                    events,
                    skipped_chunks,
                } => {
                    debug!(
                        network = %self.network,
                        from,
                        to,
                        events,
                        skipped_chunks,
                        "Scanned block range"
                    );
                    None
                }
                PollOutcome::Idle => Some(self.config.idle_delay),
                PollOutcome::Retry => Some(self.config.retry_delay),
                PollOutcome::Stopped => {
                    info!(network = %self.network, "Event channel closed");
                    break;
                }
            };

            if let Some(delay) = delay {
                if self.sleep_or_shutdown(delay).await {
                    break;
                }
            }
        }

        info!(network = %self.network, "ChainPoller shutdown complete");
    }

    /// Run a single iteration.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let observed_head = match self.client.head_block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(network = %self.network, error = %e, "Failed to fetch chain head");
                return PollOutcome::Retry;
            }
        };
        let head = observed_head.saturating_sub(self.config.confirmation_depth);

        let current = match self.current_block {
            Some(current) => current,
            None => match self.seed_block(head).await {
                Some(seed) => {
                    info!(network = %self.network, block = seed, "Seeded scan position");
                    self.current_block = Some(seed);
                    seed
                }
                None => return PollOutcome::Retry,
            },
        };

        if current > head {
            return PollOutcome::Idle;
        }

        let end = current
            .saturating_add(self.config.max_range_per_iteration)
            .min(head);
        let chunk_size = self.config.chunk_size.max(1);
        let addresses = self.registry.addresses();

        let mut events = 0;
        let mut skipped_chunks = 0;
        let mut from = current;
        while from <= end {
            let to = from.saturating_add(chunk_size - 1).min(end);
            match self.fetch_chunk(&addresses, from, to).await {
                Some(logs) => match self.dispatch(logs).await {
                    Some(sent) => events += sent,
                    None => return PollOutcome::Stopped,
                },
                None => {
                    error!(
                        network = %self.network,
                        from,
                        to,
                        attempts = self.config.max_retries,
                        "Giving up on block chunk"
                    );
                    skipped_chunks += 1;
                }
            }
            from = to + 1;
        }

        self.current_block = Some(end + 1);
        if let Err(e) = self
            .store
            .save_block_cursor(self.network, end, observed_head)
            .await
        {
            error!(
                network = %self.network,
                block = end,
                error = %e,
                "Failed to persist block cursor"
            );
        }

        PollOutcome::Scanned {
            from: current,
            to: end,
            events,
            skipped_chunks,
        }
    }

    /// Resume after the stored cursor, or start a little behind the head.
    async fn seed_block(&self, head: u64) -> Option<u64> {
        let stored = match self.store.get_block_cursor(self.network).await {
            Ok(cursor) => cursor.map(|c| c.next_block()),
            Err(e) => {
                error!(network = %self.network, error = %e, "Failed to read block cursor");
                return None;
            }
        };
        let seed = stored.unwrap_or_else(|| head.saturating_sub(self.config.block_offset));
        Some(match self.config.start_block {
            Some(start) => seed.max(start),
            None => seed,
        })
    }

    /// Fetch one chunk with bounded retries. `None` once every attempt failed.
    async fn fetch_chunk(
        &self,
        addresses: &[alloy::primitives::Address],
        from: u64,
        to: u64,
    ) -> Option<Vec<Log>> {
        if addresses.is_empty() {
            return Some(Vec::new());
        }

        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            match self.client.filter_logs(addresses, from, to).await {
                Ok(logs) => return Some(logs),
                Err(e) => {
                    warn!(
                        network = %self.network,
                        from,
                        to,
                        attempt,
                        error = %e,
                        "Failed to fetch logs"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        None
    }

    /// Decode and forward logs in chain order. Returns the number of events
    /// sent, or `None` if the channel closed.
    async fn dispatch(&self, mut logs: Vec<Log>) -> Option<usize> {
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let mut sent = 0;
        for log in &logs {
            let Some(decoder) = self.registry.get(&log.address()) else {
                warn!(
                    network = %self.network,
                    contract = %log.address(),
                    tx_hash = ?log.transaction_hash,
                    "Dropping log from unregistered contract"
                );
                continue;
            };

            let event = match decoder.decode(log) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        network = %self.network,
                        decoder = decoder.name(),
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Failed to decode log"
                    );
                    continue;
                }
            };

            if self.event_tx.send(event).await.is_err() {
                return None;
            }
            sent += 1;
        }
        Some(sent)
    }

    /// Returns `true` if shutdown was requested while sleeping.
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            biased;

            changed = self.shutdown_rx.changed() => {
                changed.is_err() || *self.shutdown_rx.borrow()
            }
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
