//! ExpiredOrderCatchup processor.
//!
//! An expired order keeps its wallet until the cleaner fails it, so a
//! transfer that arrives late still lands on an address no other order was
//! given. The poller only matches against working sets, which never hold
//! expired orders. Each pass of this processor:
//! - lists the network's `Expired` orders, lowest block height first
//! - rescans the token contracts from just above that height up to the
//!   poller's cursor
//! - credits transfers to the expired order paid at their recipient
//!
//! Credits go through [`PaymentMatcher::apply_late`], so a log that is
//! scanned again on the next pass is recorded once.

use crate::chain::ChainClient;
use crate::config::{CatchupConfig, TokenContract};
use crate::decoders::{Erc20TransferDecoder, LogDecoder};
use crate::entities::payment_order::PaymentOrder;
use crate::entities::{ChainNetwork, OrderStatus, TokenSymbol};
use crate::events::{ChainEvent, TransferEvent};
use crate::processors::{MatchOutcome, PaymentMatcher};
use crate::store::{PaymentStore, StoreError};
use alloy::primitives::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchupReport {
    /// Expired orders considered.
    pub orders: usize,
    /// Inclusive block range scanned, if any.
    pub scanned: Option<(u64, u64)>,
    /// Orders that received a late transfer.
    pub credited: Vec<i64>,
    /// Orders that reached `Success` during the pass.
    pub settled: Vec<i64>,
    pub skipped_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchupOutcome {
    Completed(CatchupReport),
    /// Another pass held the lock.
    Skipped,
}

pub struct ExpiredOrderCatchup<C, S> {
    network: ChainNetwork,
    client: C,
    store: S,
    matcher: PaymentMatcher<S>,
    decoders: HashMap<Address, Erc20TransferDecoder>,
    symbols: HashMap<TokenSymbol, Address>,
    config: CatchupConfig,
    running: Arc<Mutex<()>>,
}

impl<C: ChainClient, S: PaymentStore> ExpiredOrderCatchup<C, S> {
    pub fn new(
        network: ChainNetwork,
        client: C,
        store: S,
        matcher: PaymentMatcher<S>,
        tokens: &[TokenContract],
        config: CatchupConfig,
    ) -> Self {
        let decoders = tokens
            .iter()
            .map(|t| {
                (
                    t.address,
                    Erc20TransferDecoder::new(network, t.symbol, t.decimals),
                )
            })
            .collect();
        let symbols = tokens.iter().map(|t| (t.symbol, t.address)).collect();
        Self {
            network,
            client,
            store,
            matcher,
            decoders,
            symbols,
            config,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run one pass, unless a pass is already in progress.
    pub async fn catch_up(&self) -> Result<CatchupOutcome, StoreError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!(network = %self.network, "Catch-up already running, skipping");
            return Ok(CatchupOutcome::Skipped);
        };
        self.catch_up_locked().await.map(CatchupOutcome::Completed)
    }

    async fn catch_up_locked(&self) -> Result<CatchupReport, StoreError> {
        let orders = self
            .store
            .list_expired_orders(self.network, self.config.batch_size)
            .await?;
        let mut report = CatchupReport {
            orders: orders.len(),
            ..CatchupReport::default()
        };
        let Some(lowest) = orders.iter().map(|o| o.block_height).min() else {
            return Ok(report);
        };

        // Only blocks the poller has finished are rescanned.
        let Some(cursor) = self.store.get_block_cursor(self.network).await? else {
            return Ok(report);
        };
        let from = u64::try_from(lowest).unwrap_or_default().saturating_add(1);
        let to = u64::try_from(cursor.last_processed_block).unwrap_or_default();
        if from > to {
            return Ok(report);
        }

        let mut addresses: Vec<Address> = orders
            .iter()
            .filter_map(|o| self.symbols.get(&o.symbol).copied())
            .collect();
        addresses.sort();
        addresses.dedup();
        if addresses.is_empty() {
            return Ok(report);
        }

        let mut by_address: HashMap<String, Vec<PaymentOrder>> = HashMap::new();
        for order in orders {
            by_address
                .entry(order.wallet_address.to_lowercase())
                .or_default()
                .push(order);
        }

        report.scanned = Some((from, to));
        let chunk_size = self.config.chunk_size.max(1);
        let mut chunk_from = from;
        while chunk_from <= to {
            let chunk_to = chunk_from.saturating_add(chunk_size - 1).min(to);
            match self.client.filter_logs(&addresses, chunk_from, chunk_to).await {
                Ok(mut logs) => {
                    logs.sort_by_key(|log| (log.block_number, log.log_index));
                    for log in &logs {
                        let Some(transfer) = self.decode(log) else {
                            continue;
                        };
                        self.credit(&transfer, &by_address, &mut report).await;
                    }
                }
                Err(e) => {
                    warn!(
                        network = %self.network,
                        from = chunk_from,
                        to = chunk_to,
                        error = %e,
                        "Failed to fetch logs for expired orders"
                    );
                    report.skipped_chunks += 1;
                }
            }
            chunk_from = chunk_to + 1;
        }

        if !report.credited.is_empty() {
            info!(
                network = %self.network,
                from,
                to,
                credited = report.credited.len(),
                settled = report.settled.len(),
                "Credited late payments"
            );
        }
        Ok(report)
    }

    fn decode(&self, log: &alloy::rpc::types::Log) -> Option<TransferEvent> {
        let decoder = self.decoders.get(&log.address())?;
        match decoder.decode(log) {
            Ok(ChainEvent::Transfer(transfer)) => Some(transfer),
            Ok(_) => None,
            Err(e) => {
                debug!(
                    network = %self.network,
                    tx_hash = ?log.transaction_hash,
                    error = %e,
                    "Skipping undecodable log"
                );
                None
            }
        }
    }

    async fn credit(
        &self,
        transfer: &TransferEvent,
        by_address: &HashMap<String, Vec<PaymentOrder>>,
        report: &mut CatchupReport,
    ) {
        let recipient = format!("{:#x}", transfer.to);
        let Some(orders) = by_address.get(&recipient) else {
            return;
        };
        let block = i64::try_from(transfer.position.block_number).unwrap_or(i64::MAX);

        for order in orders {
            // Transfers at or below the order's height were already seen by
            // the live matcher.
            if order.symbol != transfer.symbol || block <= order.block_height {
                continue;
            }
            match self.matcher.apply_late(order, transfer).await {
                Ok(MatchOutcome::Applied {
                    order_id, status, ..
                }) => {
                    if !report.credited.contains(&order_id) {
                        report.credited.push(order_id);
                    }
                    if status == OrderStatus::Success {
                        report.settled.push(order_id);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(
                        network = %self.network,
                        order_id = order.id,
                        tx_hash = %transfer.position.tx_hash_hex(),
                        error = %e,
                        "Failed to credit late transfer"
                    );
                }
            }
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            network = %self.network,
            interval = ?self.config.interval,
            "ExpiredOrderCatchup started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(network = %self.network, "ExpiredOrderCatchup received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.catch_up().await {
                        error!(network = %self.network, error = %e, "Expired order catch-up failed");
                    }
                }
            }
        }

        info!(network = %self.network, "ExpiredOrderCatchup shutdown complete");
    }
}
