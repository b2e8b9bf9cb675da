//! ExpirySweeper processor.
//!
//! On every tick the sweeper:
//! - drops orders that reached a terminal status from the working set
//! - expires active orders whose deadline passed and drops them too
//! - refills the set from the store, oldest expiry first, up to its capacity
//!
//! Ticks never queue. A tick that finds the previous sweep still running is
//! skipped.

use crate::config::{ConfigStore, MatchingConfig};
use crate::entities::{ChainNetwork, OrderStatus};
use crate::events::{OrderStatusChanged, OrderStatusSender, notify_status};
use crate::store::{ActiveOrdersQuery, PaymentStore, StoreError};
use crate::utils::time::utc_now;
use crate::working_set::SharedWorkingSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Result of one [`ExpirySweeper::sweep`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<i64>,
    pub expired: Vec<i64>,
    pub loaded: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep held the lock.
    Skipped,
}

struct Inner<S> {
    network: ChainNetwork,
    store: S,
    working_set: SharedWorkingSet,
    status_tx: OrderStatusSender,
    running: Mutex<()>,
}

pub struct ExpirySweeper<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PaymentStore> ExpirySweeper<S> {
    pub fn new(
        network: ChainNetwork,
        store: S,
        working_set: SharedWorkingSet,
        status_tx: OrderStatusSender,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                network,
                store,
                working_set,
                status_tx,
                running: Mutex::new(()),
            }),
        }
    }

    /// Sweep once, unless a sweep is already in progress.
    pub async fn sweep(&self) -> Result<SweepOutcome, StoreError> {
        let Ok(_running) = self.inner.running.try_lock() else {
            debug!(network = %self.inner.network, "Sweep already running, skipping tick");
            return Ok(SweepOutcome::Skipped);
        };
        self.sweep_locked().await.map(SweepOutcome::Completed)
    }

    async fn sweep_locked(&self) -> Result<SweepReport, StoreError> {
        let inner = &*self.inner;
        let now = utc_now();
        let mut report = SweepReport::default();

        let (finished, overdue) = {
            let set = inner.working_set.read().await;
            let mut finished = Vec::new();
            let mut overdue = Vec::new();
            for order in set.orders() {
                if !order.status.is_active() {
                    finished.push(order.id);
                } else if now > order.expired_at {
                    overdue.push(order.id);
                }
            }
            (finished, overdue)
        };

        if !overdue.is_empty() {
            let block_height = inner
                .store
                .get_block_cursor(inner.network)
                .await?
                .map(|c| c.last_processed_block)
                .unwrap_or_default();
            report.expired = inner.store.mark_orders_expired(&overdue, block_height).await?;
        }

        {
            let mut set = inner.working_set.write().await;
            // Every overdue order leaves the set. Those the store did not
            // expire were finished elsewhere and are reloaded if still active.
            for id in finished.iter().chain(overdue.iter()) {
                if set.remove(*id).is_some() {
                    report.removed.push(*id);
                }
            }
        }

        for order_id in &report.expired {
            notify_status(
                &inner.status_tx,
                OrderStatusChanged {
                    order_id: *order_id,
                    status: OrderStatus::Expired,
                },
            )
            .await;
        }

        report.loaded = self.refill().await?;

        if !report.removed.is_empty() || report.loaded > 0 {
            info!(
                network = %inner.network,
                removed = report.removed.len(),
                expired = report.expired.len(),
                loaded = report.loaded,
                "Working set swept"
            );
        }
        Ok(report)
    }

    /// Top the working set up from the store. Returns how many orders were
    /// added.
    pub async fn refill(&self) -> Result<usize, StoreError> {
        let inner = &*self.inner;
        let (exclude_ids, limit) = {
            let set = inner.working_set.read().await;
            (set.ids(), set.deficit())
        };
        if limit == 0 {
            return Ok(0);
        }

        let orders = inner
            .store
            .list_active_orders(ActiveOrdersQuery {
                network: inner.network,
                exclude_ids,
                expiring_after: utc_now(),
                limit,
            })
            .await?;

        let mut set = inner.working_set.write().await;
        let mut loaded = 0;
        for order in orders {
            if !set.contains(order.id) && set.insert(order) {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Sweep on a fixed interval until shutdown. Each tick runs in its own
    /// task so a slow sweep shows up as skipped ticks.
    pub async fn run(
        self,
        interval: Duration,
        matching: ConfigStore<MatchingConfig>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(network = %self.inner.network, "ExpirySweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut config_watcher = matching.subscribe();

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(network = %self.inner.network, "ExpirySweeper received shutdown signal");
                        break;
                    }
                }

                changed = config_watcher.changed() => {
                    if changed.is_err() {
                        continue;
                    }
                    let size = matching.read().await.working_set_size;
                    self.inner.working_set.write().await.set_capacity(size);
                    info!(
                        network = %self.inner.network,
                        working_set_size = size,
                        version = config_watcher.version(),
                        "Working set size updated"
                    );
                }

                _ = ticker.tick() => {
                    let sweeper = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sweeper.sweep().await {
                            error!(network = %sweeper.inner.network, error = %e, "Sweep failed");
                        }
                    });
                }
            }
        }

        // Let an in-flight sweep finish before returning.
        let _idle = self.inner.running.lock().await;
        info!(network = %self.inner.network, "ExpirySweeper shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::payment_order::{NewPaymentOrder, OrderPaymentUpdate};
    use crate::entities::TokenSymbol;
    use crate::events::order_status_channel;
    use crate::store::{MemoryPaymentStore, StoreTransaction};
    use crate::working_set::WorkingSet;
    use rust_decimal::Decimal;

    async fn seed(store: &MemoryPaymentStore, count: i64, expiry_minutes: i64) -> Vec<i64> {
        let mut tx = store.begin().await.unwrap();
        let mut orders = Vec::new();
        for i in 0..count {
            let id = tx.next_wallet_id().await.unwrap();
            tx.insert_wallet(id, &format!("0x{:040x}", id), true).await.unwrap();
            orders.push(NewPaymentOrder {
                request_id: format!("req-{id}"),
                wallet_id: id,
                amount_requested: Decimal::from(10),
                symbol: TokenSymbol::Usdt,
                network: ChainNetwork::Bsc,
                block_height: 1,
                webhook_url: None,
                expired_at: utc_now() + time::Duration::minutes(expiry_minutes + i),
            });
        }
        let ids = tx.insert_orders(&orders).await.unwrap().iter().map(|o| o.id).collect();
        tx.commit().await.unwrap();
        ids
    }

    fn sweeper(
        store: &MemoryPaymentStore,
        capacity: usize,
    ) -> (ExpirySweeper<MemoryPaymentStore>, SharedWorkingSet, crate::events::OrderStatusReceiver) {
        let working_set = WorkingSet::shared(ChainNetwork::Bsc, capacity);
        let (status_tx, status_rx) = order_status_channel();
        (
            ExpirySweeper::new(ChainNetwork::Bsc, store.clone(), working_set.clone(), status_tx),
            working_set,
            status_rx,
        )
    }

    #[tokio::test]
    async fn test_refill_loads_oldest_expiry_first() {
        let store = MemoryPaymentStore::new();
        let ids = seed(&store, 3, 10).await;
        let (sweeper, working_set, _rx) = sweeper(&store, 2);

        assert_eq!(sweeper.refill().await.unwrap(), 2);
        assert_eq!(working_set.read().await.ids(), vec![ids[0], ids[1]]);
        assert_eq!(sweeper.refill().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overdue_pending_order_expires() {
        let store = MemoryPaymentStore::new();
        let ids = seed(&store, 1, 10).await;
        let (sweeper, working_set, mut status_rx) = sweeper(&store, 5);
        sweeper.refill().await.unwrap();

        let past = utc_now() - time::Duration::minutes(1);
        store.set_order_expiry(ids[0], past).await;
        working_set
            .write()
            .await
            .insert(store.get_order(ids[0]).await.unwrap().unwrap());

        let outcome = sweeper.sweep().await.unwrap();
        let SweepOutcome::Completed(report) = outcome else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.expired, vec![ids[0]]);
        assert_eq!(report.removed, vec![ids[0]]);
        assert_eq!(report.loaded, 0);
        assert!(working_set.read().await.is_empty());

        let stored = store.get_order(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Expired);
        let event = status_rx.try_recv().unwrap();
        assert_eq!(event.status, OrderStatus::Expired);
    }

    #[tokio::test]
    async fn test_successful_order_removed_without_transition() {
        let store = MemoryPaymentStore::new();
        let ids = seed(&store, 2, 10).await;
        let (sweeper, working_set, mut status_rx) = sweeper(&store, 1);
        sweeper.refill().await.unwrap();

        let succeeded_at = Some(utc_now());
        let mut tx = store.begin().await.unwrap();
        tx.apply_payment(&OrderPaymentUpdate {
            order_id: ids[0],
            status: OrderStatus::Success,
            amount_transferred: Decimal::from(10),
            block_height: 5,
            succeeded_at,
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        working_set.write().await.apply_payment(
            ids[0],
            OrderStatus::Success,
            Decimal::from(10),
            5,
            succeeded_at,
        );

        let SweepOutcome::Completed(report) = sweeper.sweep().await.unwrap() else {
            panic!("sweep was skipped");
        };
        assert_eq!(report.removed, vec![ids[0]]);
        assert!(report.expired.is_empty());
        assert!(status_rx.try_recv().is_err());
        // The freed slot is refilled with the next order.
        assert_eq!(working_set.read().await.ids(), vec![ids[1]]);
        let stored = store.get_order(ids[0]).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Success);
        assert_eq!(stored.succeeded_at, succeeded_at);
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let store = MemoryPaymentStore::new();
        let (sweeper, _working_set, _rx) = sweeper(&store, 1);

        let _held = sweeper.inner.running.lock().await;
        assert_eq!(sweeper.sweep().await.unwrap(), SweepOutcome::Skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_reload_resizes_working_set() {
        let store = MemoryPaymentStore::new();
        let (sweeper, working_set, _rx) = sweeper(&store, 1);
        let matching = ConfigStore::new(MatchingConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(sweeper.run(Duration::from_secs(5), matching.clone(), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(1)).await;
        matching
            .update(MatchingConfig {
                working_set_size: 42,
                ..MatchingConfig::default()
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(working_set.read().await.capacity(), 42);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
