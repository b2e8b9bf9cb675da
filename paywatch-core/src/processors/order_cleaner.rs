//! OrderCleaner processor.
//!
//! Store-wide housekeeping that does not depend on any working set. Active
//! orders past their deadline become `Expired`, and `Expired` orders older
//! than the grace period become `Failed` with their wallets released.

use crate::config::MaintenanceConfig;
use crate::entities::OrderStatus;
use crate::events::{OrderStatusChanged, OrderStatusSender, notify_status};
use crate::store::{PaymentStore, StoreError};
use crate::utils::time::utc_now;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: Vec<i64>,
    pub failed: Vec<i64>,
}

pub struct OrderCleaner<S> {
    store: S,
    config: MaintenanceConfig,
    status_tx: OrderStatusSender,
    running: Arc<Mutex<()>>,
}

impl<S: PaymentStore> OrderCleaner<S> {
    pub fn new(store: S, config: MaintenanceConfig, status_tx: OrderStatusSender) -> Self {
        Self {
            store,
            config,
            status_tx,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Run one cleanup pass. `None` if a pass is already running.
    pub async fn clean(&self) -> Result<Option<CleanupReport>, StoreError> {
        let Ok(_running) = self.running.try_lock() else {
            debug!("Cleanup already running, skipping");
            return Ok(None);
        };

        let now = utc_now();
        let expired = self.store.expire_overdue_orders(now).await?;
        let failed = self
            .store
            .fail_expired_orders(now - self.config.failed_after)
            .await?;

        for (ids, status) in [(&expired, OrderStatus::Expired), (&failed, OrderStatus::Failed)] {
            for order_id in ids {
                notify_status(
                    &self.status_tx,
                    OrderStatusChanged {
                        order_id: *order_id,
                        status,
                    },
                )
                .await;
            }
        }

        if !expired.is_empty() || !failed.is_empty() {
            info!(
                expired = expired.len(),
                failed = failed.len(),
                "Cleaned up stale orders"
            );
        }
        Ok(Some(CleanupReport { expired, failed }))
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.config.cleanup_interval, "OrderCleaner started");

        let mut ticker = tokio::time::interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("OrderCleaner received shutdown signal");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.clean().await {
                        error!(error = %e, "Order cleanup failed");
                    }
                }
            }
        }

        info!("OrderCleaner shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::order_status_channel;
    use crate::processors::payment_matcher::tests::seeded_store;
    use std::time::Duration;

    #[tokio::test]
    async fn test_expires_then_fails_after_grace_period() {
        let (store, order) = seeded_store().await;
        let (status_tx, mut status_rx) = order_status_channel();
        let cleaner = OrderCleaner::new(
            store.clone(),
            MaintenanceConfig {
                failed_after: Duration::from_secs(600),
                ..MaintenanceConfig::default()
            },
            status_tx,
        );

        store
            .set_order_expiry(order.id, utc_now() - time::Duration::minutes(1))
            .await;
        let report = cleaner.clean().await.unwrap().unwrap();
        assert_eq!(report.expired, vec![order.id]);
        assert!(report.failed.is_empty());
        assert!(store.wallet(order.wallet_id).await.unwrap().in_use);
        assert_eq!(status_rx.try_recv().unwrap().status, OrderStatus::Expired);

        store
            .set_order_expiry(order.id, utc_now() - time::Duration::minutes(20))
            .await;
        let report = cleaner.clean().await.unwrap().unwrap();
        assert!(report.expired.is_empty());
        assert_eq!(report.failed, vec![order.id]);
        assert!(!store.wallet(order.wallet_id).await.unwrap().in_use);
        assert_eq!(status_rx.try_recv().unwrap().status, OrderStatus::Failed);

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_fresh_orders_untouched() {
        let (store, order) = seeded_store().await;
        let (status_tx, _status_rx) = order_status_channel();
        let cleaner = OrderCleaner::new(store.clone(), MaintenanceConfig::default(), status_tx);

        assert_eq!(cleaner.clean().await.unwrap(), Some(CleanupReport::default()));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_overlapping_clean_is_skipped() {
        let (store, _) = seeded_store().await;
        let (status_tx, _status_rx) = order_status_channel();
        let cleaner = OrderCleaner::new(store, MaintenanceConfig::default(), status_tx);

        let _held = cleaner.running.lock().await;
        assert_eq!(cleaner.clean().await.unwrap(), None);
    }
}
