//! PaymentMatcher.
//!
//! Applies decoded transfers to the orders of one network's working set.
//! Each candidate order is updated in its own transaction:
//! - lock the order row and re-check that it is still active
//! - record the transfer in the payment history, which dedups redelivered logs
//! - classify against the persisted total and update the order
//! - release the wallet when the order succeeds
//!
//! The working set is only touched after the commit.
//!
//! Transfers that reach an order after it expired are credited through
//! [`PaymentMatcher::apply_late`] with the same steps.

use crate::config::{ConfigStore, MatchingConfig};
use crate::entities::OrderStatus;
use crate::entities::payment_event_history::NewPaymentEvent;
use crate::entities::payment_order::{OrderPaymentUpdate, PaymentOrder};
use crate::events::{OrderStatusChanged, OrderStatusSender, TransferEvent, notify_status};
use crate::payment::{PaymentClassification, classify};
use crate::store::{PaymentStore, StoreError, StoreTransaction, block_to_db};
use crate::utils::time::utc_now;
use crate::working_set::SharedWorkingSet;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("order {0} disappeared from the store")]
    OrderNotFound(i64),
}

/// What a transfer did to one candidate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Applied {
        order_id: i64,
        status: OrderStatus,
        total: Decimal,
    },
    /// The log was already credited to this order.
    Duplicate { order_id: i64 },
    /// The order left the active states before the transfer was applied.
    Inactive { order_id: i64 },
}

/// Order states a transfer may be credited to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admit {
    Active,
    Expired,
}

#[derive(Clone)]
pub struct PaymentMatcher<S> {
    store: S,
    working_set: SharedWorkingSet,
    matching: ConfigStore<MatchingConfig>,
    status_tx: OrderStatusSender,
}

impl<S: PaymentStore> PaymentMatcher<S> {
    pub fn new(
        store: S,
        working_set: SharedWorkingSet,
        matching: ConfigStore<MatchingConfig>,
        status_tx: OrderStatusSender,
    ) -> Self {
        Self {
            store,
            working_set,
            matching,
            status_tx,
        }
    }

    pub fn working_set(&self) -> &SharedWorkingSet {
        &self.working_set
    }

    /// Apply a transfer to every active order paid at its recipient.
    ///
    /// All candidates are attempted; the first failure is returned after the
    /// rest were processed.
    pub async fn on_transfer(&self, event: &TransferEvent) -> Result<Vec<MatchOutcome>, MatchError> {
        if event.amount <= Decimal::ZERO {
            debug!(
                network = %event.network,
                tx_hash = %event.position.tx_hash_hex(),
                "Ignoring zero-value transfer"
            );
            return Ok(Vec::new());
        }

        let candidates = self
            .working_set
            .read()
            .await
            .candidates(&event.to, event.symbol);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if candidates.len() > 1 {
            warn!(
                network = %event.network,
                to = %event.to,
                orders = ?candidates.iter().map(|o| o.id).collect::<Vec<_>>(),
                "Several active orders share a deposit address"
            );
        }

        let covering_factor = self.matching.read().await.covering_factor;
        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut first_error = None;
        for order in candidates {
            match self.apply(&order, event, covering_factor, Admit::Active).await {
                Ok(outcome) => {
                    self.after_commit(outcome).await;
                    outcomes.push(outcome);
                }
                Err(e) => {
                    error!(
                        order_id = order.id,
                        tx_hash = %event.position.tx_hash_hex(),
                        error = %e,
                        "Failed to apply transfer"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Credit a transfer that arrived after `order` expired. The order stays
    /// `Expired` until the total covers the requested amount, then succeeds
    /// and frees its wallet.
    pub async fn apply_late(
        &self,
        order: &PaymentOrder,
        event: &TransferEvent,
    ) -> Result<MatchOutcome, MatchError> {
        if event.amount <= Decimal::ZERO {
            return Ok(MatchOutcome::Inactive { order_id: order.id });
        }
        let covering_factor = self.matching.read().await.covering_factor;
        let outcome = self
            .apply(order, event, covering_factor, Admit::Expired)
            .await?;
        self.after_commit(outcome).await;
        Ok(outcome)
    }

    async fn apply(
        &self,
        candidate: &PaymentOrder,
        event: &TransferEvent,
        covering_factor: Decimal,
        admit: Admit,
    ) -> Result<MatchOutcome, MatchError> {
        let mut tx = self.store.begin().await?;

        let order = tx
            .lock_order(candidate.id)
            .await?
            .ok_or(MatchError::OrderNotFound(candidate.id))?;
        let admitted = match admit {
            Admit::Active => order.status.is_active(),
            Admit::Expired => order.status == OrderStatus::Expired,
        };
        if !admitted {
            return Ok(MatchOutcome::Inactive { order_id: order.id });
        }

        let block_height = block_to_db(event.position.block_number)?;
        let recorded = tx
            .insert_payment_event(&NewPaymentEvent {
                payment_order_id: order.id,
                tx_hash: event.position.tx_hash_hex(),
                log_index: i64::try_from(event.position.log_index).map_err(|_| {
                    StoreError::OutOfRange(format!("log index {}", event.position.log_index))
                })?,
                from_address: format!("{:#x}", event.from),
                to_address: format!("{:#x}", event.to),
                contract_address: event.position.contract_hex(),
                symbol: event.symbol,
                amount: event.amount,
                network: event.network,
                block_number: block_height,
            })
            .await?;
        if !recorded {
            return Ok(MatchOutcome::Duplicate { order_id: order.id });
        }

        let (status, total, succeeded_at) = match classify(
            order.amount_requested,
            order.amount_transferred,
            event.amount,
            covering_factor,
            event.decimals,
        ) {
            PaymentClassification::Success { total } => {
                (OrderStatus::Success, total, Some(utc_now()))
            }
            PaymentClassification::Partial { total } => match admit {
                Admit::Active => (OrderStatus::Partial, total, None),
                Admit::Expired => (OrderStatus::Expired, total, None),
            },
            PaymentClassification::Ignored => {
                return Ok(MatchOutcome::Inactive { order_id: order.id });
            }
        };

        tx.apply_payment(&OrderPaymentUpdate {
            order_id: order.id,
            status,
            amount_transferred: total,
            block_height,
            succeeded_at,
        })
        .await?;
        if status == OrderStatus::Success {
            tx.release_wallets(&[order.wallet_id]).await?;
        }
        tx.commit().await?;

        info!(
            order_id = order.id,
            request_id = %order.request_id,
            status = ?status,
            total = %total,
            requested = %order.amount_requested,
            tx_hash = %event.position.tx_hash_hex(),
            late = admit == Admit::Expired,
            "Applied transfer to order"
        );

        if admit == Admit::Active {
            self.working_set.write().await.apply_payment(
                order.id,
                status,
                total,
                block_height,
                succeeded_at,
            );
        }

        Ok(MatchOutcome::Applied {
            order_id: order.id,
            status,
            total,
        })
    }

    async fn after_commit(&self, outcome: MatchOutcome) {
        match outcome {
            MatchOutcome::Applied {
                order_id,
                status: OrderStatus::Success,
                ..
            } => {
                notify_status(
                    &self.status_tx,
                    OrderStatusChanged {
                        order_id,
                        status: OrderStatus::Success,
                    },
                )
                .await;
            }
            MatchOutcome::Inactive { order_id } => {
                // The store moved on without us; drop the stale snapshot.
                if let Ok(Some(fresh)) = self.store.get_order(order_id).await {
                    if !fresh.status.is_active() {
                        self.working_set.write().await.remove(order_id);
                    }
                }
            }
            _ => {}
        }
    }
}
