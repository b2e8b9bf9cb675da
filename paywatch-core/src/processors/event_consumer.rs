//! EventConsumer processor.
//!
//! Drains one network's chain event channel. Transfers go to the
//! [`PaymentMatcher`]; lock and membership events are appended to their
//! history tables. A failed event is logged and dropped.

use super::payment_matcher::PaymentMatcher;
use crate::entities::ChainNetwork;
use crate::events::{ChainEvent, ChainEventReceiver};
use crate::store::{PaymentStore, StoreError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct EventConsumer<S> {
    network: ChainNetwork,
    store: S,
    matcher: PaymentMatcher<S>,
    event_rx: ChainEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: PaymentStore + Clone> EventConsumer<S> {
    pub fn new(
        network: ChainNetwork,
        store: S,
        matcher: PaymentMatcher<S>,
        event_rx: ChainEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            network,
            store,
            matcher,
            event_rx,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!(network = %self.network, "EventConsumer started");

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!(network = %self.network, "EventConsumer received shutdown signal");
                        break;
                    }
                }

                event = self.event_rx.recv() => {
                    let Some(event) = event else {
                        info!(network = %self.network, "Chain event channel closed");
                        break;
                    };
                    self.handle(event).await;
                }
            }
        }

        info!(network = %self.network, "EventConsumer shutdown complete");
    }

    pub async fn handle(&self, event: ChainEvent) {
        let position = *event.position();
        let kind = event.kind();
        if let Err(e) = self.route(event).await {
            error!(
                network = %self.network,
                kind,
                tx_hash = %position.tx_hash_hex(),
                log_index = position.log_index,
                error = %e,
                "Dropping chain event"
            );
        }
    }

    async fn route(&self, event: ChainEvent) -> Result<(), ConsumeError> {
        match event {
            ChainEvent::Transfer(transfer) => {
                let outcomes = self.matcher.on_transfer(&transfer).await?;
                if !outcomes.is_empty() {
                    debug!(network = %self.network, outcomes = ?outcomes, "Transfer matched");
                }
            }
            ChainEvent::Lock(lock) => {
                if !self.store.record_lock_event(&lock.to_record()?).await? {
                    warn!(
                        network = %self.network,
                        tx_hash = %lock.position.tx_hash_hex(),
                        "Lock event already recorded"
                    );
                }
            }
            ChainEvent::Membership(membership) => {
                if !self
                    .store
                    .record_membership_event(&membership.to_record()?)
                    .await?
                {
                    warn!(
                        network = %self.network,
                        tx_hash = %membership.position.tx_hash_hex(),
                        "Membership event already recorded"
                    );
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
enum ConsumeError {
    #[error(transparent)]
    Match(#[from] super::payment_matcher::MatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, MatchingConfig};
    use crate::entities::contract_events::LockEventKind;
    use crate::entities::OrderStatus;
    use crate::events::{
        LockEvent, LogPosition, MembershipDuration, MembershipEvent, chain_event_channel,
        order_status_channel,
    };
    use crate::processors::payment_matcher::tests::{DEPOSIT, seeded_store, transfer};
    use crate::working_set::WorkingSet;
    use alloy::primitives::{Address, B256, U256};

    fn position(tx: u8) -> LogPosition {
        LogPosition {
            contract: Address::repeat_byte(0x77),
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            block_number: 10,
        }
    }

    #[tokio::test]
    async fn test_routes_each_event_kind() {
        let (store, order) = seeded_store().await;
        let working_set = WorkingSet::shared(ChainNetwork::Bsc, 10);
        working_set.write().await.insert(order.clone());
        let (status_tx, _status_rx) = order_status_channel();
        let matcher = PaymentMatcher::new(
            store.clone(),
            working_set,
            ConfigStore::new(MatchingConfig::default()),
            status_tx,
        );
        let (event_tx, event_rx) = chain_event_channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let consumer = EventConsumer::new(ChainNetwork::Bsc, store.clone(), matcher, event_rx, shutdown_rx);

        let lock = ChainEvent::Lock(LockEvent {
            network: ChainNetwork::Bsc,
            kind: LockEventKind::Deposit,
            user: Address::repeat_byte(0x01),
            lock_id: 4,
            amount: U256::from(10u64),
            current_balance: U256::from(10u64),
            timestamp: 1_700_000_000,
            lock_duration: Some(86_400),
            position: position(1),
        });
        event_tx.send(ChainEvent::Transfer(transfer(DEPOSIT, "100", 9, 0))).await.unwrap();
        event_tx.send(lock.clone()).await.unwrap();
        event_tx.send(lock).await.unwrap();
        event_tx
            .send(ChainEvent::Membership(MembershipEvent {
                network: ChainNetwork::Bsc,
                user: Address::repeat_byte(0x02),
                order_id: 0,
                amount: U256::from(5u64),
                duration: MembershipDuration::ThreeYears,
                position: position(2),
            }))
            .await
            .unwrap();
        drop(event_tx);

        consumer.run().await;
        drop(shutdown_tx);

        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Success);
        assert_eq!(store.lock_events().await.len(), 1);
        let memberships = store.membership_events().await;
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].duration_days, 1095);
    }
}
