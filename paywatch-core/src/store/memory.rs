//! In-process [`PaymentStore`].
//!
//! A transaction takes the store lock for its whole lifetime and works on a
//! copy of the state; commit swaps the copy in, drop discards it. That gives
//! the same serialization the row locks give on Postgres, at table
//! granularity. Unique constraints of the SQL schema are enforced here too.

use super::{ActiveOrdersQuery, PaymentStore, StoreError, StoreTransaction, block_to_db};
use crate::entities::block_cursor::BlockCursor;
use crate::entities::contract_events::{LockEventRecord, MembershipEventRecord};
use crate::entities::payment_event_history::{NewPaymentEvent, PaymentEventHistory};
use crate::entities::payment_order::{NewPaymentOrder, OrderPaymentUpdate, PaymentOrder};
use crate::entities::payment_wallet::PaymentWallet;
use crate::entities::{ChainNetwork, OrderStatus};
use crate::utils::time::utc_now;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::PrimitiveDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    cursors: HashMap<ChainNetwork, BlockCursor>,
    wallets: BTreeMap<i64, PaymentWallet>,
    orders: BTreeMap<i64, PaymentOrder>,
    payment_events: Vec<PaymentEventHistory>,
    lock_events: Vec<LockEventRecord>,
    membership_events: Vec<MembershipEventRecord>,
    wallet_sequence: i64,
    order_sequence: i64,
    event_sequence: i64,
}

impl MemoryState {
    fn release_wallets(&mut self, wallet_ids: &[i64]) -> u64 {
        let now = utc_now();
        let mut released = 0;
        for id in wallet_ids {
            if let Some(wallet) = self.wallets.get_mut(id) {
                wallet.in_use = false;
                wallet.updated_at = now;
                released += 1;
            }
        }
        released
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryPaymentStore {
    state: Arc<Mutex<MemoryState>>,
    fail_order_inserts: Arc<AtomicBool>,
}

impl MemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent order insert fail with a database error.
    pub fn fail_order_inserts(&self, fail: bool) {
        self.fail_order_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn wallet(&self, id: i64) -> Option<PaymentWallet> {
        self.state.lock().await.wallets.get(&id).cloned()
    }

    pub async fn wallets(&self) -> Vec<PaymentWallet> {
        self.state.lock().await.wallets.values().cloned().collect()
    }

    pub async fn orders(&self) -> Vec<PaymentOrder> {
        self.state.lock().await.orders.values().cloned().collect()
    }

    pub async fn payment_events(&self) -> Vec<PaymentEventHistory> {
        self.state.lock().await.payment_events.clone()
    }

    pub async fn lock_events(&self) -> Vec<LockEventRecord> {
        self.state.lock().await.lock_events.clone()
    }

    pub async fn membership_events(&self) -> Vec<MembershipEventRecord> {
        self.state.lock().await.membership_events.clone()
    }

    /// Overwrite an order's deadline, bypassing the active-state rules.
    pub async fn set_order_expiry(&self, order_id: i64, expired_at: PrimitiveDateTime) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&order_id) {
            order.expired_at = expired_at;
        }
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_order_inserts: bool,
}

#[async_trait]
impl PaymentStore for MemoryPaymentStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTransaction {
            guard,
            working,
            fail_order_inserts: self.fail_order_inserts.load(Ordering::SeqCst),
        })
    }

    async fn get_block_cursor(
        &self,
        network: ChainNetwork,
    ) -> Result<Option<BlockCursor>, StoreError> {
        Ok(self.state.lock().await.cursors.get(&network).cloned())
    }

    async fn save_block_cursor(
        &self,
        network: ChainNetwork,
        last_processed_block: u64,
        last_observed_head: u64,
    ) -> Result<(), StoreError> {
        let last_processed_block = block_to_db(last_processed_block)?;
        let last_observed_head = block_to_db(last_observed_head)?;
        let mut state = self.state.lock().await;
        let cursor = state.cursors.entry(network).or_insert_with(|| BlockCursor {
            network,
            last_processed_block,
            last_observed_head: last_processed_block.max(last_observed_head),
            updated_at: utc_now(),
        });
        cursor.last_processed_block = cursor.last_processed_block.max(last_processed_block);
        cursor.last_observed_head = cursor.last_observed_head.max(last_observed_head);
        cursor.updated_at = utc_now();
        Ok(())
    }

    async fn get_order(&self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn get_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.request_id == request_id)
            .cloned())
    }

    async fn list_active_orders(
        &self,
        query: ActiveOrdersQuery,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let state = self.state.lock().await;
        let excluded: HashSet<i64> = query.exclude_ids.into_iter().collect();
        let mut orders: Vec<PaymentOrder> = state
            .orders
            .values()
            .filter(|o| {
                o.network == query.network
                    && o.status.is_active()
                    && o.expired_at > query.expiring_after
                    && !excluded.contains(&o.id)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.expired_at, o.id));
        orders.truncate(query.limit);
        Ok(orders)
    }

    async fn list_expired_orders(
        &self,
        network: ChainNetwork,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let state = self.state.lock().await;
        let mut orders: Vec<PaymentOrder> = state
            .orders
            .values()
            .filter(|o| o.network == network && o.status == OrderStatus::Expired)
            .cloned()
            .collect();
        orders.sort_by_key(|o| (o.block_height, o.id));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn mark_orders_expired(
        &self,
        ids: &[i64],
        block_height: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let mut state = self.state.lock().await;
        let now = utc_now();
        let mut expired = Vec::new();
        for id in ids {
            if let Some(order) = state.orders.get_mut(id) {
                if order.status.is_active() {
                    order.status = OrderStatus::Expired;
                    order.block_height = order.block_height.max(block_height);
                    order.updated_at = now;
                    expired.push(*id);
                }
            }
        }
        Ok(expired)
    }

    async fn expire_overdue_orders(&self, now: PrimitiveDateTime) -> Result<Vec<i64>, StoreError> {
        let mut state = self.state.lock().await;
        let mut expired = Vec::new();
        for order in state.orders.values_mut() {
            if order.status.is_active() && order.expired_at < now {
                order.status = OrderStatus::Expired;
                order.updated_at = utc_now();
                expired.push(order.id);
            }
        }
        Ok(expired)
    }

    async fn fail_expired_orders(
        &self,
        expired_before: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        let mut state = self.state.lock().await;
        let mut failed = Vec::new();
        let mut wallet_ids = Vec::new();
        for order in state.orders.values_mut() {
            if order.status == OrderStatus::Expired && order.expired_at < expired_before {
                order.status = OrderStatus::Failed;
                order.updated_at = utc_now();
                failed.push(order.id);
                wallet_ids.push(order.wallet_id);
            }
        }
        state.release_wallets(&wallet_ids);
        Ok(failed)
    }

    async fn count_wallets(&self) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.wallets.len() as i64)
    }

    async fn release_wallets(&self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.release_wallets(wallet_ids))
    }

    async fn record_lock_event(&self, record: &LockEventRecord) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let duplicate = state.lock_events.iter().any(|e| {
            e.network == record.network
                && e.tx_hash == record.tx_hash
                && e.log_index == record.log_index
        });
        if duplicate {
            return Ok(false);
        }
        state.lock_events.push(record.clone());
        Ok(true)
    }

    async fn record_membership_event(
        &self,
        record: &MembershipEventRecord,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let duplicate = state.membership_events.iter().any(|e| {
            e.network == record.network
                && e.tx_hash == record.tx_hash
                && e.log_index == record.log_index
        });
        if duplicate {
            return Ok(false);
        }
        state.membership_events.push(record.clone());
        Ok(true)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn lock_first_available_wallet(&mut self) -> Result<Option<PaymentWallet>, StoreError> {
        Ok(self.working.wallets.values().find(|w| !w.in_use).cloned())
    }

    async fn mark_wallet_in_use(&mut self, wallet_id: i64) -> Result<(), StoreError> {
        let wallet =
            self.working
                .wallets
                .get_mut(&wallet_id)
                .ok_or(StoreError::RowCountMismatch {
                    entity: "wallet",
                    id: wallet_id,
                    actual: 0,
                })?;
        wallet.in_use = true;
        wallet.updated_at = utc_now();
        Ok(())
    }

    async fn next_wallet_id(&mut self) -> Result<i64, StoreError> {
        self.working.wallet_sequence += 1;
        Ok(self.working.wallet_sequence)
    }

    async fn insert_wallet(
        &mut self,
        id: i64,
        address: &str,
        in_use: bool,
    ) -> Result<PaymentWallet, StoreError> {
        let taken = self.working.wallets.contains_key(&id)
            || self
                .working
                .wallets
                .values()
                .any(|w| w.address.eq_ignore_ascii_case(address));
        if taken {
            return Err(StoreError::Duplicate("payment_wallets_address_key".to_string()));
        }
        let now = utc_now();
        let wallet = PaymentWallet {
            id,
            address: address.to_string(),
            in_use,
            created_at: now,
            updated_at: now,
        };
        self.working.wallets.insert(id, wallet.clone());
        self.working.wallet_sequence = self.working.wallet_sequence.max(id);
        Ok(wallet)
    }

    async fn release_wallets(&mut self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        Ok(self.working.release_wallets(wallet_ids))
    }

    async fn insert_orders(
        &mut self,
        orders: &[NewPaymentOrder],
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        if self.fail_order_inserts {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let now = utc_now();
        let mut inserted = Vec::with_capacity(orders.len());
        for new in orders {
            if self
                .working
                .orders
                .values()
                .any(|o| o.request_id == new.request_id)
            {
                return Err(StoreError::Duplicate("payment_orders_request_id_key".to_string()));
            }
            if self
                .working
                .orders
                .values()
                .any(|o| o.wallet_id == new.wallet_id && o.status.is_active())
            {
                return Err(StoreError::Duplicate(
                    "payment_orders_one_active_per_wallet".to_string(),
                ));
            }
            let wallet_address = self
                .working
                .wallets
                .get(&new.wallet_id)
                .map(|w| w.address.clone())
                .ok_or(StoreError::RowCountMismatch {
                    entity: "wallet",
                    id: new.wallet_id,
                    actual: 0,
                })?;

            self.working.order_sequence += 1;
            let order = PaymentOrder {
                id: self.working.order_sequence,
                request_id: new.request_id.clone(),
                wallet_id: new.wallet_id,
                wallet_address,
                amount_requested: new.amount_requested,
                amount_transferred: Decimal::ZERO,
                symbol: new.symbol,
                network: new.network,
                status: OrderStatus::Pending,
                block_height: new.block_height,
                webhook_url: new.webhook_url.clone(),
                expired_at: new.expired_at,
                succeeded_at: None,
                created_at: now,
                updated_at: now,
            };
            self.working.orders.insert(order.id, order.clone());
            inserted.push(order);
        }
        Ok(inserted)
    }

    async fn lock_order(&mut self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn insert_payment_event(&mut self, event: &NewPaymentEvent) -> Result<bool, StoreError> {
        let duplicate = self.working.payment_events.iter().any(|e| {
            e.payment_order_id == event.payment_order_id
                && e.tx_hash == event.tx_hash
                && e.log_index == event.log_index
        });
        if duplicate {
            return Ok(false);
        }
        self.working.event_sequence += 1;
        self.working.payment_events.push(PaymentEventHistory {
            id: self.working.event_sequence,
            payment_order_id: event.payment_order_id,
            tx_hash: event.tx_hash.clone(),
            log_index: event.log_index,
            from_address: event.from_address.clone(),
            to_address: event.to_address.clone(),
            contract_address: event.contract_address.clone(),
            symbol: event.symbol,
            amount: event.amount,
            network: event.network,
            block_number: event.block_number,
            created_at: utc_now(),
        });
        Ok(true)
    }

    async fn apply_payment(&mut self, update: &OrderPaymentUpdate) -> Result<(), StoreError> {
        let mismatch = StoreError::RowCountMismatch {
            entity: "payment order",
            id: update.order_id,
            actual: 0,
        };
        let order = self
            .working
            .orders
            .get_mut(&update.order_id)
            .ok_or(mismatch)?;
        if !order.status.is_payable() {
            return Err(StoreError::RowCountMismatch {
                entity: "payment order",
                id: update.order_id,
                actual: 0,
            });
        }
        order.status = update.status;
        order.amount_transferred = update.amount_transferred;
        order.block_height = order.block_height.max(update.block_height);
        if update.succeeded_at.is_some() {
            order.succeeded_at = update.succeeded_at;
        }
        order.updated_at = utc_now();
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }
}
