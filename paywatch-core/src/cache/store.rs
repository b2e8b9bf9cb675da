use super::ttl::{CacheStats, TtlCache};
use crate::entities::ChainNetwork;
use crate::entities::block_cursor::BlockCursor;
use crate::entities::contract_events::{LockEventRecord, MembershipEventRecord};
use crate::entities::payment_event_history::NewPaymentEvent;
use crate::entities::payment_order::{NewPaymentOrder, OrderPaymentUpdate, PaymentOrder};
use crate::entities::payment_wallet::PaymentWallet;
use crate::store::{ActiveOrdersQuery, PaymentStore, StoreError, StoreTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use time::PrimitiveDateTime;

pub const DEFAULT_CURSOR_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_ORDER_TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Caches {
    cursors: TtlCache<ChainNetwork, BlockCursor>,
    orders: TtlCache<i64, PaymentOrder>,
    request_ids: TtlCache<String, i64>,
}

/// Read-through cache in front of any [`PaymentStore`].
///
/// Only point reads are cached. Listing queries and everything inside a
/// transaction go straight to the inner store, and every write evicts the
/// orders it changed.
#[derive(Debug, Clone)]
pub struct CachedPaymentStore<S> {
    inner: S,
    caches: Arc<Caches>,
}

impl<S: PaymentStore> CachedPaymentStore<S> {
    pub fn new(inner: S) -> Self {
        Self::with_ttls(inner, DEFAULT_CURSOR_TTL, DEFAULT_ORDER_TTL)
    }

    pub fn with_ttls(inner: S, cursor_ttl: Duration, order_ttl: Duration) -> Self {
        Self {
            inner,
            caches: Arc::new(Caches {
                cursors: TtlCache::new(cursor_ttl),
                orders: TtlCache::new(order_ttl),
                request_ids: TtlCache::new(order_ttl),
            }),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn order_stats(&self) -> CacheStats {
        self.caches.orders.stats()
    }

    pub fn cursor_stats(&self) -> CacheStats {
        self.caches.cursors.stats()
    }

    /// Cache an order loaded from the inner store, unless an eviction ran
    /// while it was being loaded.
    async fn fill_order(&self, order: &PaymentOrder, generation: u64) -> bool {
        self.caches
            .orders
            .insert_if_generation(order.id, order.clone(), generation)
            .await
    }

    async fn evict_orders(&self, ids: &[i64]) {
        if ids.is_empty() {
            return;
        }
        self.caches.orders.invalidate_many(ids).await;
    }
}

/// Transaction that evicts the orders it wrote once it commits.
pub struct CachedTransaction<T> {
    inner: T,
    caches: Arc<Caches>,
    touched: Vec<i64>,
}

#[async_trait]
impl<S: PaymentStore> PaymentStore for CachedPaymentStore<S> {
    type Tx = CachedTransaction<S::Tx>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(CachedTransaction {
            inner: self.inner.begin().await?,
            caches: Arc::clone(&self.caches),
            touched: Vec::new(),
        })
    }

    async fn get_block_cursor(
        &self,
        network: ChainNetwork,
    ) -> Result<Option<BlockCursor>, StoreError> {
        if let Some(cursor) = self.caches.cursors.get(&network).await {
            return Ok(Some(cursor));
        }
        let cursor = self.inner.get_block_cursor(network).await?;
        if let Some(cursor) = &cursor {
            self.caches.cursors.insert(network, cursor.clone()).await;
        }
        Ok(cursor)
    }

    async fn save_block_cursor(
        &self,
        network: ChainNetwork,
        last_processed_block: u64,
        last_observed_head: u64,
    ) -> Result<(), StoreError> {
        self.inner
            .save_block_cursor(network, last_processed_block, last_observed_head)
            .await?;
        // The stored row may be ahead of what we wrote, so cache what the
        // store actually holds.
        match self.inner.get_block_cursor(network).await? {
            Some(cursor) => self.caches.cursors.insert(network, cursor).await,
            None => self.caches.cursors.invalidate(&network).await,
        }
        Ok(())
    }

    async fn get_order(&self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        if let Some(order) = self.caches.orders.get(&id).await {
            return Ok(Some(order));
        }
        let generation = self.caches.orders.generation();
        let order = self.inner.get_order(id).await?;
        if let Some(order) = &order {
            self.fill_order(order, generation).await;
        }
        Ok(order)
    }

    async fn get_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        let key = request_id.to_string();
        if let Some(id) = self.caches.request_ids.get(&key).await {
            return self.get_order(id).await;
        }
        let generation = self.caches.orders.generation();
        let order = self.inner.get_order_by_request_id(request_id).await?;
        if let Some(order) = &order {
            self.caches.request_ids.insert(key, order.id).await;
            self.fill_order(order, generation).await;
        }
        Ok(order)
    }

    async fn list_active_orders(
        &self,
        query: ActiveOrdersQuery,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        self.inner.list_active_orders(query).await
    }

    async fn list_expired_orders(
        &self,
        network: ChainNetwork,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        self.inner.list_expired_orders(network, limit).await
    }

    async fn mark_orders_expired(
        &self,
        ids: &[i64],
        block_height: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let expired = self.inner.mark_orders_expired(ids, block_height).await?;
        self.evict_orders(&expired).await;
        Ok(expired)
    }

    async fn expire_overdue_orders(&self, now: PrimitiveDateTime) -> Result<Vec<i64>, StoreError> {
        let expired = self.inner.expire_overdue_orders(now).await?;
        self.evict_orders(&expired).await;
        Ok(expired)
    }

    async fn fail_expired_orders(
        &self,
        expired_before: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        let failed = self.inner.fail_expired_orders(expired_before).await?;
        self.evict_orders(&failed).await;
        Ok(failed)
    }

    async fn count_wallets(&self) -> Result<i64, StoreError> {
        self.inner.count_wallets().await
    }

    async fn release_wallets(&self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        self.inner.release_wallets(wallet_ids).await
    }

    async fn record_lock_event(&self, record: &LockEventRecord) -> Result<bool, StoreError> {
        self.inner.record_lock_event(record).await
    }

    async fn record_membership_event(
        &self,
        record: &MembershipEventRecord,
    ) -> Result<bool, StoreError> {
        self.inner.record_membership_event(record).await
    }
}

#[async_trait]
impl<T: StoreTransaction> StoreTransaction for CachedTransaction<T> {
    async fn lock_first_available_wallet(&mut self) -> Result<Option<PaymentWallet>, StoreError> {
        self.inner.lock_first_available_wallet().await
    }

    async fn mark_wallet_in_use(&mut self, wallet_id: i64) -> Result<(), StoreError> {
        self.inner.mark_wallet_in_use(wallet_id).await
    }

    async fn next_wallet_id(&mut self) -> Result<i64, StoreError> {
        self.inner.next_wallet_id().await
    }

    async fn insert_wallet(
        &mut self,
        id: i64,
        address: &str,
        in_use: bool,
    ) -> Result<PaymentWallet, StoreError> {
        self.inner.insert_wallet(id, address, in_use).await
    }

    async fn release_wallets(&mut self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        self.inner.release_wallets(wallet_ids).await
    }

    async fn insert_orders(
        &mut self,
        orders: &[NewPaymentOrder],
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        self.inner.insert_orders(orders).await
    }

    async fn lock_order(&mut self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        self.inner.lock_order(id).await
    }

    async fn insert_payment_event(&mut self, event: &NewPaymentEvent) -> Result<bool, StoreError> {
        self.inner.insert_payment_event(event).await
    }

    async fn apply_payment(&mut self, update: &OrderPaymentUpdate) -> Result<(), StoreError> {
        self.inner.apply_payment(update).await?;
        self.touched.push(update.order_id);
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        let CachedTransaction {
            inner,
            caches,
            touched,
        } = self;
        inner.commit().await?;
        if !touched.is_empty() {
            caches.orders.invalidate_many(&touched).await;
        }
        Ok(())
    }
}
