use super::{ActiveOrdersQuery, PaymentStore, StoreError, StoreTransaction, block_to_db};
use crate::entities::ChainNetwork;
use crate::entities::block_cursor::{BlockCursor, GetBlockCursor, SaveBlockCursor};
use crate::entities::contract_events::{
    InsertLockEvent, InsertMembershipEvent, LockEventRecord, MembershipEventRecord,
};
use crate::entities::payment_event_history::{NewPaymentEvent, PaymentEventHistory};
use crate::entities::payment_order::{
    ExpireOverduePaymentOrders, GetPaymentOrderById, GetPaymentOrderByRequestId,
    ListActivePaymentOrders, ListExpiredPaymentOrders, MarkPaymentOrdersExpired, NewPaymentOrder,
    OrderPaymentUpdate, PaymentOrder,
};
use crate::entities::payment_wallet::{CountPaymentWallets, PaymentWallet};
use crate::framework::{DatabaseProcessor, TransactionProcessor};
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use time::PrimitiveDateTime;

/// [`PaymentStore`] backed by Postgres.
#[derive(Debug, Clone)]
pub struct PgPaymentStore {
    db: DatabaseProcessor,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor::new(pool),
        }
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    type Tx = TransactionProcessor<'static>;

    async fn begin(&self) -> Result<Self::Tx, StoreError> {
        Ok(self.db.begin().await?)
    }

    async fn get_block_cursor(
        &self,
        network: ChainNetwork,
    ) -> Result<Option<BlockCursor>, StoreError> {
        Ok(self.db.process(GetBlockCursor { network }).await?)
    }

    async fn save_block_cursor(
        &self,
        network: ChainNetwork,
        last_processed_block: u64,
        last_observed_head: u64,
    ) -> Result<(), StoreError> {
        self.db
            .process(SaveBlockCursor {
                network,
                last_processed_block: block_to_db(last_processed_block)?,
                last_observed_head: block_to_db(last_observed_head)?,
            })
            .await?;
        Ok(())
    }

    async fn get_order(&self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self.db.process(GetPaymentOrderById { id }).await?)
    }

    async fn get_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(self
            .db
            .process(GetPaymentOrderByRequestId {
                request_id: request_id.to_string(),
            })
            .await?)
    }

    async fn list_active_orders(
        &self,
        query: ActiveOrdersQuery,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let limit = i64::try_from(query.limit)
            .map_err(|_| StoreError::OutOfRange(format!("limit {}", query.limit)))?;
        Ok(self
            .db
            .process(ListActivePaymentOrders {
                network: query.network,
                exclude_ids: query.exclude_ids,
                expiring_after: query.expiring_after,
                limit,
            })
            .await?)
    }

    async fn list_expired_orders(
        &self,
        network: ChainNetwork,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        let limit =
            i64::try_from(limit).map_err(|_| StoreError::OutOfRange(format!("limit {limit}")))?;
        Ok(self
            .db
            .process(ListExpiredPaymentOrders { network, limit })
            .await?)
    }

    async fn mark_orders_expired(
        &self,
        ids: &[i64],
        block_height: i64,
    ) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .db
            .process(MarkPaymentOrdersExpired {
                ids: ids.to_vec(),
                block_height,
            })
            .await?)
    }

    async fn expire_overdue_orders(&self, now: PrimitiveDateTime) -> Result<Vec<i64>, StoreError> {
        Ok(self.db.process(ExpireOverduePaymentOrders { now }).await?)
    }

    async fn fail_expired_orders(
        &self,
        expired_before: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError> {
        let mut tx = self.db.begin().await?;
        let failed = PaymentOrder::fail_expired(&mut tx, expired_before).await?;
        let wallet_ids: Vec<i64> = failed.iter().map(|(_, wallet_id)| *wallet_id).collect();
        PaymentWallet::release_many(&mut tx, &wallet_ids).await?;
        tx.commit().await?;
        Ok(failed.into_iter().map(|(order_id, _)| order_id).collect())
    }

    async fn count_wallets(&self) -> Result<i64, StoreError> {
        Ok(self.db.process(CountPaymentWallets).await?)
    }

    async fn release_wallets(&self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        let mut db = self.db.clone();
        Ok(PaymentWallet::release_many(&mut db, wallet_ids).await?)
    }

    async fn record_lock_event(&self, record: &LockEventRecord) -> Result<bool, StoreError> {
        Ok(self
            .db
            .process(InsertLockEvent {
                record: record.clone(),
            })
            .await?)
    }

    async fn record_membership_event(
        &self,
        record: &MembershipEventRecord,
    ) -> Result<bool, StoreError> {
        Ok(self
            .db
            .process(InsertMembershipEvent {
                record: record.clone(),
            })
            .await?)
    }
}

#[async_trait]
impl StoreTransaction for TransactionProcessor<'static> {
    async fn lock_first_available_wallet(&mut self) -> Result<Option<PaymentWallet>, StoreError> {
        Ok(PaymentWallet::lock_first_available_tx(&mut self.tx).await?)
    }

    async fn mark_wallet_in_use(&mut self, wallet_id: i64) -> Result<(), StoreError> {
        let actual = PaymentWallet::mark_in_use_tx(&mut self.tx, wallet_id).await?;
        if actual != 1 {
            return Err(StoreError::RowCountMismatch {
                entity: "wallet",
                id: wallet_id,
                actual,
            });
        }
        Ok(())
    }

    async fn next_wallet_id(&mut self) -> Result<i64, StoreError> {
        Ok(PaymentWallet::next_id_tx(&mut self.tx).await?)
    }

    async fn insert_wallet(
        &mut self,
        id: i64,
        address: &str,
        in_use: bool,
    ) -> Result<PaymentWallet, StoreError> {
        Ok(PaymentWallet::insert_tx(&mut self.tx, id, address, in_use).await?)
    }

    async fn release_wallets(&mut self, wallet_ids: &[i64]) -> Result<u64, StoreError> {
        Ok(PaymentWallet::release_many(self, wallet_ids).await?)
    }

    async fn insert_orders(
        &mut self,
        orders: &[NewPaymentOrder],
    ) -> Result<Vec<PaymentOrder>, StoreError> {
        Ok(PaymentOrder::insert_many_tx(&mut self.tx, orders).await?)
    }

    async fn lock_order(&mut self, id: i64) -> Result<Option<PaymentOrder>, StoreError> {
        Ok(PaymentOrder::lock_by_id_tx(&mut self.tx, id).await?)
    }

    async fn insert_payment_event(&mut self, event: &NewPaymentEvent) -> Result<bool, StoreError> {
        Ok(PaymentEventHistory::insert_tx(&mut self.tx, event).await?)
    }

    async fn apply_payment(&mut self, update: &OrderPaymentUpdate) -> Result<(), StoreError> {
        let actual = PaymentOrder::apply_payment_tx(&mut self.tx, update).await?;
        if actual != 1 {
            return Err(StoreError::RowCountMismatch {
                entity: "payment order",
                id: update.order_id,
                actual,
            });
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        Ok(TransactionProcessor::commit(self).await?)
    }
}
