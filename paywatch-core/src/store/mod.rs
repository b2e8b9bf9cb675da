//! Persistence seam for the core subsystems.
//!
//! Everything the poller, matcher, sweeper and wallet pool need from storage
//! goes through [`PaymentStore`] and [`StoreTransaction`]. Postgres is the
//! production backend ([`postgres::PgPaymentStore`]); [`memory::MemoryPaymentStore`]
//! keeps the same semantics in process for tests and local runs.

pub mod memory;
pub mod postgres;

use crate::entities::ChainNetwork;
use crate::entities::block_cursor::BlockCursor;
use crate::entities::contract_events::{LockEventRecord, MembershipEventRecord};
use crate::entities::payment_event_history::NewPaymentEvent;
use crate::entities::payment_order::{NewPaymentOrder, OrderPaymentUpdate, PaymentOrder};
use crate::entities::payment_wallet::PaymentWallet;
use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

pub use memory::MemoryPaymentStore;
pub use postgres::PgPaymentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(sqlx::Error),

    /// A unique constraint rejected the write.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A write that must touch exactly one row touched a different number.
    #[error("{entity} {id}: expected 1 row to change, {actual} changed")]
    RowCountMismatch {
        entity: &'static str,
        id: i64,
        actual: u64,
    },

    #[error("value out of range for storage: {0}")]
    OutOfRange(String),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Duplicate(db.constraint().unwrap_or("unique").to_string());
            }
        }
        StoreError::Database(e)
    }
}

/// Convert a block number to the signed column type.
pub fn block_to_db(block: u64) -> Result<i64, StoreError> {
    i64::try_from(block).map_err(|_| StoreError::OutOfRange(format!("block {block}")))
}

/// Query for refilling a working set.
#[derive(Debug, Clone)]
pub struct ActiveOrdersQuery {
    pub network: ChainNetwork,
    pub exclude_ids: Vec<i64>,
    pub expiring_after: PrimitiveDateTime,
    pub limit: usize,
}

/// Non-transactional operations plus the entry point for transactions.
#[async_trait]
pub trait PaymentStore: Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// Open a transaction. Dropping it without calling
    /// [`StoreTransaction::commit`] rolls everything back.
    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn get_block_cursor(
        &self,
        network: ChainNetwork,
    ) -> Result<Option<BlockCursor>, StoreError>;

    /// Persist scan progress. Values never move backwards.
    async fn save_block_cursor(
        &self,
        network: ChainNetwork,
        last_processed_block: u64,
        last_observed_head: u64,
    ) -> Result<(), StoreError>;

    async fn get_order(&self, id: i64) -> Result<Option<PaymentOrder>, StoreError>;

    async fn get_order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<PaymentOrder>, StoreError>;

    /// Active, unexpired orders, oldest expiry first.
    async fn list_active_orders(
        &self,
        query: ActiveOrdersQuery,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// `Expired` orders of `network`, lowest block height first.
    async fn list_expired_orders(
        &self,
        network: ChainNetwork,
        limit: usize,
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Set the given active orders to `Expired`. Returns the ids that changed.
    async fn mark_orders_expired(
        &self,
        ids: &[i64],
        block_height: i64,
    ) -> Result<Vec<i64>, StoreError>;

    /// Expire every active order whose deadline is before `now`.
    async fn expire_overdue_orders(&self, now: PrimitiveDateTime) -> Result<Vec<i64>, StoreError>;

    /// Fail expired orders whose deadline is before `expired_before` and free
    /// their wallets in the same transaction.
    async fn fail_expired_orders(
        &self,
        expired_before: PrimitiveDateTime,
    ) -> Result<Vec<i64>, StoreError>;

    async fn count_wallets(&self) -> Result<i64, StoreError>;

    async fn release_wallets(&self, wallet_ids: &[i64]) -> Result<u64, StoreError>;

    /// `false` when the log was already recorded.
    async fn record_lock_event(&self, record: &LockEventRecord) -> Result<bool, StoreError>;

    /// `false` when the log was already recorded.
    async fn record_membership_event(
        &self,
        record: &MembershipEventRecord,
    ) -> Result<bool, StoreError>;
}

/// Operations that must share one transaction.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock the lowest-id wallet with `in_use = false`.
    async fn lock_first_available_wallet(&mut self) -> Result<Option<PaymentWallet>, StoreError>;

    async fn mark_wallet_in_use(&mut self, wallet_id: i64) -> Result<(), StoreError>;

    /// Reserve the id the next created wallet will use.
    async fn next_wallet_id(&mut self) -> Result<i64, StoreError>;

    async fn insert_wallet(
        &mut self,
        id: i64,
        address: &str,
        in_use: bool,
    ) -> Result<PaymentWallet, StoreError>;

    async fn release_wallets(&mut self, wallet_ids: &[i64]) -> Result<u64, StoreError>;

    async fn insert_orders(
        &mut self,
        orders: &[NewPaymentOrder],
    ) -> Result<Vec<PaymentOrder>, StoreError>;

    /// Read an order and hold it against concurrent writers.
    async fn lock_order(&mut self, id: i64) -> Result<Option<PaymentOrder>, StoreError>;

    /// `false` when the same log was already credited to the order.
    async fn insert_payment_event(&mut self, event: &NewPaymentEvent) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::RowCountMismatch`] unless exactly one payable
    /// order was updated.
    async fn apply_payment(&mut self, update: &OrderPaymentUpdate) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}
