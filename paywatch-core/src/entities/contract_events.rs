//! History rows for the lock and membership contracts.
//!
//! Raw token amounts are kept as decimal strings of the on-chain integer and
//! cast to `NUMERIC` by Postgres, since they may exceed `Decimal`'s range.

use crate::entities::ChainNetwork;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "lock_event_kind")]
pub enum LockEventKind {
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEventRecord {
    pub network: ChainNetwork,
    pub contract_address: String,
    pub kind: LockEventKind,
    pub user_address: String,
    pub lock_id: i64,
    pub amount: String,
    pub current_balance: String,
    pub event_timestamp: i64,
    pub lock_duration: Option<i64>,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEventRecord {
    pub network: ChainNetwork,
    pub contract_address: String,
    pub user_address: String,
    pub order_id: i64,
    pub amount: String,
    pub duration_days: i32,
    pub tx_hash: String,
    pub log_index: i64,
    pub block_number: i64,
}

#[derive(Debug, Clone)]
pub struct InsertLockEvent {
    pub record: LockEventRecord,
}

impl Processor<InsertLockEvent> for DatabaseProcessor {
    /// `false` when the log was already recorded.
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertLockEvent")]
    async fn process(&self, insert: InsertLockEvent) -> Result<bool, sqlx::Error> {
        let r = insert.record;
        let result = sqlx::query(
            r#"
            INSERT INTO lock_events
                (network, contract_address, kind, user_address, lock_id, amount,
                 current_balance, event_timestamp, lock_duration, tx_hash, log_index, block_number)
            VALUES ($1, $2, $3, $4, $5, $6::numeric, $7::numeric, $8, $9, $10, $11, $12)
            ON CONFLICT (network, tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(r.network)
        .bind(r.contract_address)
        .bind(r.kind)
        .bind(r.user_address)
        .bind(r.lock_id)
        .bind(r.amount)
        .bind(r.current_balance)
        .bind(r.event_timestamp)
        .bind(r.lock_duration)
        .bind(r.tx_hash)
        .bind(r.log_index)
        .bind(r.block_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct InsertMembershipEvent {
    pub record: MembershipEventRecord,
}

impl Processor<InsertMembershipEvent> for DatabaseProcessor {
    /// `false` when the log was already recorded.
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertMembershipEvent")]
    async fn process(&self, insert: InsertMembershipEvent) -> Result<bool, sqlx::Error> {
        let r = insert.record;
        let result = sqlx::query(
            r#"
            INSERT INTO membership_events
                (network, contract_address, user_address, order_id, amount,
                 duration_days, tx_hash, log_index, block_number)
            VALUES ($1, $2, $3, $4, $5::numeric, $6, $7, $8, $9)
            ON CONFLICT (network, tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(r.network)
        .bind(r.contract_address)
        .bind(r.user_address)
        .bind(r.order_id)
        .bind(r.amount)
        .bind(r.duration_days)
        .bind(r.tx_hash)
        .bind(r.log_index)
        .bind(r.block_number)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
