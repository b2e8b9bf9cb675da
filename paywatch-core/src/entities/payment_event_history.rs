use crate::entities::{ChainNetwork, TokenSymbol};
use rust_decimal::Decimal;

/// Append-only record of a transfer credited to an order.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentEventHistory {
    pub id: i64,
    pub payment_order_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub from_address: String,
    pub to_address: String,
    pub contract_address: String,
    pub symbol: TokenSymbol,
    pub amount: Decimal,
    pub network: ChainNetwork,
    pub block_number: i64,
    pub created_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentEvent {
    pub payment_order_id: i64,
    pub tx_hash: String,
    pub log_index: i64,
    pub from_address: String,
    pub to_address: String,
    pub contract_address: String,
    pub symbol: TokenSymbol,
    pub amount: Decimal,
    pub network: ChainNetwork,
    pub block_number: i64,
}

impl PaymentEventHistory {
    /// Record a credited transfer.
    ///
    /// Returns `false` when the same log was already credited to the order,
    /// which makes redelivered logs a no-op.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        event: &NewPaymentEvent,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_event_histories
                (payment_order_id, tx_hash, log_index, from_address, to_address,
                 contract_address, symbol, amount, network, block_number)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (payment_order_id, tx_hash, log_index) DO NOTHING
            "#,
        )
        .bind(event.payment_order_id)
        .bind(&event.tx_hash)
        .bind(event.log_index)
        .bind(&event.from_address)
        .bind(&event.to_address)
        .bind(&event.contract_address)
        .bind(event.symbol)
        .bind(event.amount)
        .bind(event.network)
        .bind(event.block_number)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
