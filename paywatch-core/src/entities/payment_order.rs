use crate::entities::{ChainNetwork, OrderStatus, TokenSymbol};
use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::PrimitiveDateTime;

/// Column list shared by every order read; the deposit address is joined in
/// from the wallet row.
const ORDER_SELECT: &str = r#"
    SELECT
        o.id, o.request_id, o.wallet_id, w.address AS wallet_address,
        o.amount_requested, o.amount_transferred, o.symbol, o.network, o.status,
        o.block_height, o.webhook_url, o.expired_at, o.succeeded_at,
        o.created_at, o.updated_at
    FROM payment_orders o
    JOIN payment_wallets w ON w.id = o.wallet_id
"#;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentOrder {
    pub id: i64,
    pub request_id: String,
    pub wallet_id: i64,
    pub wallet_address: String,
    pub amount_requested: Decimal,
    pub amount_transferred: Decimal,
    pub symbol: TokenSymbol,
    pub network: ChainNetwork,
    pub status: OrderStatus,
    pub block_height: i64,
    pub webhook_url: Option<String>,
    pub expired_at: PrimitiveDateTime,
    pub succeeded_at: Option<PrimitiveDateTime>,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

/// Data for inserting a new order. Orders always start `Pending` with
/// nothing transferred.
#[derive(Debug, Clone)]
pub struct NewPaymentOrder {
    pub request_id: String,
    pub wallet_id: i64,
    pub amount_requested: Decimal,
    pub symbol: TokenSymbol,
    pub network: ChainNetwork,
    pub block_height: i64,
    pub webhook_url: Option<String>,
    pub expired_at: PrimitiveDateTime,
}

/// Result of applying one transfer to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPaymentUpdate {
    pub order_id: i64,
    pub status: OrderStatus,
    pub amount_transferred: Decimal,
    pub block_height: i64,
    pub succeeded_at: Option<PrimitiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct GetPaymentOrderById {
    pub id: i64,
}

impl Processor<GetPaymentOrderById> for DatabaseProcessor {
    type Output = Option<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentOrderById")]
    async fn process(&self, query: GetPaymentOrderById) -> Result<Option<PaymentOrder>, sqlx::Error> {
        let sql = format!("{ORDER_SELECT} WHERE o.id = $1");
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(query.id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentOrderByRequestId {
    pub request_id: String,
}

impl Processor<GetPaymentOrderByRequestId> for DatabaseProcessor {
    type Output = Option<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentOrderByRequestId")]
    async fn process(
        &self,
        query: GetPaymentOrderByRequestId,
    ) -> Result<Option<PaymentOrder>, sqlx::Error> {
        let sql = format!("{ORDER_SELECT} WHERE o.request_id = $1");
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(query.request_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Active, unexpired orders of one network, oldest expiry first.
///
/// Orders already held in memory are passed in `exclude_ids` so a refill
/// only returns new entries.
pub struct ListActivePaymentOrders {
    pub network: ChainNetwork,
    pub exclude_ids: Vec<i64>,
    pub expiring_after: PrimitiveDateTime,
    pub limit: i64,
}

impl Processor<ListActivePaymentOrders> for DatabaseProcessor {
    type Output = Vec<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListActivePaymentOrders")]
    async fn process(
        &self,
        query: ListActivePaymentOrders,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let sql = format!(
            "{ORDER_SELECT}
            WHERE o.network = $1
              AND o.status IN ('pending', 'partial')
              AND o.expired_at > $2
              AND NOT (o.id = ANY($3))
            ORDER BY o.expired_at ASC, o.id ASC
            LIMIT $4"
        );
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(query.network)
            .bind(query.expiring_after)
            .bind(query.exclude_ids)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Expired orders of one network that still hold their wallet, lowest block
/// height first.
pub struct ListExpiredPaymentOrders {
    pub network: ChainNetwork,
    pub limit: i64,
}

impl Processor<ListExpiredPaymentOrders> for DatabaseProcessor {
    type Output = Vec<PaymentOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListExpiredPaymentOrders")]
    async fn process(
        &self,
        query: ListExpiredPaymentOrders,
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        let sql = format!(
            "{ORDER_SELECT}
            WHERE o.network = $1 AND o.status = 'expired'
            ORDER BY o.block_height ASC, o.id ASC
            LIMIT $2"
        );
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(query.network)
            .bind(query.limit)
            .fetch_all(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Batch-expire the given orders.
///
/// Only rows that are still active are touched, so an order that reached
/// `Success` concurrently keeps its status. Returns the ids actually expired.
pub struct MarkPaymentOrdersExpired {
    pub ids: Vec<i64>,
    pub block_height: i64,
}

impl Processor<MarkPaymentOrdersExpired> for DatabaseProcessor {
    type Output = Vec<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:MarkPaymentOrdersExpired")]
    async fn process(&self, cmd: MarkPaymentOrdersExpired) -> Result<Vec<i64>, sqlx::Error> {
        if cmd.ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE payment_orders
            SET status = 'expired',
                block_height = GREATEST(block_height, $2),
                updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE id = ANY($1) AND status IN ('pending', 'partial')
            RETURNING id
            "#,
        )
        .bind(cmd.ids)
        .bind(cmd.block_height)
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Expire every active order whose deadline has passed, whether or not it
/// is held in a working set.
pub struct ExpireOverduePaymentOrders {
    pub now: PrimitiveDateTime,
}

impl Processor<ExpireOverduePaymentOrders> for DatabaseProcessor {
    type Output = Vec<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ExpireOverduePaymentOrders")]
    async fn process(&self, cmd: ExpireOverduePaymentOrders) -> Result<Vec<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE payment_orders
            SET status = 'expired', updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE status IN ('pending', 'partial') AND expired_at < $1
            RETURNING id
            "#,
        )
        .bind(cmd.now)
        .fetch_all(&self.pool)
        .await
    }
}

impl PaymentOrder {
    /// Insert orders and read them back with their deposit addresses.
    pub async fn insert_many_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        orders: &[NewPaymentOrder],
    ) -> Result<Vec<PaymentOrder>, sqlx::Error> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO payment_orders \
            (request_id, wallet_id, amount_requested, symbol, network, block_height, webhook_url, expired_at) ",
        );
        query_builder.push_values(orders, |mut b, order| {
            b.push_bind(order.request_id.clone())
                .push_bind(order.wallet_id)
                .push_bind(order.amount_requested)
                .push_bind(order.symbol)
                .push_bind(order.network)
                .push_bind(order.block_height)
                .push_bind(order.webhook_url.clone())
                .push_bind(order.expired_at);
        });
        query_builder.push(" RETURNING id");

        let ids: Vec<i64> = query_builder
            .build_query_scalar()
            .fetch_all(&mut **tx)
            .await?;

        let sql = format!("{ORDER_SELECT} WHERE o.id = ANY($1) ORDER BY o.id");
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(ids)
            .fetch_all(&mut **tx)
            .await
    }

    /// Read an order and hold its row lock until the transaction ends.
    pub async fn lock_by_id_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: i64,
    ) -> Result<Option<PaymentOrder>, sqlx::Error> {
        let sql = format!("{ORDER_SELECT} WHERE o.id = $1 FOR UPDATE OF o");
        sqlx::query_as::<_, PaymentOrder>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Persist a payment classification. Returns the number of rows updated,
    /// which is zero when the order can no longer be paid.
    pub async fn apply_payment_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        update: &OrderPaymentUpdate,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payment_orders
            SET status = $2,
                amount_transferred = $3,
                block_height = GREATEST(block_height, $4),
                succeeded_at = COALESCE($5, succeeded_at),
                updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE id = $1 AND status IN ('pending', 'partial', 'expired')
            "#,
        )
        .bind(update.order_id)
        .bind(update.status)
        .bind(update.amount_transferred)
        .bind(update.block_height)
        .bind(update.succeeded_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Move expired orders past the grace cutoff to `Failed`, returning
    /// `(order_id, wallet_id)` pairs so the caller can free the wallets.
    pub async fn fail_expired(
        db: &mut impl DatabaseAccessor,
        expired_before: PrimitiveDateTime,
    ) -> Result<Vec<(i64, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            UPDATE payment_orders
            SET status = 'failed', updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE status = 'expired' AND expired_at < $1
            RETURNING id, wallet_id
            "#,
        )
        .bind(expired_before)
        .fetch_all(db.acquire())
        .await
    }
}
