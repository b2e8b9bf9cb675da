use crate::framework::{DatabaseAccessor, DatabaseProcessor};
use kanau::processor::Processor;

/// A deposit address handed out to at most one active order at a time.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct PaymentWallet {
    pub id: i64,
    pub address: String,
    pub in_use: bool,
    pub created_at: time::PrimitiveDateTime,
    pub updated_at: time::PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct CountPaymentWallets;

impl Processor<CountPaymentWallets> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountPaymentWallets")]
    async fn process(&self, _query: CountPaymentWallets) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payment_wallets")
            .fetch_one(&self.pool)
            .await
    }
}

impl PaymentWallet {
    /// Lock the lowest-id free wallet for the rest of the transaction.
    ///
    /// Rows held by a concurrent claimer are skipped so the caller moves on
    /// to the next free wallet instead of observing an empty pool.
    pub async fn lock_first_available_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<Option<PaymentWallet>, sqlx::Error> {
        sqlx::query_as::<_, PaymentWallet>(
            r#"
            SELECT id, address, in_use, created_at, updated_at
            FROM payment_wallets
            WHERE in_use = FALSE
            ORDER BY id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn mark_in_use_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        wallet_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payment_wallets
            SET in_use = TRUE, updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE id = $1
            "#,
        )
        .bind(wallet_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Reserve the next wallet id from the table's sequence.
    pub async fn next_id_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT nextval(pg_get_serial_sequence('payment_wallets', 'id'))",
        )
        .fetch_one(&mut **tx)
        .await
    }

    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: i64,
        address: &str,
        in_use: bool,
    ) -> Result<PaymentWallet, sqlx::Error> {
        sqlx::query_as::<_, PaymentWallet>(
            r#"
            INSERT INTO payment_wallets (id, address, in_use)
            VALUES ($1, $2, $3)
            RETURNING id, address, in_use, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(address)
        .bind(in_use)
        .fetch_one(&mut **tx)
        .await
    }

    /// Flip `in_use` back to false for every given wallet.
    pub async fn release_many(
        db: &mut impl DatabaseAccessor,
        wallet_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if wallet_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE payment_wallets
            SET in_use = FALSE, updated_at = (NOW() AT TIME ZONE 'utc')
            WHERE id = ANY($1)
            "#,
        )
        .bind(wallet_ids)
        .execute(db.acquire())
        .await?;
        Ok(result.rows_affected())
    }
}
