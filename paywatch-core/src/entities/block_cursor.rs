use crate::entities::ChainNetwork;
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;

/// Durable scan progress for one network.
///
/// `last_processed_block` is the highest block whose logs have been fully
/// fetched and dispatched; scanning resumes at the block after it.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct BlockCursor {
    pub network: ChainNetwork,
    pub last_processed_block: i64,
    pub last_observed_head: i64,
    pub updated_at: time::PrimitiveDateTime,
}

impl BlockCursor {
    /// The first block the poller should scan when resuming.
    pub fn next_block(&self) -> u64 {
        u64::try_from(self.last_processed_block).unwrap_or(0) + 1
    }
}

#[derive(Debug, Clone)]
pub struct GetBlockCursor {
    pub network: ChainNetwork,
}

impl Processor<GetBlockCursor> for DatabaseProcessor {
    type Output = Option<BlockCursor>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetBlockCursor")]
    async fn process(&self, query: GetBlockCursor) -> Result<Option<BlockCursor>, sqlx::Error> {
        sqlx::query_as::<_, BlockCursor>(
            r#"
            SELECT network, last_processed_block, last_observed_head, updated_at
            FROM block_states
            WHERE network = $1
            "#,
        )
        .bind(query.network)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Upsert the cursor for a network.
///
/// Both columns only ever move forward: a stale writer cannot rewind the
/// cursor below a value another writer already persisted.
pub struct SaveBlockCursor {
    pub network: ChainNetwork,
    pub last_processed_block: i64,
    pub last_observed_head: i64,
}

impl Processor<SaveBlockCursor> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:SaveBlockCursor")]
    async fn process(&self, cmd: SaveBlockCursor) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO block_states (network, last_processed_block, last_observed_head)
            VALUES ($1, $2, GREATEST($2, $3))
            ON CONFLICT (network) DO UPDATE SET
                last_processed_block = GREATEST(block_states.last_processed_block, EXCLUDED.last_processed_block),
                last_observed_head = GREATEST(block_states.last_observed_head, EXCLUDED.last_observed_head),
                updated_at = (NOW() AT TIME ZONE 'utc')
            "#,
        )
        .bind(cmd.network)
        .bind(cmd.last_processed_block)
        .bind(cmd.last_observed_head)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_block_resumes_after_last_processed() {
        let cursor = BlockCursor {
            network: ChainNetwork::Bsc,
            last_processed_block: 105,
            last_observed_head: 110,
            updated_at: crate::utils::time::utc_now(),
        };
        assert_eq!(cursor.next_block(), 106);
    }
}
