//! In-process [`ChainClient`] driven by a script, for tests and dry runs.

use super::{ChainClient, ChainError};
use alloy::primitives::{Address, B256, LogData};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// Build an RPC log with the metadata the decoders require.
pub fn log_at(address: Address, data: LogData, block_number: u64, tx_hash: B256, log_index: u64) -> Log {
    Log {
        inner: alloy::primitives::Log { address, data },
        block_number: Some(block_number),
        transaction_hash: Some(tx_hash),
        log_index: Some(log_index),
        ..Default::default()
    }
}

#[derive(Debug, Default)]
struct Script {
    head: u64,
    logs: Vec<Log>,
    head_failures: usize,
    log_failures: usize,
    ignore_address_filter: bool,
    log_queries: Vec<(u64, u64)>,
}

/// Chain with a settable head and a fixed set of logs.
///
/// Log queries apply the address and block filters like a real node, and
/// the next N calls of either kind can be made to fail.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChainClient {
    script: Arc<Mutex<Script>>,
}

impl ScriptedChainClient {
    pub fn new(head: u64) -> Self {
        let client = Self::default();
        client.set_head(head);
        client
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_head(&self, head: u64) {
        self.script().head = head;
    }

    pub fn push_log(&self, log: Log) {
        self.script().logs.push(log);
    }

    pub fn fail_head_fetches(&self, count: usize) {
        self.script().head_failures = count;
    }

    pub fn fail_log_fetches(&self, count: usize) {
        self.script().log_failures = count;
    }

    /// Return logs of every contract, like a provider that ignores the
    /// address filter.
    pub fn ignore_address_filter(&self, ignore: bool) {
        self.script().ignore_address_filter = ignore;
    }

    /// Every `(from, to)` range requested so far, failed ones included.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.script().log_queries.clone()
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    async fn head_block_number(&self) -> Result<u64, ChainError> {
        let mut script = self.script();
        if script.head_failures > 0 {
            script.head_failures -= 1;
            return Err(ChainError::Scripted("head unavailable".to_string()));
        }
        Ok(script.head)
    }

    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let mut script = self.script();
        script.log_queries.push((from_block, to_block));
        if script.log_failures > 0 {
            script.log_failures -= 1;
            return Err(ChainError::Scripted("logs unavailable".to_string()));
        }
        let ignore_addresses = script.ignore_address_filter;
        Ok(script
            .logs
            .iter()
            .filter(|log| ignore_addresses || addresses.contains(&log.address()))
            .filter(|log| {
                log.block_number
                    .is_some_and(|b| b >= from_block && b <= to_block)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters_by_address_and_range() {
        let chain = ScriptedChainClient::new(50);
        let watched = Address::repeat_byte(0x01);
        chain.push_log(log_at(watched, LogData::default(), 10, B256::ZERO, 0));
        chain.push_log(log_at(watched, LogData::default(), 20, B256::ZERO, 0));
        chain.push_log(log_at(Address::repeat_byte(0x02), LogData::default(), 10, B256::ZERO, 1));

        let logs = chain.filter_logs(&[watched], 5, 15).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].block_number, Some(10));
        assert_eq!(chain.log_queries(), vec![(5, 15)]);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let chain = ScriptedChainClient::new(7);
        chain.fail_head_fetches(1);
        assert!(chain.head_block_number().await.is_err());
        assert_eq!(chain.head_block_number().await.unwrap(), 7);
    }
}
