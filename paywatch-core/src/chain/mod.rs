//! Chain access used by the poller.
//!
//! The poller only needs the current head and a ranged log query, so that is
//! all [`ChainClient`] exposes.

pub mod rpc;
#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use rpc::RpcChainClient;
#[cfg(any(test, feature = "testing"))]
pub use scripted::ScriptedChainClient;

use alloy::primitives::Address;
use alloy::rpc::types::Log;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(#[from] alloy::transports::TransportError),

    /// Failure injected by a scripted test chain.
    #[cfg(any(test, feature = "testing"))]
    #[error("scripted failure: {0}")]
    Scripted(String),
}

#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    async fn head_block_number(&self) -> Result<u64, ChainError>;

    /// Logs emitted by any of `addresses` in `[from_block, to_block]`.
    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError>;
}
