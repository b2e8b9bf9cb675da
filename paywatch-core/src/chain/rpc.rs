use super::{ChainClient, ChainError};
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use url::Url;

/// [`ChainClient`] over a JSON-RPC provider.
#[derive(Debug, Clone)]
pub struct RpcChainClient<P> {
    provider: P,
}

impl RpcChainClient<DynProvider> {
    /// Plain HTTP provider without transaction fillers; the poller only reads.
    pub fn http(url: Url) -> Self {
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_http(url)
            .erased();
        Self { provider }
    }
}

impl<P: Provider> RpcChainClient<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> ChainClient for RpcChainClient<P>
where
    P: Provider + Send + Sync + 'static,
{
    async fn head_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        let filter = Filter::new()
            .address(addresses.to_vec())
            .from_block(from_block)
            .to_block(to_block);
        // Providers may ignore the address filter; the poller drops strays.
        let logs = self.provider.get_logs(&filter).await.inspect_err(|e| {
            tracing::error!(
                from_block,
                to_block,
                error = %e,
                "eth_getLogs failed"
            )
        })?;
        Ok(logs)
    }
}
