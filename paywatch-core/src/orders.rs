//! Order creation.
//!
//! A batch claims one deposit wallet per order and inserts the `Pending` rows
//! in a single transaction, then registers the orders with their networks'
//! working sets so the matcher sees them before any payment can arrive.

use crate::config::{ConfigStore, MatchingConfig, TokenContract};
use crate::entities::payment_order::{NewPaymentOrder, PaymentOrder};
use crate::entities::{ChainNetwork, TokenSymbol};
use crate::store::{PaymentStore, StoreError, StoreTransaction};
use crate::utils::time::utc_now;
use crate::wallet_pool::{WalletPool, WalletPoolError};
use crate::working_set::SharedWorkingSet;
use itertools::Itertools;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("request id must not be empty")]
    EmptyRequestId,

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("invalid webhook url: {0}")]
    InvalidWebhookUrl(#[from] url::ParseError),

    #[error("network {0} is not configured")]
    UnknownNetwork(ChainNetwork),

    #[error("token {symbol} is not configured on {network}")]
    UnsupportedToken {
        network: ChainNetwork,
        symbol: TokenSymbol,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("wallet pool error: {0}")]
    WalletPool(#[from] WalletPoolError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub request_id: String,
    pub network: ChainNetwork,
    pub symbol: TokenSymbol,
    pub amount: Decimal,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
struct NetworkEntry {
    tokens: Vec<TokenContract>,
    working_set: SharedWorkingSet,
}

#[derive(Clone)]
pub struct OrderService<S> {
    store: S,
    wallet_pool: WalletPool,
    matching: ConfigStore<MatchingConfig>,
    networks: Arc<HashMap<ChainNetwork, NetworkEntry>>,
}

impl<S: PaymentStore> OrderService<S> {
    pub fn new(store: S, wallet_pool: WalletPool, matching: ConfigStore<MatchingConfig>) -> Self {
        Self {
            store,
            wallet_pool,
            matching,
            networks: Arc::new(HashMap::new()),
        }
    }

    /// Accept orders for `network`. Must be called before the service is
    /// cloned into request handlers.
    pub fn with_network(
        mut self,
        network: ChainNetwork,
        tokens: Vec<TokenContract>,
        working_set: SharedWorkingSet,
    ) -> Self {
        Arc::make_mut(&mut self.networks).insert(
            network,
            NetworkEntry {
                tokens,
                working_set,
            },
        );
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn get_order(&self, request_id: &str) -> Result<Option<PaymentOrder>, OrderError> {
        Ok(self.store.get_order_by_request_id(request_id).await?)
    }

    /// Create a batch of orders. Known request ids return the existing order
    /// instead of creating a new one. The result follows the request order,
    /// with repeated request ids collapsed.
    pub async fn create_orders(
        &self,
        requests: Vec<CreateOrderRequest>,
    ) -> Result<Vec<PaymentOrder>, OrderError> {
        let mut seen = HashSet::new();
        let requests: Vec<CreateOrderRequest> = requests
            .into_iter()
            .filter(|r| seen.insert(r.request_id.clone()))
            .collect();
        for request in &requests {
            self.validate(request)?;
        }

        let order_of_ids: Vec<String> = requests.iter().map(|r| r.request_id.clone()).collect();
        let mut orders: HashMap<String, PaymentOrder> = HashMap::new();
        let mut pending = Vec::new();
        for request in requests {
            match self.store.get_order_by_request_id(&request.request_id).await? {
                Some(existing) => {
                    orders.insert(existing.request_id.clone(), existing);
                }
                None => pending.push(request),
            }
        }

        if !pending.is_empty() {
            match self.insert_with_wallets(&pending).await {
                Ok(inserted) => {
                    self.register(&inserted).await;
                    for order in inserted {
                        orders.insert(order.request_id.clone(), order);
                    }
                }
                // Another request created one of the request ids first.
                Err(OrderError::Store(e)) if e.is_duplicate() => {
                    warn!(error = %e, "Order creation raced, returning existing orders");
                    for request in &pending {
                        match self.store.get_order_by_request_id(&request.request_id).await? {
                            Some(existing) => {
                                orders.insert(existing.request_id.clone(), existing);
                            }
                            None => return Err(OrderError::Store(e)),
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(order_of_ids
            .iter()
            .filter_map(|id| orders.remove(id))
            .collect())
    }

    fn validate(&self, request: &CreateOrderRequest) -> Result<(), OrderError> {
        if request.request_id.trim().is_empty() {
            return Err(OrderError::EmptyRequestId);
        }
        if request.amount <= Decimal::ZERO {
            return Err(OrderError::InvalidAmount(request.amount));
        }
        if let Some(url) = &request.webhook_url {
            url::Url::parse(url)?;
        }
        let entry = self
            .networks
            .get(&request.network)
            .ok_or(OrderError::UnknownNetwork(request.network))?;
        if !entry.tokens.iter().any(|t| t.symbol == request.symbol) {
            return Err(OrderError::UnsupportedToken {
                network: request.network,
                symbol: request.symbol,
            });
        }
        Ok(())
    }

    /// Claim wallets and insert every order of the batch in one transaction,
    /// whatever networks it spans.
    async fn insert_with_wallets(
        &self,
        requests: &[CreateOrderRequest],
    ) -> Result<Vec<PaymentOrder>, OrderError> {
        let mut block_heights = HashMap::new();
        let networks: Vec<ChainNetwork> = requests.iter().map(|r| r.network).unique().collect();
        for network in networks {
            let height = self
                .store
                .get_block_cursor(network)
                .await?
                .map(|c| c.last_processed_block)
                .unwrap_or_default();
            block_heights.insert(network, height);
        }
        let expired_at = utc_now() + self.matching.read().await.order_expiry;

        // Dropping the transaction on error rolls back the wallet claims.
        let mut tx = self.store.begin().await?;
        let mut new_orders = Vec::with_capacity(requests.len());
        for request in requests {
            let wallet = self.wallet_pool.claim_first_available(&mut tx).await?;
            new_orders.push(NewPaymentOrder {
                request_id: request.request_id.clone(),
                wallet_id: wallet.id,
                amount_requested: request.amount,
                symbol: request.symbol,
                network: request.network,
                block_height: block_heights.get(&request.network).copied().unwrap_or_default(),
                webhook_url: request.webhook_url.clone(),
                expired_at,
            });
        }
        let inserted = tx.insert_orders(&new_orders).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Hand committed orders to their networks' working sets.
    async fn register(&self, inserted: &[PaymentOrder]) {
        for (network, orders) in inserted.iter().into_group_map_by(|o| o.network) {
            if let Some(entry) = self.networks.get(&network) {
                let mut working_set = entry.working_set.write().await;
                for order in &orders {
                    working_set.insert((*order).clone());
                }
            }
            info!(
                network = %network,
                count = orders.len(),
                "Created payment orders"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderStatus;
    use crate::store::MemoryPaymentStore;
    use crate::wallet_pool::tests::test_pool;
    use crate::working_set::WorkingSet;
    use alloy::primitives::Address;
    use std::time::Duration;

    fn service(store: &MemoryPaymentStore) -> (OrderService<MemoryPaymentStore>, SharedWorkingSet) {
        let working_set = WorkingSet::shared(ChainNetwork::Bsc, 10);
        let service = OrderService::new(
            store.clone(),
            test_pool(),
            ConfigStore::new(MatchingConfig {
                covering_factor: Decimal::from(2),
                order_expiry: Duration::from_secs(600),
                working_set_size: 10,
            }),
        )
        .with_network(
            ChainNetwork::Bsc,
            vec![TokenContract {
                symbol: TokenSymbol::Usdt,
                address: Address::repeat_byte(0x01),
                decimals: 18,
            }],
            working_set.clone(),
        );
        (service, working_set)
    }

    fn two_network_service(
        store: &MemoryPaymentStore,
    ) -> (OrderService<MemoryPaymentStore>, SharedWorkingSet, SharedWorkingSet) {
        let (service, bsc) = service(store);
        let avax = WorkingSet::shared(ChainNetwork::AvaxCChain, 10);
        let service = service.with_network(
            ChainNetwork::AvaxCChain,
            vec![TokenContract {
                symbol: TokenSymbol::Usdt,
                address: Address::repeat_byte(0x02),
                decimals: 6,
            }],
            avax.clone(),
        );
        (service, bsc, avax)
    }

    fn request(id: &str) -> CreateOrderRequest {
        CreateOrderRequest {
            request_id: id.to_string(),
            network: ChainNetwork::Bsc,
            symbol: TokenSymbol::Usdt,
            amount: Decimal::from(100),
            webhook_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_orders_claims_distinct_wallets() {
        let store = MemoryPaymentStore::new();
        store.save_block_cursor(ChainNetwork::Bsc, 500, 510).await.unwrap();
        let (service, working_set) = service(&store);

        let orders = service
            .create_orders(vec![request("a"), request("b")])
            .await
            .unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].request_id, "a");
        assert_ne!(orders[0].wallet_id, orders[1].wallet_id);
        assert!(orders.iter().all(|o| o.status == OrderStatus::Pending));
        assert!(orders.iter().all(|o| o.block_height == 500));
        assert_eq!(working_set.read().await.len(), 2);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_request_id() {
        let store = MemoryPaymentStore::new();
        let (service, _) = service(&store);

        let first = service.create_orders(vec![request("a")]).await.unwrap();
        let second = service
            .create_orders(vec![request("a"), request("a")])
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.orders().await.len(), 1);
        assert_eq!(store.count_wallets().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_wallets_free() {
        let store = MemoryPaymentStore::new();
        let (service, working_set) = service(&store);
        service.wallet_pool.initialize(&store, 1).await.unwrap();

        store.fail_order_inserts(true);
        let err = service.create_orders(vec![request("a")]).await.unwrap_err();
        assert!(matches!(err, OrderError::Store(StoreError::Database(_))));
        assert!(!store.wallet(1).await.unwrap().in_use);
        assert!(working_set.read().await.is_empty());

        store.fail_order_inserts(false);
        let orders = service.create_orders(vec![request("a")]).await.unwrap();
        assert_eq!(orders[0].wallet_id, 1);
    }

    #[tokio::test]
    async fn test_multi_network_batch_commits_together() {
        let store = MemoryPaymentStore::new();
        store.save_block_cursor(ChainNetwork::Bsc, 500, 510).await.unwrap();
        store.save_block_cursor(ChainNetwork::AvaxCChain, 70, 80).await.unwrap();
        let (service, bsc, avax) = two_network_service(&store);

        let mut b = request("b");
        b.network = ChainNetwork::AvaxCChain;
        let orders = service.create_orders(vec![request("a"), b]).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].block_height, 500);
        assert_eq!(orders[1].block_height, 70);
        assert_ne!(orders[0].wallet_id, orders[1].wallet_id);
        assert!(bsc.read().await.contains(orders[0].id));
        assert!(avax.read().await.contains(orders[1].id));
    }

    #[tokio::test]
    async fn test_failed_multi_network_batch_creates_nothing() {
        let store = MemoryPaymentStore::new();
        let (service, bsc, avax) = two_network_service(&store);
        service.wallet_pool.initialize(&store, 2).await.unwrap();

        store.fail_order_inserts(true);
        let mut b = request("b");
        b.network = ChainNetwork::AvaxCChain;
        let err = service.create_orders(vec![request("a"), b]).await.unwrap_err();
        assert!(matches!(err, OrderError::Store(StoreError::Database(_))));

        assert!(store.orders().await.is_empty());
        assert!(store.wallets().await.iter().all(|w| !w.in_use));
        assert!(bsc.read().await.is_empty());
        assert!(avax.read().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_never_share_a_wallet() {
        let store = MemoryPaymentStore::new();
        let (service, _, _) = two_network_service(&store);
        service.wallet_pool.initialize(&store, 1).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let service = service.clone();
            tasks.spawn(async move {
                let mut first = request(&format!("c{i}-a"));
                if i % 2 == 0 {
                    first.network = ChainNetwork::AvaxCChain;
                }
                service
                    .create_orders(vec![first, request(&format!("c{i}-b"))])
                    .await
            });
        }
        let mut created = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            created.extend(joined.unwrap().unwrap());
        }
        assert_eq!(created.len(), 16);

        let wallet_ids: HashSet<i64> = created.iter().map(|o| o.wallet_id).collect();
        assert_eq!(wallet_ids.len(), 16);
        assert!(wallet_ids.contains(&1));

        let stored = store.orders().await;
        let active: Vec<i64> = stored
            .iter()
            .filter(|o| o.status.is_active())
            .map(|o| o.wallet_id)
            .collect();
        assert_eq!(active.len(), active.iter().collect::<HashSet<_>>().len());
        for id in wallet_ids {
            assert!(store.wallet(id).await.unwrap().in_use);
        }
    }

    #[tokio::test]
    async fn test_validation() {
        let store = MemoryPaymentStore::new();
        let (service, _) = service(&store);

        let mut zero = request("z");
        zero.amount = Decimal::ZERO;
        assert!(matches!(
            service.create_orders(vec![zero]).await,
            Err(OrderError::InvalidAmount(_))
        ));

        let mut usdc = request("c");
        usdc.symbol = TokenSymbol::Usdc;
        assert!(matches!(
            service.create_orders(vec![usdc]).await,
            Err(OrderError::UnsupportedToken { .. })
        ));

        let mut avax = request("x");
        avax.network = ChainNetwork::AvaxCChain;
        assert!(matches!(
            service.create_orders(vec![avax]).await,
            Err(OrderError::UnknownNetwork(ChainNetwork::AvaxCChain))
        ));

        let mut hook = request("h");
        hook.webhook_url = Some("not a url".to_string());
        assert!(matches!(
            service.create_orders(vec![hook]).await,
            Err(OrderError::InvalidWebhookUrl(_))
        ));
        assert!(store.orders().await.is_empty());
    }
}
