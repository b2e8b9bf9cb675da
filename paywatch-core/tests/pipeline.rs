//! Poller -> matcher -> sweeper, end to end against the in-memory store and
//! a fixed chain.

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use paywatch_core::cache::CachedPaymentStore;
use paywatch_core::chain::{ChainClient, ChainError};
use paywatch_core::config::{ConfigStore, MatchingConfig, PollerConfig, TokenContract};
use paywatch_core::decoders::abi::Transfer;
use paywatch_core::decoders::{Erc20TransferDecoder, HandlerRegistry};
use paywatch_core::entities::{ChainNetwork, OrderStatus, TokenSymbol};
use paywatch_core::events::{chain_event_channel, order_status_channel};
use paywatch_core::orders::{CreateOrderRequest, OrderService};
use paywatch_core::processors::{
    ChainPoller, EventConsumer, ExpirySweeper, PaymentMatcher, PollOutcome, SweepOutcome,
};
use paywatch_core::store::{MemoryPaymentStore, PaymentStore};
use paywatch_core::wallet_pool::{WalletDeriver, WalletPool};
use paywatch_core::working_set::WorkingSet;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const USDT: Address = Address::repeat_byte(0x55);
const PHRASE: &str = "test test test test test test test test test test test junk";

/// Chain with a fixed head and log set.
#[derive(Clone)]
struct FixedChain {
    head: u64,
    logs: Vec<Log>,
}

#[async_trait]
impl ChainClient for FixedChain {
    async fn head_block_number(&self) -> Result<u64, ChainError> {
        Ok(self.head)
    }

    async fn filter_logs(
        &self,
        addresses: &[Address],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainError> {
        Ok(self
            .logs
            .iter()
            .filter(|log| addresses.contains(&log.address()))
            .filter(|log| log.block_number.is_some_and(|b| (from_block..=to_block).contains(&b)))
            .cloned()
            .collect())
    }
}

fn usdt_log(to: Address, whole_tokens: u64, block: u64, tx: u8) -> Log {
    let data = Transfer {
        from: Address::repeat_byte(0xf0),
        to,
        value: U256::from(whole_tokens) * U256::from(1_000_000u64),
    }
    .encode_log_data();
    Log {
        inner: alloy::primitives::Log { address: USDT, data },
        block_number: Some(block),
        transaction_hash: Some(B256::repeat_byte(tx)),
        log_index: Some(0),
        ..Default::default()
    }
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
async fn test_payment_flows_from_chain_to_released_wallet() {
    let memory = MemoryPaymentStore::new();
    let store = CachedPaymentStore::new(memory.clone());
    let matching = ConfigStore::new(MatchingConfig {
        covering_factor: Decimal::from(2),
        order_expiry: Duration::from_secs(900),
        working_set_size: 10,
    });
    let working_set = WorkingSet::shared(ChainNetwork::Bsc, 10);
    let pool = WalletPool::new(WalletDeriver::new(PHRASE, "", "payment", "salt"));
    let orders = OrderService::new(store.clone(), pool, matching.clone()).with_network(
        ChainNetwork::Bsc,
        vec![TokenContract {
            symbol: TokenSymbol::Usdt,
            address: USDT,
            decimals: 6,
        }],
        working_set.clone(),
    );

    store.save_block_cursor(ChainNetwork::Bsc, 99, 99).await.unwrap();
    let order = orders.create_orders(vec![request("a")]).await.unwrap().remove(0);
    assert_eq!(order.block_height, 99);
    let deposit: Address = order.wallet_address.parse().unwrap();

    let chain = FixedChain {
        head: 105,
        logs: vec![
            usdt_log(deposit, 60, 101, 1),
            usdt_log(Address::repeat_byte(0x77), 500, 102, 2),
            usdt_log(deposit, 38, 104, 3),
        ],
    };

    let registry = HandlerRegistry::builder()
        .register(
            USDT,
            Erc20TransferDecoder::new(ChainNetwork::Bsc, TokenSymbol::Usdt, 6),
        )
        .unwrap()
        .build();
    let (event_tx, mut event_rx) = chain_event_channel(16);
    let (status_tx, mut status_rx) = order_status_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poller = ChainPoller::new(
        ChainNetwork::Bsc,
        chain.clone(),
        store.clone(),
        Arc::new(registry),
        PollerConfig::default(),
        event_tx,
        shutdown_rx.clone(),
    );
    let matcher = PaymentMatcher::new(
        store.clone(),
        working_set.clone(),
        matching.clone(),
        status_tx.clone(),
    );
    let (_unused_tx, unused_rx) = chain_event_channel(1);
    let consumer = EventConsumer::new(
        ChainNetwork::Bsc,
        store.clone(),
        matcher,
        unused_rx,
        shutdown_rx,
    );

    let outcome = poller.poll_once().await;
    assert!(matches!(
        outcome,
        PollOutcome::Scanned { from: 100, to: 105, events: 3, skipped_chunks: 0 }
    ));

    // First payment, delivered twice.
    let first = event_rx.try_recv().unwrap();
    consumer.handle(first.clone()).await;
    consumer.handle(first).await;
    let partial = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(partial.status, OrderStatus::Partial);
    assert_eq!(partial.amount_transferred, Decimal::from(60));

    // Unrelated transfer, then the top-up reaching the 98 threshold.
    while let Ok(event) = event_rx.try_recv() {
        consumer.handle(event).await;
    }
    let paid = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(paid.status, OrderStatus::Success);
    assert_eq!(paid.amount_transferred, Decimal::from(98));
    assert_eq!(paid.block_height, 104);
    assert!(!memory.wallet(order.wallet_id).await.unwrap().in_use);
    assert_eq!(memory.payment_events().await.len(), 2);

    let notified = status_rx.try_recv().unwrap();
    assert_eq!(notified.order_id, order.id);
    assert_eq!(notified.status, OrderStatus::Success);

    let cursor = store.get_block_cursor(ChainNetwork::Bsc).await.unwrap().unwrap();
    assert_eq!(cursor.next_block(), 106);

    // The sweeper drops the finished order without touching it.
    let sweeper = ExpirySweeper::new(ChainNetwork::Bsc, store.clone(), working_set.clone(), status_tx);
    let SweepOutcome::Completed(report) = sweeper.sweep().await.unwrap() else {
        panic!("sweep was skipped");
    };
    assert_eq!(report.removed, vec![order.id]);
    assert!(report.expired.is_empty());
    assert!(working_set.read().await.is_empty());
    assert!(status_rx.try_recv().is_err());

    // The freed wallet goes to the next order.
    let next = orders.create_orders(vec![request("b")]).await.unwrap().remove(0);
    assert_eq!(next.wallet_id, order.wallet_id);
    assert_eq!(next.wallet_address, order.wallet_address);
    assert_eq!(next.block_height, 105);
}

#[tokio::test]
async fn test_overdue_order_expires_and_frees_slot() {
    let store = MemoryPaymentStore::new();
    let matching = ConfigStore::new(MatchingConfig::default());
    let working_set = WorkingSet::shared(ChainNetwork::Bsc, 1);
    let pool = WalletPool::new(WalletDeriver::new(PHRASE, "", "payment", "salt"));
    let orders = OrderService::new(store.clone(), pool, matching).with_network(
        ChainNetwork::Bsc,
        vec![TokenContract {
            symbol: TokenSymbol::Usdt,
            address: USDT,
            decimals: 6,
        }],
        working_set.clone(),
    );

    let created = orders
        .create_orders(vec![request("late"), request("waiting")])
        .await
        .unwrap();
    let (late, waiting) = (created[0].clone(), created[1].clone());
    store
        .set_order_expiry(late.id, paywatch_core::utils::time::utc_now() - time::Duration::seconds(5))
        .await;
    {
        // Keep only the overdue order in the set, with its updated deadline.
        let mut set = working_set.write().await;
        set.remove(waiting.id);
        set.insert(store.get_order(late.id).await.unwrap().unwrap());
    }

    let (status_tx, mut status_rx) = order_status_channel();
    let sweeper = ExpirySweeper::new(ChainNetwork::Bsc, store.clone(), working_set.clone(), status_tx);
    let SweepOutcome::Completed(report) = sweeper.sweep().await.unwrap() else {
        panic!("sweep was skipped");
    };

    assert_eq!(report.expired, vec![late.id]);
    assert_eq!(report.loaded, 1);
    assert_eq!(working_set.read().await.ids(), vec![waiting.id]);
    let expired = store.get_order(late.id).await.unwrap().unwrap();
    assert_eq!(expired.status, OrderStatus::Expired);
    assert_eq!(status_rx.try_recv().unwrap().status, OrderStatus::Expired);
}
