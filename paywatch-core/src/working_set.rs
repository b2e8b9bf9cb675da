//! In-memory mirror of the active orders of one network.
//!
//! The matcher only ever searches this set. The store stays the source of
//! truth: every change here happens after the corresponding commit, and the
//! set can be rebuilt from the store at any time.

use crate::entities::payment_order::PaymentOrder;
use crate::entities::{ChainNetwork, OrderStatus, TokenSymbol};
use alloy::primitives::Address;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use time::PrimitiveDateTime;
use tokio::sync::RwLock;

pub type SharedWorkingSet = Arc<RwLock<WorkingSet>>;

/// Bucket key: lowercased deposit address and token.
type BucketKey = (String, TokenSymbol);

fn bucket_key(address: &str, symbol: TokenSymbol) -> BucketKey {
    (address.to_ascii_lowercase(), symbol)
}

#[derive(Debug)]
pub struct WorkingSet {
    network: ChainNetwork,
    capacity: usize,
    orders: HashMap<i64, PaymentOrder>,
    buckets: HashMap<BucketKey, Vec<i64>>,
}

impl WorkingSet {
    pub fn new(network: ChainNetwork, capacity: usize) -> Self {
        Self {
            network,
            capacity,
            orders: HashMap::new(),
            buckets: HashMap::new(),
        }
    }

    pub fn shared(network: ChainNetwork, capacity: usize) -> SharedWorkingSet {
        Arc::new(RwLock::new(Self::new(network, capacity)))
    }

    pub fn network(&self) -> ChainNetwork {
        self.network
    }

    /// Target size used when refilling. Inserts are never refused, so the
    /// set may temporarily hold more.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// How many orders a refill should load.
    pub fn deficit(&self) -> usize {
        self.capacity.saturating_sub(self.orders.len())
    }

    pub fn contains(&self, id: i64) -> bool {
        self.orders.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&PaymentOrder> {
        self.orders.get(&id)
    }

    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.orders.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn orders(&self) -> impl Iterator<Item = &PaymentOrder> {
        self.orders.values()
    }

    /// Insert or replace an order snapshot. Orders of another network are
    /// ignored and `false` is returned.
    pub fn insert(&mut self, order: PaymentOrder) -> bool {
        if order.network != self.network {
            return false;
        }
        let id = order.id;
        let key = bucket_key(&order.wallet_address, order.symbol);
        if self.orders.insert(id, order).is_none() {
            self.buckets.entry(key).or_default().push(id);
        }
        true
    }

    pub fn remove(&mut self, id: i64) -> Option<PaymentOrder> {
        let order = self.orders.remove(&id)?;
        let key = bucket_key(&order.wallet_address, order.symbol);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|entry| *entry != id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(order)
    }

    /// Active orders paid to `to` in `symbol`.
    pub fn candidates(&self, to: &Address, symbol: TokenSymbol) -> Vec<PaymentOrder> {
        let key = (format!("{to:#x}"), symbol);
        self.buckets
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|id| self.orders.get(id))
            .filter(|order| order.status.is_active())
            .cloned()
            .collect()
    }

    /// Mirror a committed payment into the snapshot.
    pub fn apply_payment(
        &mut self,
        id: i64,
        status: OrderStatus,
        amount_transferred: Decimal,
        block_height: i64,
        succeeded_at: Option<PrimitiveDateTime>,
    ) -> bool {
        let Some(order) = self.orders.get_mut(&id) else {
            return false;
        };
        order.status = status;
        order.amount_transferred = amount_transferred;
        order.block_height = order.block_height.max(block_height);
        if succeeded_at.is_some() {
            order.succeeded_at = succeeded_at;
        }
        true
    }
}
