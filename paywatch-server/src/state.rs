//! Application state shared across all request handlers.

use paywatch_core::entities::ChainNetwork;
use paywatch_core::orders::OrderService;
use paywatch_core::store::PaymentStore;
use std::collections::HashSet;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState<S> {
    /// Order creation and lookup.
    pub orders: OrderService<S>,
    /// Networks with a running poller.
    pub networks: Arc<HashSet<ChainNetwork>>,
}

impl<S: PaymentStore + Clone> AppState<S> {
    pub fn new(orders: OrderService<S>, networks: impl IntoIterator<Item = ChainNetwork>) -> Self {
        Self {
            orders,
            networks: Arc::new(networks.into_iter().collect()),
        }
    }

    pub fn store(&self) -> &S {
        self.orders.store()
    }

    pub fn serves(&self, network: ChainNetwork) -> bool {
        self.networks.contains(&network)
    }
}
