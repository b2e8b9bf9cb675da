pub mod block_cursor;
pub mod contract_events;
pub mod payment_event_history;
pub mod payment_order;
pub mod payment_wallet;

use paywatch_sdk::objects::{
    Network as SdkNetwork, PaymentOrderStatus as SdkOrderStatus, Token as SdkToken,
};

/// Network name for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `paywatch_sdk::objects::Network`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "chain_network")]
pub enum ChainNetwork {
    Bsc,
    AvaxCChain,
}

impl std::fmt::Display for ChainNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkNetwork::from(*self).fmt(f)
    }
}

impl From<ChainNetwork> for SdkNetwork {
    fn from(value: ChainNetwork) -> Self {
        match value {
            ChainNetwork::Bsc => SdkNetwork::Bsc,
            ChainNetwork::AvaxCChain => SdkNetwork::AvaxCChain,
        }
    }
}

impl From<SdkNetwork> for ChainNetwork {
    fn from(value: SdkNetwork) -> Self {
        match value {
            SdkNetwork::Bsc => ChainNetwork::Bsc,
            SdkNetwork::AvaxCChain => ChainNetwork::AvaxCChain,
        }
    }
}

/// Token symbol for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `paywatch_sdk::objects::Token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "token_symbol")]
pub enum TokenSymbol {
    Usdt,
    Usdc,
}

impl std::fmt::Display for TokenSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkToken::from(*self).fmt(f)
    }
}

impl From<TokenSymbol> for SdkToken {
    fn from(value: TokenSymbol) -> Self {
        match value {
            TokenSymbol::Usdt => SdkToken::Usdt,
            TokenSymbol::Usdc => SdkToken::Usdc,
        }
    }
}

impl From<SdkToken> for TokenSymbol {
    fn from(value: SdkToken) -> Self {
        match value {
            SdkToken::Usdt => TokenSymbol::Usdt,
            SdkToken::Usdc => TokenSymbol::Usdc,
        }
    }
}

/// Payment order status for database operations.
///
/// `Pending` and `Partial` are the active states; an order in any other
/// state is never matched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "payment_order_status")]
pub enum OrderStatus {
    Pending,
    Partial,
    Success,
    Expired,
    Failed,
}

impl OrderStatus {
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Partial)
    }

    /// A transfer can still be credited. Expired orders keep their wallet
    /// until they fail, so late payments are accepted.
    pub fn is_payable(self) -> bool {
        self.is_active() || self == OrderStatus::Expired
    }
}

impl From<OrderStatus> for SdkOrderStatus {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::Pending => SdkOrderStatus::Pending,
            OrderStatus::Partial => SdkOrderStatus::Partial,
            OrderStatus::Success => SdkOrderStatus::Success,
            OrderStatus::Expired => SdkOrderStatus::Expired,
            OrderStatus::Failed => SdkOrderStatus::Failed,
        }
    }
}

impl From<SdkOrderStatus> for OrderStatus {
    fn from(value: SdkOrderStatus) -> Self {
        match value {
            SdkOrderStatus::Pending => OrderStatus::Pending,
            SdkOrderStatus::Partial => OrderStatus::Partial,
            SdkOrderStatus::Success => OrderStatus::Success,
            SdkOrderStatus::Expired => OrderStatus::Expired,
            SdkOrderStatus::Failed => OrderStatus::Failed,
        }
    }
}
