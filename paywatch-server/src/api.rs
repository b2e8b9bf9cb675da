//! HTTP handlers.
//!
//! # Endpoints
//!
//! - `POST /payment-orders`                  – create a batch of orders
//! - `GET  /payment-orders/{request_id}`     – order snapshot
//! - `GET  /networks/{network}/block-state`  – scan progress of a network

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use paywatch_core::entities::ChainNetwork;
use paywatch_core::entities::payment_order::PaymentOrder;
use paywatch_core::orders::{CreateOrderRequest, OrderError};
use paywatch_core::store::{PaymentStore, StoreError};
use paywatch_core::utils::time::unix_timestamp;
use paywatch_sdk::objects::{
    BlockStateResponse, CreatePaymentOrders, Network, PaymentOrderResponse,
};

use crate::state::AppState;

pub fn router<S: PaymentStore + Clone>() -> Router<AppState<S>> {
    Router::new()
        .route("/payment-orders", post(create_payment_orders::<S>))
        .route("/payment-orders/{request_id}", get(get_payment_order::<S>))
        .route("/networks/{network}/block-state", get(get_block_state::<S>))
}

fn to_response(order: &PaymentOrder) -> PaymentOrderResponse {
    PaymentOrderResponse {
        id: order.id,
        request_id: order.request_id.clone(),
        network: order.network.into(),
        symbol: order.symbol.into(),
        payment_address: order.wallet_address.clone(),
        amount: order.amount_requested,
        transferred: order.amount_transferred,
        status: order.status.into(),
        block_height: order.block_height,
        expired_at: unix_timestamp(order.expired_at),
        succeeded_at: order.succeeded_at.map(unix_timestamp),
    }
}

/// `POST /payment-orders`: create orders, returning existing ones for
/// request ids that were seen before.
pub async fn create_payment_orders<S: PaymentStore + Clone>(
    State(state): State<AppState<S>>,
    Json(payload): Json<CreatePaymentOrders>,
) -> Result<(StatusCode, Json<Vec<PaymentOrderResponse>>), ApiError> {
    if payload.orders.is_empty() {
        return Err(ApiError::BadRequest("no orders in request".to_string()));
    }
    let requests = payload
        .orders
        .into_iter()
        .map(|o| CreateOrderRequest {
            request_id: o.request_id,
            network: o.network.into(),
            symbol: o.symbol.into(),
            amount: o.amount,
            webhook_url: o.webhook_url,
        })
        .collect();

    let orders = state.orders.create_orders(requests).await?;
    Ok((
        StatusCode::CREATED,
        Json(orders.iter().map(to_response).collect()),
    ))
}

/// `GET /payment-orders/{request_id}`
pub async fn get_payment_order<S: PaymentStore + Clone>(
    State(state): State<AppState<S>>,
    Path(request_id): Path<String>,
) -> Result<Json<PaymentOrderResponse>, ApiError> {
    let order = state
        .orders
        .get_order(&request_id)
        .await?
        .ok_or(ApiError::NotFound("order not found"))?;
    Ok(Json(to_response(&order)))
}

/// `GET /networks/{network}/block-state`
pub async fn get_block_state<S: PaymentStore + Clone>(
    State(state): State<AppState<S>>,
    Path(network): Path<Network>,
) -> Result<Json<BlockStateResponse>, ApiError> {
    let chain = ChainNetwork::from(network);
    if !state.serves(chain) {
        return Err(ApiError::NotFound("network not configured"));
    }
    let cursor = state
        .store()
        .get_block_cursor(chain)
        .await?
        .ok_or(ApiError::NotFound("network has not been scanned yet"))?;
    Ok(Json(BlockStateResponse {
        network,
        last_processed_block: cursor.last_processed_block,
        last_observed_head: cursor.last_observed_head,
    }))
}

/// Errors that can occur in API handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Store(e) => e.into(),
            OrderError::WalletPool(e) => ApiError::Internal(e.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paywatch_core::config::{ConfigStore, MatchingConfig, TokenContract};
    use paywatch_core::entities::TokenSymbol;
    use paywatch_core::orders::OrderService;
    use paywatch_core::store::MemoryPaymentStore;
    use paywatch_core::wallet_pool::{WalletDeriver, WalletPool};
    use paywatch_core::working_set::WorkingSet;
    use paywatch_sdk::objects::{CreatePaymentOrder, PaymentOrderStatus, Token};
    use rust_decimal::Decimal;

    const PHRASE: &str = "test test test test test test test test test test test junk";

    fn state() -> AppState<MemoryPaymentStore> {
        let store = MemoryPaymentStore::new();
        let pool = WalletPool::new(WalletDeriver::new(PHRASE, "", "payment", "api"));
        let orders = OrderService::new(store, pool, ConfigStore::new(MatchingConfig::default()))
            .with_network(
                ChainNetwork::Bsc,
                vec![TokenContract {
                    symbol: TokenSymbol::Usdt,
                    address: alloy::primitives::Address::repeat_byte(0x55),
                    decimals: 18,
                }],
                WorkingSet::shared(ChainNetwork::Bsc, 10),
            );
        AppState::new(orders, [ChainNetwork::Bsc])
    }

    fn order(request_id: &str, network: Network) -> CreatePaymentOrder {
        CreatePaymentOrder {
            request_id: request_id.to_string(),
            network,
            symbol: Token::Usdt,
            amount: Decimal::from(25),
            webhook_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_order() {
        let state = state();
        let body = CreatePaymentOrders {
            orders: vec![order("r1", Network::Bsc), order("r1", Network::Bsc)],
        };
        let (status, Json(created)) = create_payment_orders(State(state.clone()), Json(body))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].status, PaymentOrderStatus::Pending);
        assert!(created[0].payment_address.starts_with("0x"));

        let Json(fetched) = get_payment_order(State(state.clone()), Path("r1".to_string()))
            .await
            .unwrap();
        assert_eq!(fetched, created[0]);

        // Creating again is idempotent.
        let body = CreatePaymentOrders {
            orders: vec![order("r1", Network::Bsc)],
        };
        let (_, Json(again)) = create_payment_orders(State(state), Json(body)).await.unwrap();
        assert_eq!(again[0].id, created[0].id);
    }

    #[tokio::test]
    async fn test_rejects_unconfigured_network() {
        let body = CreatePaymentOrders {
            orders: vec![order("r2", Network::AvaxCChain)],
        };
        let err = create_payment_orders(State(state()), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_order_is_404() {
        let err = get_payment_order(State(state()), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_block_state() {
        let state = state();
        let err = get_block_state(State(state.clone()), Path(Network::Bsc))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);

        state
            .store()
            .save_block_cursor(ChainNetwork::Bsc, 120, 130)
            .await
            .unwrap();
        let Json(block_state) = get_block_state(State(state.clone()), Path(Network::Bsc))
            .await
            .unwrap();
        assert_eq!(block_state.last_processed_block, 120);
        assert_eq!(block_state.last_observed_head, 130);

        let err = get_block_state(State(state), Path(Network::AvaxCChain))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
