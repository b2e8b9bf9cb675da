//! WebhookSender processor.
//!
//! The WebhookSender is responsible for:
//! - Receiving `OrderStatusChanged` events from the queue
//! - Re-reading the order and skipping orders without a webhook URL
//! - Sending HTTP POST requests, signed when a secret is configured
//! - Retrying failed deliveries with exponential backoff (2^0 to 2^11 seconds)
//!
//! Each delivery runs in its own task so a slow endpoint never holds up
//! other notifications.

use crate::config::WebhookConfig;
use crate::entities::OrderStatus;
use crate::entities::payment_order::PaymentOrder;
use crate::events::{OrderStatusChanged, OrderStatusReceiver};
use crate::store::{PaymentStore, StoreError};
use paywatch_sdk::objects::OrderStatusChangedPayload;
use paywatch_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Backoff stops growing after 2^11 seconds.
const MAX_RETRY_EXPONENT: u32 = 11;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("order not found: {0}")]
    OrderNotFound(i64),

    #[error("webhook delivery failed with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

struct Delivery<S> {
    store: S,
    http_client: reqwest::Client,
    config: WebhookConfig,
}

pub struct WebhookSender<S> {
    delivery: Arc<Delivery<S>>,
    status_rx: OrderStatusReceiver,
    shutdown_rx: watch::Receiver<bool>,
}

impl<S: PaymentStore> WebhookSender<S> {
    pub fn new(
        store: S,
        config: WebhookConfig,
        status_rx: OrderStatusReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            delivery: Arc::new(Delivery {
                store,
                http_client,
                config,
            }),
            status_rx,
            shutdown_rx,
        }
    }

    /// Replace the HTTP client, e.g. to change timeouts or proxies.
    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        if let Some(delivery) = Arc::get_mut(&mut self.delivery) {
            delivery.http_client = http_client;
        }
        self
    }

    pub async fn run(mut self) {
        info!("WebhookSender started");
        let mut deliveries = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("WebhookSender received shutdown signal");
                        break;
                    }
                }

                Some(_) = deliveries.join_next(), if !deliveries.is_empty() => {}

                event = self.status_rx.recv() => {
                    let Some(event) = event else {
                        info!("OrderStatusChanged channel closed");
                        break;
                    };
                    debug!(order_id = event.order_id, status = ?event.status, "Received OrderStatusChanged");
                    let delivery = Arc::clone(&self.delivery);
                    deliveries.spawn(async move {
                        if let Err(e) = delivery.deliver(event).await {
                            error!(order_id = event.order_id, error = %e, "Webhook delivery gave up");
                        }
                    });
                }
            }
        }

        if !deliveries.is_empty() {
            warn!(pending = deliveries.len(), "Abandoning in-flight webhook deliveries");
        }
        deliveries.shutdown().await;
        info!("WebhookSender shutdown complete");
    }

    /// Deliver one notification, retrying until it succeeds or the attempts
    /// run out.
    pub async fn deliver(&self, event: OrderStatusChanged) -> Result<(), WebhookError> {
        self.delivery.deliver(event).await
    }
}

impl<S: PaymentStore> Delivery<S> {
    async fn deliver(&self, event: OrderStatusChanged) -> Result<(), WebhookError> {
        let order = self
            .store
            .get_order(event.order_id)
            .await?
            .ok_or(WebhookError::OrderNotFound(event.order_id))?;
        let Some(url) = order.webhook_url.clone() else {
            debug!(order_id = order.id, "Order has no webhook URL");
            return Ok(());
        };

        let payload = build_payload(&order, event.status);
        let (body, signature) = match &self.config.secret {
            Some(secret) => {
                let signed = SignedObject::new(payload, secret.as_bytes())?;
                let header = signed.to_header();
                (signed.json, Some(header))
            }
            None => (serde_json::to_string(&payload)?, None),
        };

        let attempts = self.config.max_attempts.max(1);
        let mut retry_count = 0;
        loop {
            match self.send_webhook(&url, &body, signature.as_deref()).await {
                Ok(()) => {
                    info!(
                        order_id = order.id,
                        status = ?event.status,
                        retry_count,
                        "Webhook delivered successfully"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        order_id = order.id,
                        error = %e,
                        retry_count,
                        "Webhook delivery failed"
                    );
                    retry_count += 1;
                    if retry_count >= attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(calculate_retry_delay(retry_count - 1)).await;
                }
            }
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        body: &str,
        signature: Option<&str>,
    ) -> Result<(), WebhookError> {
        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json");

        if let Some(sig) = signature {
            request = request.header(SIGNATURE_HEADER, sig);
        }

        let response = request.body(body.to_string()).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(WebhookError::DeliveryFailed {
                status: status.as_u16(),
                body,
            })
        }
    }
}

pub fn build_payload(order: &PaymentOrder, status: OrderStatus) -> OrderStatusChangedPayload {
    OrderStatusChangedPayload {
        event_type: OrderStatusChangedPayload::EVENT_TYPE.to_string(),
        order_id: order.id,
        request_id: order.request_id.clone(),
        network: order.network.into(),
        symbol: order.symbol.into(),
        status: status.into(),
        amount: order.amount_requested.to_string(),
        transferred: order.amount_transferred.to_string(),
        timestamp: time::OffsetDateTime::now_utc().unix_timestamp(),
    }
}

/// Calculate the next retry delay based on retry count.
///
/// Uses exponential backoff: 2^retry_count seconds.
pub fn calculate_retry_delay(retry_count: u32) -> std::time::Duration {
    let seconds = 2u64.pow(retry_count.min(MAX_RETRY_EXPONENT));
    std::time::Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::payment_order::NewPaymentOrder;
    use crate::entities::{ChainNetwork, TokenSymbol};
    use crate::events::order_status_channel;
    use crate::store::{MemoryPaymentStore, StoreTransaction};
    use crate::utils::time::utc_now;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use paywatch_sdk::objects::PaymentOrderStatus;
    use rust_decimal::Decimal;
    use tokio::sync::Mutex;

    type Received = Arc<Mutex<Vec<(Option<String>, String)>>>;

    /// Local endpoint that records requests and answers with `status`.
    async fn receiver(status: StatusCode) -> (String, Received) {
        let received: Received = Arc::default();
        let sink = Arc::clone(&received);
        let app = axum::Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: String| {
                let sink = Arc::clone(&sink);
                async move {
                    let signature = headers
                        .get(SIGNATURE_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().await.push((signature, body));
                    status
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), received)
    }

    async fn order_with_hook(store: &MemoryPaymentStore, url: Option<String>) -> PaymentOrder {
        let mut tx = store.begin().await.unwrap();
        tx.insert_wallet(1, "0x00000000000000000000000000000000000000aa", true)
            .await
            .unwrap();
        let order = tx
            .insert_orders(&[NewPaymentOrder {
                request_id: "req-hook".to_string(),
                wallet_id: 1,
                amount_requested: Decimal::from(25),
                symbol: TokenSymbol::Usdc,
                network: ChainNetwork::AvaxCChain,
                block_height: 1,
                webhook_url: url,
                expired_at: utc_now() + time::Duration::minutes(5),
            }])
            .await
            .unwrap()
            .remove(0);
        tx.commit().await.unwrap();
        order
    }

    fn sender(store: &MemoryPaymentStore, config: WebhookConfig) -> WebhookSender<MemoryPaymentStore> {
        let (_status_tx, status_rx) = order_status_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        WebhookSender::new(store.clone(), config, status_rx, shutdown_rx)
            .with_http_client(reqwest::Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_retry_delay_calculation() {
        assert_eq!(calculate_retry_delay(0), std::time::Duration::from_secs(1));
        assert_eq!(calculate_retry_delay(1), std::time::Duration::from_secs(2));
        assert_eq!(calculate_retry_delay(2), std::time::Duration::from_secs(4));
        assert_eq!(
            calculate_retry_delay(10),
            std::time::Duration::from_secs(1024)
        );
        assert_eq!(
            calculate_retry_delay(11),
            std::time::Duration::from_secs(2048)
        );
        // Max capped at 11
        assert_eq!(
            calculate_retry_delay(12),
            std::time::Duration::from_secs(2048)
        );
        assert_eq!(
            calculate_retry_delay(100),
            std::time::Duration::from_secs(2048)
        );
    }

    #[tokio::test]
    async fn test_signed_delivery_verifies() {
        let (url, received) = receiver(StatusCode::OK).await;
        let store = MemoryPaymentStore::new();
        let order = order_with_hook(&store, Some(url)).await;
        let sender = sender(
            &store,
            WebhookConfig {
                secret: Some("hook-secret".to_string()),
                max_attempts: 1,
            },
        );

        sender
            .deliver(OrderStatusChanged {
                order_id: order.id,
                status: OrderStatus::Expired,
            })
            .await
            .unwrap();

        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        let (header, body) = received[0].clone();
        let payload = SignedObject::<OrderStatusChangedPayload>::from_header_and_body(
            &header.unwrap(),
            body,
        )
        .unwrap()
        .verify(b"hook-secret")
        .unwrap();
        assert_eq!(payload.request_id, "req-hook");
        assert_eq!(payload.status, PaymentOrderStatus::Expired);
        assert_eq!(payload.amount, "25");
    }

    #[tokio::test]
    async fn test_rejected_delivery_reports_status() {
        let (url, received) = receiver(StatusCode::BAD_REQUEST).await;
        let store = MemoryPaymentStore::new();
        let order = order_with_hook(&store, Some(url)).await;
        let sender = sender(
            &store,
            WebhookConfig {
                secret: None,
                max_attempts: 1,
            },
        );

        let err = sender
            .deliver(OrderStatusChanged {
                order_id: order.id,
                status: OrderStatus::Success,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::DeliveryFailed { status: 400, .. }));
        let received = received.lock().await;
        assert_eq!(received.len(), 1);
        assert!(received[0].0.is_none());
    }

    #[tokio::test]
    async fn test_order_without_hook_is_skipped() {
        let store = MemoryPaymentStore::new();
        let order = order_with_hook(&store, None).await;
        let sender = sender(&store, WebhookConfig::default());

        assert!(
            sender
                .deliver(OrderStatusChanged {
                    order_id: order.id,
                    status: OrderStatus::Failed,
                })
                .await
                .is_ok()
        );
        assert!(matches!(
            sender
                .deliver(OrderStatusChanged {
                    order_id: 999,
                    status: OrderStatus::Failed,
                })
                .await,
            Err(WebhookError::OrderNotFound(999))
        ));
    }
}
