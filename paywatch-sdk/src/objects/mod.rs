pub mod blockchains;
pub mod payment_order;
pub mod webhook;

pub use blockchains::{Network, Token};
pub use payment_order::{
    BlockStateResponse, CreatePaymentOrder, CreatePaymentOrders, PaymentOrderResponse,
    PaymentOrderStatus,
};
pub use webhook::OrderStatusChangedPayload;
