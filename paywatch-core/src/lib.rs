#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod chain;
pub mod config;
pub mod decoders;
pub mod entities;
pub mod events;
pub mod framework;
pub mod orders;
pub mod payment;
pub mod processors;
pub mod store;
pub mod utils;
pub mod wallet_pool;
pub mod working_set;
