//! Caching for hot store reads.

mod store;
mod ttl;

pub use store::{CachedPaymentStore, CachedTransaction, DEFAULT_CURSOR_TTL, DEFAULT_ORDER_TTL};
pub use ttl::{CacheStats, TtlCache};
