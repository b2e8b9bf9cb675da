//! Deposit address pool.
//!
//! A wallet is claimed for exactly one active order and released when that
//! order reaches a terminal status. Claims run inside the caller's
//! transaction so the claim and the order insert commit or roll back
//! together.

pub mod derivation;

pub use derivation::{WalletDeriver, hash_to_u32};

use crate::entities::payment_wallet::PaymentWallet;
use crate::store::{PaymentStore, StoreError, StoreTransaction};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum WalletPoolError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("key derivation failed: {0}")]
    Derivation(#[from] alloy::signers::local::LocalSignerError),

    #[error("wallet id {0} cannot be used in a hardened derivation path")]
    IdOutOfRange(i64),
}

#[derive(Debug, Clone)]
pub struct WalletPool {
    deriver: Arc<WalletDeriver>,
}

impl WalletPool {
    pub fn new(deriver: WalletDeriver) -> Self {
        Self {
            deriver: Arc::new(deriver),
        }
    }

    pub fn deriver(&self) -> &WalletDeriver {
        &self.deriver
    }

    /// Hand out the lowest-id free wallet, or derive a new one when every
    /// wallet is taken. The returned wallet is already marked in use.
    pub async fn claim_first_available<T: StoreTransaction>(
        &self,
        tx: &mut T,
    ) -> Result<PaymentWallet, WalletPoolError> {
        if let Some(mut wallet) = tx.lock_first_available_wallet().await? {
            tx.mark_wallet_in_use(wallet.id).await?;
            wallet.in_use = true;
            debug!(wallet_id = wallet.id, "Claimed existing wallet");
            return Ok(wallet);
        }

        let wallet = self.create_wallet(tx, true).await?;
        info!(
            wallet_id = wallet.id,
            address = %wallet.address,
            "Pool exhausted, derived new wallet"
        );
        Ok(wallet)
    }

    /// Mark wallets free again.
    pub async fn release<S: PaymentStore>(
        &self,
        store: &S,
        wallet_ids: &[i64],
    ) -> Result<u64, WalletPoolError> {
        let released = store.release_wallets(wallet_ids).await?;
        debug!(released, "Released wallets");
        Ok(released)
    }

    /// Fill an empty pool with `count` free wallets. A pool that already has
    /// wallets is left alone. Returns how many were created.
    pub async fn initialize<S: PaymentStore>(
        &self,
        store: &S,
        count: usize,
    ) -> Result<usize, WalletPoolError> {
        let existing = store.count_wallets().await?;
        if existing > 0 {
            info!(existing, "Wallet pool already initialized");
            return Ok(0);
        }

        let mut tx = store.begin().await?;
        for _ in 0..count {
            self.create_wallet(&mut tx, false).await?;
        }
        tx.commit().await?;
        info!(count, "Initialized wallet pool");
        Ok(count)
    }

    async fn create_wallet<T: StoreTransaction>(
        &self,
        tx: &mut T,
        in_use: bool,
    ) -> Result<PaymentWallet, WalletPoolError> {
        let id = tx.next_wallet_id().await?;
        let address = format!("{:#x}", self.deriver.derive_address(id)?);
        Ok(tx.insert_wallet(id, &address, in_use).await?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::MemoryPaymentStore;

    pub(crate) fn test_pool() -> WalletPool {
        WalletPool::new(WalletDeriver::new(
            "test test test test test test test test test test test junk",
            "",
            "payment",
            "salt",
        ))
    }

    #[tokio::test]
    async fn test_claims_lowest_free_wallet() {
        let store = MemoryPaymentStore::new();
        let pool = test_pool();
        pool.initialize(&store, 3).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let first = pool.claim_first_available(&mut tx).await.unwrap();
        let second = pool.claim_first_available(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!((first.id, second.id), (1, 2));
        assert!(first.in_use && second.in_use);
        assert!(store.wallet(1).await.unwrap().in_use);
        assert!(!store.wallet(3).await.unwrap().in_use);
    }

    #[tokio::test]
    async fn test_exhausted_pool_grows_by_one() {
        let store = MemoryPaymentStore::new();
        let pool = test_pool();
        let n = 2;
        pool.initialize(&store, n).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        for _ in 0..n {
            pool.claim_first_available(&mut tx).await.unwrap();
        }
        let grown = pool.claim_first_available(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(grown.id, n as i64 + 1);
        assert!(grown.in_use);
        let expected = format!("{:#x}", pool.deriver().derive_address(grown.id).unwrap());
        assert_eq!(grown.address, expected);
    }

    #[tokio::test]
    async fn test_claim_release_round_trip() {
        let store = MemoryPaymentStore::new();
        let pool = test_pool();
        pool.initialize(&store, 1).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let wallet = pool.claim_first_available(&mut tx).await.unwrap();
        tx.commit().await.unwrap();
        assert!(store.wallet(wallet.id).await.unwrap().in_use);

        assert_eq!(pool.release(&store, &[wallet.id]).await.unwrap(), 1);
        assert!(!store.wallet(wallet.id).await.unwrap().in_use);

        let mut tx = store.begin().await.unwrap();
        let again = pool.claim_first_available(&mut tx).await.unwrap();
        assert_eq!(again.id, wallet.id);
    }

    #[tokio::test]
    async fn test_initialize_is_noop_on_existing_pool() {
        let store = MemoryPaymentStore::new();
        let pool = test_pool();
        assert_eq!(pool.initialize(&store, 2).await.unwrap(), 2);
        assert_eq!(pool.initialize(&store, 5).await.unwrap(), 0);
        assert_eq!(store.count_wallets().await.unwrap(), 2);
    }
}
