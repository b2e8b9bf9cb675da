//! Versioned, hot-reloadable settings.
//!
//! Readers take cheap snapshots; the reload path replaces the value and
//! bumps a version published on a `watch` channel, so long-running tasks can
//! `select!` on [`ConfigWatcher::changed`] instead of polling.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, watch};

pub struct ConfigStore<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    value: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Change subscription for a [`ConfigStore`].
#[derive(Debug, Clone)]
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                value: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Swap in a new value and wake every watcher. Returns the new version.
    pub async fn update(&self, value: T) -> u64 {
        {
            let mut guard = self.inner.value.write().await;
            *guard = value;
        }
        let mut version = 0;
        self.inner.version_tx.send_modify(|v| {
            *v += 1;
            version = *v;
        });
        version
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.value.read().await
    }

    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T: Clone> ConfigStore<T> {
    pub async fn snapshot(&self) -> T {
        self.inner.value.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ConfigStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Resolves on the next update. Fails once the store is dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.version_rx.changed().await
    }

    pub fn version(&self) -> u64 {
        *self.version_rx.borrow()
    }
}
