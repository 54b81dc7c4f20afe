//! Per-cart serialization of mutations.
//!
//! Each key maps to a `tokio` mutex held in a `moka` cache. Lock entries are
//! only evicted after sitting idle, and the idle window is far longer than
//! any request, so a held lock is never replaced by a fresh one.
//!
//! The guard also remembers, per browser, the cart its last first-add
//! created. A second first-add queued behind the first (sent before the
//! cart cookie arrived) joins that cart instead of creating another.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use ec_relate_core::CartHandle;

const IDLE_EVICTION: Duration = Duration::from_secs(600);
const RECENT_CART_TTL: Duration = Duration::from_secs(600);
const MAX_RECENT_CARTS: u64 = 10_000;

/// The guard could not be acquired in time.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cart is busy with another update")]
pub struct Busy;

/// Registry of per-key mutation locks.
#[derive(Clone)]
pub struct MutationGuard {
    locks: Cache<String, Arc<Mutex<()>>>,
    recent: Cache<String, CartHandle>,
    wait: Duration,
}

impl MutationGuard {
    /// `wait` bounds how long a mutation queues before giving up.
    #[must_use]
    pub fn new(wait: Duration) -> Self {
        let locks = Cache::builder().time_to_idle(IDLE_EVICTION).build();
        let recent = Cache::builder()
            .max_capacity(MAX_RECENT_CARTS)
            .time_to_live(RECENT_CART_TTL)
            .build();
        Self {
            locks,
            recent,
            wait,
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Busy`] if another holder keeps the lock past the wait limit.
    pub async fn acquire(&self, key: &str) -> Result<OwnedMutexGuard<()>, Busy> {
        let lock = self
            .locks
            .get_with(key.to_string(), async { Arc::new(Mutex::new(())) })
            .await;
        tokio::time::timeout(self.wait, lock.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(key, "timed out waiting for cart mutation guard");
                Busy
            })
    }
}

impl MutationGuard {
    /// Cart most recently created for `key`, if still remembered.
    pub async fn recent_cart(&self, key: &str) -> Option<CartHandle> {
        self.recent.get(key).await
    }

    pub async fn remember_cart(&self, key: &str, handle: &CartHandle) {
        self.recent.insert(key.to_string(), handle.clone()).await;
    }

    pub async fn forget_cart(&self, key: &str) {
        self.recent.invalidate(key).await;
    }
}

impl std::fmt::Debug for MutationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationGuard")
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}
