use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// How a cached value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Just produced by a refresh
    Fresh,
    /// Served from cache within the TTL
    Cached,
    /// Refresh failed, older value served instead
    Stale,
}

/// Single-slot cache with a time-to-live and stale fallback.
///
/// A zero TTL disables reuse but still keeps the last value around as a
/// fallback for failed refreshes.
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Value stored less than `ttl` ago, if any
    pub async fn fresh(&self) -> Option<T> {
        let slot = self.slot.lock().await;
        slot.as_ref()
            .filter(|(stored_at, _)| !self.ttl.is_zero() && stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    /// Last stored value regardless of age
    pub async fn last(&self) -> Option<T> {
        self.slot.lock().await.as_ref().map(|(_, value)| value.clone())
    }

    pub async fn store(&self, value: T) {
        *self.slot.lock().await = Some((Instant::now(), value));
    }

    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }
}
