//! The process-wide unread badge counter.
//!
//! Every surface that renders a badge observes the same cached value through
//! a watch channel instead of running its own polling loop. Reads inside the
//! freshness window are served from cache; refreshes are single flight, so
//! two surfaces asking at the same moment cost one REST call. The value is
//! never decremented locally: only `mark_read` (via invalidation) or a fresh
//! server count moves it down.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex as AsyncMutex};

use crate::rest::ChatApi;

#[derive(Debug, Clone, Copy)]
struct CachedCount {
    value: u64,
    fetched_at: Instant,
}

pub struct UnreadCounter {
    api: Arc<dyn ChatApi>,
    fresh_for: Duration,
    cached: Mutex<Option<CachedCount>>,
    refresh_gate: AsyncMutex<()>,
    tx: watch::Sender<u64>,
}

impl UnreadCounter {
    pub fn new(api: Arc<dyn ChatApi>, fresh_for: Duration) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            api,
            fresh_for,
            cached: Mutex::new(None),
            refresh_gate: AsyncMutex::new(()),
            tx,
        }
    }

    /// Badge subscription. Every subscriber sees the same value and every
    /// invalidation, with no call of its own.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Last value any caller observed, without touching the network.
    pub fn current(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Cached read: serves the fresh value when there is one, otherwise
    /// refreshes.
    pub async fn get(&self) -> u64 {
        if let Some(value) = self.fresh_value() {
            return value;
        }
        self.refresh().await
    }

    /// Forces the next read to hit the server and refreshes immediately,
    /// waking every subscriber. Called after mark-read transitions and on
    /// any event that plausibly changed unread state.
    pub async fn invalidate(&self) -> u64 {
        *self.cached.lock().unwrap() = None;
        self.refresh().await
    }

    /// Refresh-on-focus entry point for the host application.
    pub async fn refresh_now(&self) -> u64 {
        self.invalidate().await
    }

    /// Single-flight refresh. A fetch failure degrades silently to the last
    /// known value; badges show stale data rather than breaking the view.
    pub async fn refresh(&self) -> u64 {
        let _gate = self.refresh_gate.lock().await;
        if let Some(value) = self.fresh_value() {
            return value;
        }
        match self.api.unread_count().await {
            Ok(wire) => {
                *self.cached.lock().unwrap() = Some(CachedCount {
                    value: wire.count,
                    fetched_at: Instant::now(),
                });
                self.tx.send_replace(wire.count);
                wire.count
            }
            Err(err) => {
                tracing::debug!(
                    target: "chat::unread",
                    error = %err,
                    "unread refresh failed; serving last known value"
                );
                self.current()
            }
        }
    }

    /// Logout: forget everything and report zero to remaining subscribers.
    pub fn reset(&self) {
        *self.cached.lock().unwrap() = None;
        self.tx.send_replace(0);
    }

    fn fresh_value(&self) -> Option<u64> {
        let cached = *self.cached.lock().unwrap();
        cached
            .filter(|cached| cached.fetched_at.elapsed() < self.fresh_for)
            .map(|cached| cached.value)
    }
}
