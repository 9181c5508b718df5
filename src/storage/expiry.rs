//! Per-Key Expiry Timers
//!
//! Every `SET ... PX <ms>` registers one timer. The timer is an independent
//! Tokio task that sleeps until the deadline, fires once, and ends.
//!
//! ## Stale Registrations
//!
//! A key can be re-SET before an earlier timer fires. Timers are therefore not
//! keyed by name alone: each one carries the write version the engine returned
//! for the SET that created it, and firing calls
//! [`StorageEngine::remove_if_version`]. If the key has been written again the
//! versions differ and the timer does nothing.
//!
//! ```text
//!  SET k v1 PX 100   -> version 7, timer(k, 7) sleeps 100ms
//!  SET k v2          -> version 8
//!  ...100ms...       -> timer(k, 7) fires: current version is 8, no-op
//! ```
//!
//! ## Shutdown
//!
//! All timers watch a shared shutdown flag. Stopping (or dropping) the
//! scheduler makes every pending timer return without touching the store.

use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Spawns and tracks expiry timers for one [`StorageEngine`].
///
/// When this handle is dropped, pending timers are abandoned.
#[derive(Debug)]
pub struct ExpiryScheduler {
    engine: Arc<StorageEngine>,

    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,

    /// Timers registered but not yet finished
    pending: Arc<AtomicU64>,
}

impl ExpiryScheduler {
    /// Creates a scheduler for the given engine.
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            engine,
            shutdown_tx,
            pending: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers an expiry for the entry `key` holds at `version`.
    ///
    /// Must be called from within a Tokio runtime. The returned handle resolves
    /// to `true` if the timer removed the key; dropping it does not cancel the
    /// timer.
    ///
    /// # Example
    ///
    /// ```
    /// use quickkv::storage::{ExpiryScheduler, StorageEngine};
    /// use quickkv::protocol::RespValue;
    /// use bytes::Bytes;
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// # tokio_test::block_on(async {
    /// let engine = Arc::new(StorageEngine::new());
    /// let scheduler = ExpiryScheduler::new(Arc::clone(&engine));
    ///
    /// let ttl = Duration::from_millis(10);
    /// let version = engine.set_with_ttl(Bytes::from("session"), RespValue::null(), ttl);
    /// let fired = scheduler.schedule_expiry(Bytes::from("session"), version, ttl);
    ///
    /// assert!(fired.await.unwrap());
    /// assert!(engine.is_empty());
    /// # });
    /// ```
    pub fn schedule_expiry(&self, key: Bytes, version: u64, ttl: Duration) -> JoinHandle<bool> {
        let engine = Arc::clone(&self.engine);
        let pending = Arc::clone(&self.pending);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        pending.fetch_add(1, Ordering::Relaxed);
        trace!(key = ?key, version, ttl_ms = ttl.as_millis(), "Expiry registered");

        tokio::spawn(async move {
            let removed = tokio::select! {
                _ = tokio::time::sleep(ttl) => {
                    let removed = engine.remove_if_version(&key, version);
                    if removed {
                        debug!(key = ?key, version, "Key expired");
                    } else {
                        trace!(key = ?key, version, "Stale expiry ignored");
                    }
                    removed
                }
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    trace!(key = ?key, version, "Expiry abandoned on shutdown");
                    false
                }
            };

            pending.fetch_sub(1, Ordering::Relaxed);
            removed
        })
    }

    /// Number of timers that have not fired or been abandoned yet.
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Abandons all pending timers. Timers registered afterwards never fire.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!(pending = self.pending(), "Expiry scheduler stopped");
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolves once the shutdown flag is set or the scheduler is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;

    fn setup() -> (Arc<StorageEngine>, ExpiryScheduler) {
        let engine = Arc::new(StorageEngine::new());
        let scheduler = ExpiryScheduler::new(Arc::clone(&engine));
        (engine, scheduler)
    }

    fn set_px(
        engine: &StorageEngine,
        scheduler: &ExpiryScheduler,
        key: &'static str,
        ms: u64,
    ) -> JoinHandle<bool> {
        let ttl = Duration::from_millis(ms);
        let version =
            engine.set_with_ttl(Bytes::from(key), RespValue::bulk_string("value"), ttl);
        scheduler.schedule_expiry(Bytes::from(key), version, ttl)
    }

    #[tokio::test]
    async fn test_timer_removes_key() {
        let (engine, scheduler) = setup();

        let fired = set_px(&engine, &scheduler, "key", 30);
        assert_eq!(engine.len(), 1);

        assert!(fired.await.unwrap());
        assert_eq!(engine.len(), 0);
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_fires_immediately() {
        let (engine, scheduler) = setup();

        let fired = set_px(&engine, &scheduler, "key", 0);
        assert!(fired.await.unwrap());
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_stale_timer_keeps_newer_value() {
        let (engine, scheduler) = setup();

        let fired = set_px(&engine, &scheduler, "key", 30);
        engine.set(Bytes::from("key"), RespValue::bulk_string("newer"));

        assert!(!fired.await.unwrap());
        assert_eq!(engine.get(b"key"), Some(RespValue::bulk_string("newer")));
    }

    #[tokio::test]
    async fn test_timers_are_independent() {
        let (engine, scheduler) = setup();

        let short = set_px(&engine, &scheduler, "short", 10);
        let long = set_px(&engine, &scheduler, "long", 300);
        assert_eq!(scheduler.pending(), 2);

        assert!(short.await.unwrap());
        assert!(engine.exists(b"long"));
        assert_eq!(scheduler.pending(), 1);

        drop(long);
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_timers() {
        let (engine, scheduler) = setup();

        let fired = set_px(&engine, &scheduler, "key", 10_000);
        scheduler.stop();
        assert!(scheduler.is_stopped());

        assert!(!fired.await.unwrap());
        assert_eq!(engine.len(), 1);
        assert_eq!(scheduler.pending(), 0);

        // Registered after stop: abandoned straight away
        let late = set_px(&engine, &scheduler, "late", 10_000);
        assert!(!late.await.unwrap());
        assert!(engine.exists(b"late"));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_drop_abandons_pending_timers() {
        let (engine, scheduler) = setup();

        let fired = set_px(&engine, &scheduler, "key", 10_000);
        drop(scheduler);

        assert!(!fired.await.unwrap());
        assert!(engine.exists(b"key"));
    }
}
