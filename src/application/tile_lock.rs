// Single-flight tile construction over the shared cache store
use crate::application::cache_store::CacheStore;
use crate::domain::curve::TilePayload;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How a tile request was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum TileOutcome {
    /// Found in the cache without building.
    Hit(TilePayload),
    /// Built by this caller and written to the cache.
    Built(TilePayload),
    /// Built by another caller while this one waited on the lock.
    Waited(TilePayload),
    /// The lock holder did not finish within the wait budget.
    TimedOut,
}

/// Ensures at most one caller builds a given tile key at a time.
///
/// The lock lives in the cache store, so builders in other processes are
/// excluded too. Waiters poll the cache; waiters in this process are also
/// woken as soon as a local builder finishes.
pub struct SingleFlightTileLock {
    cache: Arc<dyn CacheStore>,
    lock_ttl: Duration,
    tile_ttl: Duration,
    signals: Mutex<HashMap<String, Arc<Notify>>>,
    next_holder: AtomicU64,
}

impl SingleFlightTileLock {
    pub fn new(cache: Arc<dyn CacheStore>, lock_ttl: Duration, tile_ttl: Duration) -> Self {
        Self {
            cache,
            lock_ttl,
            tile_ttl,
            signals: Mutex::new(HashMap::new()),
            next_holder: AtomicU64::new(0),
        }
    }

    // Unique per acquisition, also across processes sharing the store
    fn holder_stamp(&self) -> Vec<u8> {
        format!(
            "{}:{}:{}",
            std::process::id(),
            self.next_holder.fetch_add(1, Ordering::Relaxed),
            chrono::Utc::now().to_rfc3339()
        )
        .into_bytes()
    }

    /// Return the cached tile, or build it under the lock, or wait for the
    /// current builder for at most `wait * max_wait_loops`.
    ///
    /// Build errors are returned to the caller and never cached; the lock is
    /// released either way.
    pub async fn get_or_build_tile<F, Fut>(
        &self,
        tile_key: &str,
        lock_key: &str,
        build: F,
        wait: Duration,
        max_wait_loops: u32,
    ) -> anyhow::Result<TileOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<TilePayload>>,
    {
        if let Some(payload) = self.lookup(tile_key).await {
            return Ok(TileOutcome::Hit(payload));
        }

        let holder = self.holder_stamp();
        match self
            .cache
            .set_if_absent(lock_key, holder.clone(), self.lock_ttl)
            .await
        {
            Ok(true) => {
                let lease = LockLease::new(self.cache.clone(), lock_key, holder);

                // Another builder may have finished between the lookup and the lock
                if let Some(payload) = self.lookup(tile_key).await {
                    lease.release().await;
                    return Ok(TileOutcome::Hit(payload));
                }

                let built = build().await;
                if let Ok(payload) = &built {
                    self.store(tile_key, payload).await;
                }
                lease.release().await;
                self.wake_waiters(tile_key);

                built.map(TileOutcome::Built)
            }
            Ok(false) => Ok(self.wait_for(tile_key, wait, max_wait_loops).await),
            Err(e) => {
                tracing::warn!(
                    "Tile lock unavailable for {}, building without it: {:#}",
                    tile_key,
                    e
                );
                let payload = build().await?;
                self.store(tile_key, &payload).await;
                Ok(TileOutcome::Built(payload))
            }
        }
    }

    async fn wait_for(&self, tile_key: &str, wait: Duration, max_wait_loops: u32) -> TileOutcome {
        let signal = self.signal_for(tile_key);
        let mut outcome = TileOutcome::TimedOut;

        for _ in 0..max_wait_loops {
            let _ = tokio::time::timeout(wait, signal.notified()).await;
            if let Some(payload) = self.lookup(tile_key).await {
                outcome = TileOutcome::Waited(payload);
                break;
            }
        }

        if outcome == TileOutcome::TimedOut {
            tracing::debug!(
                "Gave up waiting for {} after {} polls",
                tile_key,
                max_wait_loops
            );
        }
        self.drop_signal(tile_key, signal);
        outcome
    }

    async fn lookup(&self, tile_key: &str) -> Option<TilePayload> {
        match self.cache.get(tile_key).await {
            Ok(Some(bytes)) => match TilePayload::decode(&bytes) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!("Ignoring malformed tile at {}: {:#}", tile_key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Tile cache read failed for {}: {:#}", tile_key, e);
                None
            }
        }
    }

    async fn store(&self, tile_key: &str, payload: &TilePayload) {
        let bytes = match payload.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!("Could not encode tile {}: {:#}", tile_key, e);
                return;
            }
        };
        if let Err(e) = self.cache.set(tile_key, bytes, self.tile_ttl).await {
            tracing::warn!("Tile cache write failed for {}: {:#}", tile_key, e);
        }
    }

    fn signal_for(&self, tile_key: &str) -> Arc<Notify> {
        match self.signals.lock() {
            Ok(mut signals) => signals
                .entry(tile_key.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone(),
            Err(_) => Arc::new(Notify::new()),
        }
    }

    // Removes the entry once the last local waiter leaves
    fn drop_signal(&self, tile_key: &str, signal: Arc<Notify>) {
        if let Ok(mut signals) = self.signals.lock() {
            if Arc::strong_count(&signal) <= 2 {
                signals.remove(tile_key);
            }
        }
    }

    fn wake_waiters(&self, tile_key: &str) {
        let signal = match self.signals.lock() {
            Ok(signals) => signals.get(tile_key).cloned(),
            Err(_) => None,
        };
        if let Some(signal) = signal {
            signal.notify_waiters();
        }
    }
}

/// Held lock key. Released explicitly; if the owning future is dropped
/// first, the release is scheduled on the runtime instead.
///
/// Release only removes the key while it still carries this lease's holder
/// stamp. A build that outlived `lock_ttl` leaves a newer holder's lock alone.
struct LockLease {
    cache: Arc<dyn CacheStore>,
    key: String,
    holder: Vec<u8>,
    released: bool,
}

impl LockLease {
    fn new(cache: Arc<dyn CacheStore>, key: &str, holder: Vec<u8>) -> Self {
        Self {
            cache,
            key: key.to_string(),
            holder,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        match self.cache.delete_if_equals(&self.key, &self.holder).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Lock {} expired or changed hands before release", self.key)
            }
            Err(e) => {
                // the lock TTL still bounds how long followers are held up
                tracing::warn!("Failed to release {}: {:#}", self.key, e);
            }
        }
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cache = self.cache.clone();
            let key = std::mem::take(&mut self.key);
            let holder = std::mem::take(&mut self.holder);
            handle.spawn(async move {
                let _ = cache.delete_if_equals(&key, &holder).await;
            });
        }
    }
}
