// Test doubles for the window service collaborators
use crate::application::cache_store::CacheStore;
use crate::application::row_source::{RowSource, VersionSource};
use crate::domain::curve::Row;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Row source over a single in-memory curve that records every range it serves.
pub struct CountingRowSource {
    rows: Vec<Row>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    delay: Duration,
    fail: AtomicBool,
}

impl CountingRowSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            calls: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            delay: Duration::ZERO,
            fail: AtomicBool::new(false),
        }
    }

    /// Evenly spaced curve with a wavy value, from `start` over `count` samples.
    pub fn uniform(start: f64, step: f64, count: usize) -> Self {
        let rows = (0..count)
            .map(|i| {
                let depth = start + i as f64 * step;
                Row::new(depth, (i as f64 * 0.13).sin() * 40.0 + 80.0)
            })
            .collect();
        Self::new(rows)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls_for(&self, from_depth: f64, to_depth: f64) -> usize {
        let calls = self.calls.lock().unwrap();
        calls.get(&range_key(from_depth, to_depth)).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

fn range_key(from_depth: f64, to_depth: f64) -> String {
    format!("{}-{}", from_depth, to_depth)
}

#[async_trait]
impl RowSource for CountingRowSource {
    async fn fetch_raw_rows(
        &self,
        _well_id: &str,
        _metric: &str,
        from_depth: f64,
        to_depth: f64,
    ) -> Result<Vec<Row>> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(range_key(from_depth, to_depth))
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("row source offline"));
        }

        let (lo, hi) = (from_depth.min(to_depth), from_depth.max(to_depth));
        Ok(self
            .rows
            .iter()
            .filter(|r| r.depth >= lo && r.depth <= hi)
            .copied()
            .collect())
    }

    async fn sample_rows(&self, _well_id: &str, _metric: &str, limit: usize) -> Result<Vec<Row>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("row source offline"));
        }
        Ok(self.rows.iter().take(limit).copied().collect())
    }
}

pub struct ScriptedVersionSource {
    version: AtomicI64,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl ScriptedVersionSource {
    pub fn new(version: i64) -> Self {
        Self {
            version: AtomicI64::new(version),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn bump(&self) -> i64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionSource for ScriptedVersionSource {
    async fn current_version(&self, _well_id: &str, _metric: &str) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("version store offline"));
        }
        Ok(self.version.load(Ordering::SeqCst))
    }
}

/// A cache store whose every operation fails.
pub struct UnavailableCacheStore;

#[async_trait]
impl CacheStore for UnavailableCacheStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("cache unreachable"))
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Err(anyhow!("cache unreachable"))
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Err(anyhow!("cache unreachable"))
    }

    async fn set_if_absent(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<bool> {
        Err(anyhow!("cache unreachable"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(anyhow!("cache unreachable"))
    }

    async fn delete_if_equals(&self, _key: &str, _expected: &[u8]) -> Result<bool> {
        Err(anyhow!("cache unreachable"))
    }
}
