// In-process TTL cache store backed by moka
use crate::application::cache_store::CacheStore;
use crate::application::keys::LOCK_PREFIX;
use anyhow::Result;
use async_trait::async_trait;
use moka::Expiry;
use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedValue {
    bytes: Arc<Vec<u8>>,
    ttl: Duration,
}

impl CachedValue {
    fn new(bytes: Vec<u8>, ttl: Duration) -> Self {
        Self {
            bytes: Arc::new(bytes),
            ttl,
        }
    }
}

/// Every entry lives for the TTL it was written with; an overwrite restarts it.
struct PerEntryTtl;

impl Expiry<String, CachedValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Cache store held in process memory.
///
/// Tiles and metadata share a bounded cache that evicts under capacity
/// pressure. Lock keys live in a separate unbounded cache, so a held lock only
/// goes away through its TTL or an explicit delete.
pub struct MemoryCacheStore {
    entries: Cache<String, CachedValue>,
    locks: Cache<String, CachedValue>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries.max(1) as u64)
            .expire_after(PerEntryTtl)
            .build();
        let locks = Cache::builder().expire_after(PerEntryTtl).build();
        Self { entries, locks }
    }

    fn store_for(&self, key: &str) -> &Cache<String, CachedValue> {
        if key.starts_with(LOCK_PREFIX) {
            &self.locks
        } else {
            &self.entries
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .store_for(key)
            .get(key)
            .map(|cached| cached.bytes.as_ref().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.store_for(key)
            .insert(key.to_string(), CachedValue::new(value, ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.store_for(key).contains_key(key))
    }

    async fn set_if_absent(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        let entry = self
            .store_for(key)
            .entry(key.to_string())
            .or_insert_with(|| CachedValue::new(value, ttl));
        Ok(entry.is_fresh())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store_for(key).invalidate(key);
        Ok(())
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> Result<bool> {
        let result = self
            .store_for(key)
            .entry(key.to_string())
            .and_compute_with(|current| match current {
                Some(entry) if entry.value().bytes.as_slice() == expected => Op::Remove,
                _ => Op::Nop,
            });
        Ok(matches!(result, CompResult::Removed(_)))
    }
}
