// Cache store trait - the only shared mutable state of the window service
use async_trait::async_trait;
use std::time::Duration;

/// Key/value store with TTL and an atomic set-if-absent.
///
/// Every operation may fail; callers treat a failure as a miss and carry on,
/// so the store only ever makes things faster.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;

    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    /// Store `value` only if `key` is absent. Returns whether the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> anyhow::Result<bool>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    /// Delete `key` only while it still holds `expected`. Returns whether it
    /// was deleted.
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> anyhow::Result<bool>;
}
