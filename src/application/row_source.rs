// Collaborator traits for curve data access
use crate::domain::curve::Row;
use async_trait::async_trait;

/// Read-only access to raw curve rows.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// Rows with `from_depth <= depth <= to_depth`, ascending by depth.
    /// Missing or non-finite values are omitted, never zero-filled.
    async fn fetch_raw_rows(
        &self,
        well_id: &str,
        metric: &str,
        from_depth: f64,
        to_depth: f64,
    ) -> anyhow::Result<Vec<Row>>;

    /// The first `limit` rows of the series in depth order.
    async fn sample_rows(
        &self,
        well_id: &str,
        metric: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Row>>;
}

/// Current version of a series; bumped by ingestion whenever the series changes.
#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn current_version(&self, well_id: &str, metric: &str) -> anyhow::Result<i64>;
}
