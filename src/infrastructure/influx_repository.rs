// InfluxDB repository implementation
use crate::application::row_source::{RowSource, VersionSource};
use crate::domain::curve::Row;
use crate::infrastructure::config::InfluxSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

// Times the sampling window may double before settling for fewer rows
const MAX_SAMPLE_WIDENINGS: usize = 8;

/// Curve rows and series versions stored in InfluxDB, queried over InfluxQL.
///
/// Rows live in `measurement` with `depth`/`value` fields and `well_id`/`metric`
/// tags. Versions live in `version_measurement`; deployments without it serve
/// every series at version 0.
#[derive(Debug)]
pub struct InfluxRepository {
    host: String,
    token: String,
    database: String,
    retention_policy: String,
    measurement: String,
    version_measurement: String,
    client: reqwest::Client,
    versions_available: OnceCell<bool>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    name: String,
    columns: Vec<String>,
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxRepository {
    pub fn new(settings: InfluxSettings) -> Self {
        Self {
            host: settings.host.trim_end_matches('/').to_string(),
            token: settings.token,
            database: settings.database,
            retention_policy: settings.retention_policy,
            measurement: settings.measurement,
            version_measurement: settings.version_measurement,
            client: reqwest::Client::new(),
            versions_available: OnceCell::new(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&rp={}&q={}",
            self.host, self.database, self.retention_policy, encoded_query
        )
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        if let Some(result) = data.results.first() {
            if let Some(error) = &result.error {
                anyhow::bail!("InfluxDB query error: {}", error);
            }
        }

        Ok(data)
    }

    fn series_filter(&self, well_id: &str, metric: &str) -> String {
        format!(
            "\"well_id\" = '{}' AND \"metric\" = '{}'",
            quote_literal(well_id),
            quote_literal(metric)
        )
    }

    // Checked once per repository instance
    async fn versions_available(&self) -> bool {
        *self
            .versions_available
            .get_or_init(|| async {
                let query = format!(
                    "SHOW MEASUREMENTS WITH MEASUREMENT = \"{}\"",
                    self.version_measurement
                );
                match self.execute_query(&query).await {
                    Ok(response) => {
                        let found = series_of(&response).any(|s| !s.values.is_empty());
                        if !found {
                            tracing::warn!(
                                "Measurement {} not found, all series report version 0",
                                self.version_measurement
                            );
                        }
                        found
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Could not check for {}: {:#}",
                            self.version_measurement,
                            e
                        );
                        false
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl RowSource for InfluxRepository {
    async fn fetch_raw_rows(
        &self,
        well_id: &str,
        metric: &str,
        from_depth: f64,
        to_depth: f64,
    ) -> Result<Vec<Row>> {
        let (lo, hi) = (from_depth.min(to_depth), from_depth.max(to_depth));
        let query = format!(
            "SELECT \"depth\", \"value\" FROM \"{}\" WHERE {} AND \"depth\" >= {} AND \"depth\" <= {}",
            self.measurement,
            self.series_filter(well_id, metric),
            lo,
            hi
        );

        tracing::debug!("Executing row query: {}", query);
        let response = self.execute_query(&query).await?;
        Ok(rows_from_response(&response))
    }

    /// The shallowest `limit` rows by depth.
    ///
    /// InfluxQL only orders by time, so this reads the depth extent first and
    /// fetches a depth window from the top of the series, widening it until it
    /// holds `limit` rows or reaches the deepest row.
    async fn sample_rows(&self, well_id: &str, metric: &str, limit: usize) -> Result<Vec<Row>> {
        let query = format!(
            "SELECT min(\"depth\"), max(\"depth\"), count(\"depth\") FROM \"{}\" WHERE {}",
            self.measurement,
            self.series_filter(well_id, metric)
        );
        let response = self.execute_query(&query).await?;
        let Some(extent) = extent_from_response(&response) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut span = extent.sample_span(limit);
        let mut rows = Vec::new();
        for _ in 0..=MAX_SAMPLE_WIDENINGS {
            let end = (extent.min + span).min(extent.max);
            rows = self.fetch_raw_rows(well_id, metric, extent.min, end).await?;
            if rows.len() >= limit || end >= extent.max {
                break;
            }
            span *= 2.0;
        }

        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl VersionSource for InfluxRepository {
    async fn current_version(&self, well_id: &str, metric: &str) -> Result<i64> {
        if !self.versions_available().await {
            return Ok(0);
        }

        let query = format!(
            "SELECT last(\"version\") FROM \"{}\" WHERE {}",
            self.version_measurement,
            self.series_filter(well_id, metric)
        );
        let response = self.execute_query(&query).await?;
        Ok(version_from_response(&response).unwrap_or(0))
    }
}

fn series_of(response: &InfluxQLResponse) -> impl Iterator<Item = &InfluxQLSeries> {
    response
        .results
        .iter()
        .filter_map(|r| r.series.as_ref())
        .flatten()
}

/// Finite rows from a `depth`/`value` result set, ascending by depth.
fn rows_from_response(response: &InfluxQLResponse) -> Vec<Row> {
    let mut rows = Vec::new();
    for s in series_of(response) {
        let (Some(depth_idx), Some(value_idx)) = (
            s.columns.iter().position(|c| c == "depth"),
            s.columns.iter().position(|c| c == "value"),
        ) else {
            tracing::warn!("Skipping series {} without depth/value columns", s.name);
            continue;
        };

        for value_row in &s.values {
            let depth = value_row.get(depth_idx).and_then(|v| v.as_f64());
            let value = value_row.get(value_idx).and_then(|v| v.as_f64());
            if let (Some(depth), Some(value)) = (depth, value) {
                let row = Row::new(depth, value);
                if row.is_finite() {
                    rows.push(row);
                }
            }
        }
    }

    rows.sort_by(|a, b| a.depth.total_cmp(&b.depth));
    rows
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DepthExtent {
    min: f64,
    max: f64,
    count: u64,
}

impl DepthExtent {
    /// Depth span expected to hold `limit` rows, assuming even spacing.
    fn sample_span(&self, limit: usize) -> f64 {
        let full = self.max - self.min;
        if self.count <= limit as u64 {
            return full;
        }
        let span = full * (limit as f64 / self.count as f64);
        if span.is_finite() && span > 0.0 { span } else { full }
    }
}

fn extent_from_response(response: &InfluxQLResponse) -> Option<DepthExtent> {
    let s = series_of(response).next()?;
    let values = s.values.first()?;
    let column = |name: &str| {
        let idx = s.columns.iter().position(|c| c == name)?;
        values.get(idx)
    };

    let min = column("min")?.as_f64()?;
    let max = column("max")?.as_f64()?;
    let count = column("count")?.as_u64()?;
    if !min.is_finite() || !max.is_finite() || max < min || count == 0 {
        return None;
    }
    Some(DepthExtent { min, max, count })
}

fn version_from_response(response: &InfluxQLResponse) -> Option<i64> {
    let s = series_of(response).next()?;
    let idx = s
        .columns
        .iter()
        .position(|c| c == "last" || c == "version")
        .unwrap_or(1);
    let value = s.values.first()?.get(idx)?;
    value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))
}

fn quote_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
