// Window request/response domain models
use serde::Serialize;

use super::curve::Row;
use super::error::WindowError;

#[derive(Debug, Clone, PartialEq)]
pub struct WindowRequest {
    pub well_id: String,
    pub metric: String,
    pub from_depth: f64,
    pub to_depth: f64,
    pub pixel_width: f64,
}

impl WindowRequest {
    pub fn new(
        well_id: impl Into<String>,
        metric: impl Into<String>,
        from_depth: f64,
        to_depth: f64,
        pixel_width: f64,
    ) -> Self {
        Self {
            well_id: well_id.into(),
            metric: metric.into(),
            from_depth,
            to_depth,
            pixel_width,
        }
    }

    /// Reject requests that must never reach the cache or the row source.
    pub fn validate(&self) -> Result<(), WindowError> {
        if self.well_id.trim().is_empty() {
            return Err(WindowError::invalid_range("well id is empty"));
        }
        if self.metric.trim().is_empty() {
            return Err(WindowError::invalid_range("metric is empty"));
        }
        if !self.from_depth.is_finite() || !self.to_depth.is_finite() {
            return Err(WindowError::invalid_range(format!(
                "depths must be finite (from={}, to={})",
                self.from_depth, self.to_depth
            )));
        }
        if !self.pixel_width.is_finite() || self.pixel_width <= 0.0 {
            return Err(WindowError::invalid_range(format!(
                "pixel width must be positive (got {})",
                self.pixel_width
            )));
        }
        Ok(())
    }

    /// Lower and upper depth regardless of request direction.
    pub fn depth_bounds(&self) -> (f64, f64) {
        (
            self.from_depth.min(self.to_depth),
            self.from_depth.max(self.to_depth),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cached,
    Mixed,
    Fresh,
}

impl Source {
    /// Infer where a window's tiles came from.
    pub fn from_counts(hits: usize, misses: usize) -> Self {
        if misses == 0 {
            Source::Cached
        } else if hits == 0 {
            Source::Fresh
        } else {
            Source::Mixed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshHint {
    pub recommended: bool,
    pub after_ms: u64,
    pub token: String,
}

impl RefreshHint {
    pub fn none() -> Self {
        Self {
            recommended: false,
            after_ms: 0,
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResult {
    pub rows: Vec<Row>,
    pub level: u32,
    pub tiles_total: usize,
    pub tiles_hit: usize,
    pub tiles_miss: usize,
    pub completeness: Completeness,
    pub source: Source,
    pub refresh: RefreshHint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResult {
    pub level: u32,
    pub estimated_points: u64,
    pub point_budget: u64,
    pub tile_width: f64,
    pub tiles_total: usize,
    pub tiles_hit: usize,
    pub tiles_miss: usize,
    pub source: Source,
    pub version: i64,
    pub base_resolution: f64,
}
