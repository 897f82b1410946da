// Series metadata, computed lazily and cached per (well, metric)
use crate::application::cache_store::CacheStore;
use crate::application::keys::meta_key;
use crate::application::row_source::{RowSource, VersionSource};
use crate::domain::curve::{Row, SeriesMetadata};
use crate::infrastructure::config::WindowSettings;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct MetaStore {
    cache: Arc<dyn CacheStore>,
    versions: Arc<dyn VersionSource>,
    rows: Arc<dyn RowSource>,
    settings: WindowSettings,
}

impl MetaStore {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        versions: Arc<dyn VersionSource>,
        rows: Arc<dyn RowSource>,
        settings: WindowSettings,
    ) -> Self {
        Self {
            cache,
            versions,
            rows,
            settings,
        }
    }

    /// Cached metadata for the series, computing it on a miss.
    ///
    /// Never fails: when the version store is unreachable the conservative
    /// defaults are returned (and not cached).
    pub async fn get_or_build(&self, well_id: &str, metric: &str) -> SeriesMetadata {
        let key = meta_key(well_id, metric);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match self.decode(&bytes) {
                Some(meta) => return meta,
                None => tracing::warn!("Discarding malformed metadata at {}", key),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!("Metadata cache read failed for {}: {:#}", key, e),
        }

        let version = match self.versions.current_version(well_id, metric).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(
                    "Version lookup failed for {}/{}, using defaults: {:#}",
                    well_id,
                    metric,
                    e
                );
                return self.defaults(well_id, metric);
            }
        };

        let base_resolution = match self
            .rows
            .sample_rows(well_id, metric, self.settings.resolution_sample_size)
            .await
        {
            Ok(sample) => estimate_base_resolution(&sample)
                .unwrap_or(self.settings.default_base_resolution),
            Err(e) => {
                tracing::warn!(
                    "Resolution sample failed for {}/{}, not caching metadata: {:#}",
                    well_id,
                    metric,
                    e
                );
                return SeriesMetadata {
                    version,
                    ..self.defaults(well_id, metric)
                };
            }
        };

        let meta = SeriesMetadata {
            well_id: well_id.to_string(),
            metric: metric.to_string(),
            version,
            base_resolution,
            max_level: self.settings.max_level,
            tile_width: self.settings.tile_width,
        };

        tracing::debug!(
            "Built metadata for {}/{}: v{} resolution={} tile_width={}",
            well_id,
            metric,
            meta.version,
            meta.base_resolution,
            meta.tile_width
        );

        match serde_json::to_vec(&meta) {
            Ok(bytes) => {
                let ttl = Duration::from_secs(self.settings.meta_ttl_secs);
                if let Err(e) = self.cache.set(&key, bytes, ttl).await {
                    tracing::warn!("Metadata cache write failed for {}: {:#}", key, e);
                }
            }
            Err(e) => tracing::warn!("Could not encode metadata for {}: {}", key, e),
        }

        meta
    }

    /// Forget cached metadata so the next request re-reads the series version.
    pub async fn invalidate(&self, well_id: &str, metric: &str) -> anyhow::Result<()> {
        self.cache.delete(&meta_key(well_id, metric)).await
    }

    fn decode(&self, bytes: &[u8]) -> Option<SeriesMetadata> {
        let meta: SeriesMetadata = serde_json::from_slice(bytes).ok()?;
        let usable = meta.tile_width.is_finite()
            && meta.tile_width > 0.0
            && meta.base_resolution.is_finite();
        usable.then_some(meta)
    }

    fn defaults(&self, well_id: &str, metric: &str) -> SeriesMetadata {
        SeriesMetadata {
            well_id: well_id.to_string(),
            metric: metric.to_string(),
            version: 0,
            base_resolution: self.settings.default_base_resolution,
            max_level: self.settings.max_level,
            tile_width: self.settings.tile_width,
        }
    }
}

/// Median spacing between consecutive depths.
///
/// Zero and negative deltas (duplicates, out-of-order samples) are ignored;
/// returns `None` when no positive spacing remains.
pub fn estimate_base_resolution(sample: &[Row]) -> Option<f64> {
    let mut deltas: Vec<f64> = sample
        .windows(2)
        .map(|pair| pair[1].depth - pair[0].depth)
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();

    if deltas.is_empty() {
        return None;
    }

    deltas.sort_by(f64::total_cmp);
    let mid = deltas.len() / 2;
    let median = if deltas.len() % 2 == 0 {
        (deltas[mid - 1] + deltas[mid]) / 2.0
    } else {
        deltas[mid]
    };
    Some(median)
}
