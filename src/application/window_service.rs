// Window service - Assembles downsampled curve windows from cached tiles
use crate::application::cache_store::CacheStore;
use crate::application::downsample::{dedupe_consecutive, downsample_minmax};
use crate::application::keys::{
    enumerate_tiles, lock_key, tile_bounds_for_window, tile_count, tile_key, TileBounds,
};
use crate::application::level_selector::LevelSelector;
use crate::application::meta_store::MetaStore;
use crate::application::row_source::{RowSource, VersionSource};
use crate::application::tile_lock::{SingleFlightTileLock, TileOutcome};
use crate::domain::curve::{Row, SeriesMetadata, Tile, TilePayload};
use crate::domain::error::WindowError;
use crate::domain::window::{
    Completeness, PlanResult, RefreshHint, Source, WindowRequest, WindowResult,
};
use crate::infrastructure::config::WindowSettings;
use anyhow::Context;
use futures::future::{join_all, try_join_all};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const FALLBACK_MERGE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TileStatus {
    Hit,
    Miss,
    TimedOut,
}

struct ResolvedTile {
    tile: Tile,
    status: TileStatus,
}

pub struct WindowService {
    meta: MetaStore,
    tiles: SingleFlightTileLock,
    rows: Arc<dyn RowSource>,
    cache: Arc<dyn CacheStore>,
    selector: LevelSelector,
    settings: WindowSettings,
}

impl WindowService {
    pub fn new(
        rows: Arc<dyn RowSource>,
        versions: Arc<dyn VersionSource>,
        cache: Arc<dyn CacheStore>,
        settings: WindowSettings,
    ) -> Self {
        let meta = MetaStore::new(cache.clone(), versions, rows.clone(), settings.clone());
        let tiles = SingleFlightTileLock::new(
            cache.clone(),
            Duration::from_secs(settings.lock_ttl_secs),
            Duration::from_secs(settings.tile_ttl_secs),
        );
        Self {
            meta,
            tiles,
            rows,
            cache,
            selector: LevelSelector::from_settings(&settings),
            settings,
        }
    }

    /// Curve rows for the requested depth range, decimated to fit the pixel width.
    pub async fn fetch_window(&self, request: &WindowRequest) -> Result<WindowResult, WindowError> {
        request.validate()?;
        let (lo, hi) = request.depth_bounds();

        let meta = self
            .meta
            .get_or_build(&request.well_id, &request.metric)
            .await;
        let choice = self.selector.choose_level(
            request.from_depth,
            request.to_depth,
            request.pixel_width,
            meta.base_resolution,
            meta.max_level,
        );
        let bounds = self.tile_grid(lo, hi, meta.tile_width)?;

        let resolved = try_join_all(
            bounds
                .iter()
                .map(|b| self.resolve_tile(&meta, choice.level, *b)),
        )
        .await
        .map_err(WindowError::RowSource)?;

        let tiles_total = resolved.len();
        let tiles_hit = count(&resolved, TileStatus::Hit);
        let timeouts = count(&resolved, TileStatus::TimedOut);
        let tiles_miss = tiles_total - tiles_hit;

        let mut rows: Vec<Row> = resolved.into_iter().flat_map(|r| r.tile.rows).collect();
        rows.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        dedupe_consecutive(&mut rows);
        rows.retain(|r| r.depth >= lo && r.depth <= hi);

        let mut refine_failed = false;
        let raw = if choice.level > 0 || tiles_miss > 0 {
            match self
                .rows
                .fetch_raw_rows(&request.well_id, &request.metric, lo, hi)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        "Raw refinement failed for {}/{} [{}, {}]: {:#}",
                        request.well_id,
                        request.metric,
                        lo,
                        hi,
                        e
                    );
                    refine_failed = true;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut rows = merge_prefer_raw(rows, raw, lo, hi, self.merge_epsilon());
        let budget = choice.budget as usize;
        if rows.len() > budget.saturating_mul(3) {
            rows = downsample_minmax(rows, budget.saturating_mul(2));
        }

        let partial = tiles_miss > 0 || timeouts > 0 || refine_failed;
        let completeness = if partial {
            Completeness::Partial
        } else {
            Completeness::Complete
        };
        let refresh = if partial {
            RefreshHint {
                recommended: true,
                after_ms: self.settings.refresh_after_ms,
                token: refresh_token(request),
            }
        } else {
            RefreshHint::none()
        };

        tracing::debug!(
            "Window {}/{} [{}, {}] L{}: {} rows, {}/{} tiles cached, {} timeouts",
            request.well_id,
            request.metric,
            lo,
            hi,
            choice.level,
            rows.len(),
            tiles_hit,
            tiles_total,
            timeouts
        );

        Ok(WindowResult {
            rows,
            level: choice.level,
            tiles_total,
            tiles_hit,
            tiles_miss,
            completeness,
            source: Source::from_counts(tiles_hit, tiles_miss),
            refresh,
        })
    }

    /// What `fetch_window` would do for this request, without building tiles.
    pub async fn plan_window(&self, request: &WindowRequest) -> Result<PlanResult, WindowError> {
        request.validate()?;
        let (lo, hi) = request.depth_bounds();

        let meta = self
            .meta
            .get_or_build(&request.well_id, &request.metric)
            .await;
        let choice = self.selector.choose_level(
            request.from_depth,
            request.to_depth,
            request.pixel_width,
            meta.base_resolution,
            meta.max_level,
        );
        let bounds = self.tile_grid(lo, hi, meta.tile_width)?;

        let meta = &meta;
        let present = join_all(bounds.iter().map(|b| async move {
            let key = tile_key(&meta.well_id, &meta.metric, meta.version, choice.level, *b);
            match self.cache.exists(&key).await {
                Ok(exists) => exists,
                Err(e) => {
                    tracing::warn!("Tile existence check failed for {}: {:#}", key, e);
                    false
                }
            }
        }))
        .await;

        let tiles_total = present.len();
        let tiles_hit = present.iter().filter(|p| **p).count();
        let tiles_miss = tiles_total - tiles_hit;

        Ok(PlanResult {
            level: choice.level,
            estimated_points: choice.estimated_points,
            point_budget: choice.budget,
            tile_width: meta.tile_width,
            tiles_total,
            tiles_hit,
            tiles_miss,
            source: Source::from_counts(tiles_hit, tiles_miss),
            version: meta.version,
            base_resolution: meta.base_resolution,
        })
    }

    /// Drop cached metadata so a re-uploaded series is served at its new version.
    pub async fn invalidate_series(&self, well_id: &str, metric: &str) -> anyhow::Result<()> {
        self.meta.invalidate(well_id, metric).await
    }

    async fn resolve_tile(
        &self,
        meta: &SeriesMetadata,
        level: u32,
        bounds: TileBounds,
    ) -> anyhow::Result<ResolvedTile> {
        let key = tile_key(&meta.well_id, &meta.metric, meta.version, level, bounds);
        let lock = lock_key(&key);

        let outcome = self
            .tiles
            .get_or_build_tile(
                &key,
                &lock,
                || self.build_tile(&meta.well_id, &meta.metric, level, bounds),
                Duration::from_millis(self.settings.lock_wait_ms),
                self.settings.max_wait_loops,
            )
            .await?;

        let (payload, status) = match outcome {
            TileOutcome::Hit(p) | TileOutcome::Waited(p) => (p, TileStatus::Hit),
            TileOutcome::Built(p) => (p, TileStatus::Miss),
            TileOutcome::TimedOut => {
                tracing::debug!("Lock wait expired for {}, fetching directly", key);
                let p = self
                    .build_tile(&meta.well_id, &meta.metric, level, bounds)
                    .await?;
                (p, TileStatus::TimedOut)
            }
        };

        let tile = Tile {
            well_id: meta.well_id.clone(),
            metric: meta.metric.clone(),
            version: meta.version,
            level,
            tile_start: bounds.start,
            tile_end: bounds.end,
            rows: payload.rows,
        };
        tracing::debug!(
            "Tile {}/{} v{} L{} [{}, {}]: {:?}, {} rows",
            tile.well_id,
            tile.metric,
            tile.version,
            tile.level,
            tile.tile_start,
            tile.tile_end,
            status,
            tile.rows.len()
        );

        Ok(ResolvedTile { tile, status })
    }

    async fn build_tile(
        &self,
        well_id: &str,
        metric: &str,
        level: u32,
        bounds: TileBounds,
    ) -> anyhow::Result<TilePayload> {
        let mut raw = self
            .rows
            .fetch_raw_rows(well_id, metric, bounds.start, bounds.end)
            .await
            .with_context(|| {
                format!(
                    "Failed to fetch rows for {}/{} [{}, {}]",
                    well_id, metric, bounds.start, bounds.end
                )
            })?;

        raw.retain(Row::is_finite);
        raw.sort_by(|a, b| a.depth.total_cmp(&b.depth));
        dedupe_consecutive(&mut raw);

        let decimated = raw.len().checked_shr(level).unwrap_or(0);
        let target = decimated.max(self.settings.min_tile_points);
        Ok(TilePayload::new(downsample_minmax(raw, target)))
    }

    /// Grid tiles covering `[lo, hi]`, refusing windows wider than `max_tiles`
    /// before anything is allocated or fetched.
    fn tile_grid(&self, lo: f64, hi: f64, tile_width: f64) -> Result<Vec<TileBounds>, WindowError> {
        let window = tile_bounds_for_window(lo, hi, tile_width);
        match tile_count(window.start, window.end, tile_width) {
            Some(count) if count <= self.settings.max_tiles => {
                Ok(enumerate_tiles(window.start, window.end, tile_width))
            }
            Some(count) => Err(WindowError::invalid_range(format!(
                "[{}, {}] spans {} tiles of width {}, limit is {}",
                lo, hi, count, tile_width, self.settings.max_tiles
            ))),
            None => Err(WindowError::invalid_range(format!(
                "[{}, {}] cannot be split into tiles of width {}",
                lo, hi, tile_width
            ))),
        }
    }

    fn merge_epsilon(&self) -> f64 {
        let epsilon = self.settings.merge_epsilon;
        if epsilon.is_finite() && epsilon > 0.0 {
            epsilon
        } else {
            FALLBACK_MERGE_EPSILON
        }
    }
}

fn count(resolved: &[ResolvedTile], status: TileStatus) -> usize {
    resolved.iter().filter(|r| r.status == status).count()
}

/// Merge decimated and raw rows into one depth-ordered sequence.
///
/// Depths are bucketed to multiples of `epsilon`; a raw row replaces any
/// decimated row in the same bucket. Raw rows outside `[lo, hi]` or with
/// non-finite values are skipped.
pub fn merge_prefer_raw(
    decimated: Vec<Row>,
    raw: Vec<Row>,
    lo: f64,
    hi: f64,
    epsilon: f64,
) -> Vec<Row> {
    let mut index: BTreeMap<DepthKey, Row> = BTreeMap::new();
    for row in decimated {
        index.insert(depth_key(row.depth, epsilon), row);
    }
    for row in raw
        .into_iter()
        .filter(|r| r.is_finite() && r.depth >= lo && r.depth <= hi)
    {
        index.insert(depth_key(row.depth, epsilon), row);
    }
    index.into_values().collect()
}

/// Depth bucket in units of `epsilon`. Buckets that overflow `i64` keep their
/// float value and sort below or above every fixed-point bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DepthKey {
    Below(OrderedDepth),
    Fixed(i64),
    Above(OrderedDepth),
}

#[derive(Debug, Clone, Copy)]
struct OrderedDepth(f64);

impl PartialEq for OrderedDepth {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0).is_eq()
    }
}

impl Eq for OrderedDepth {}

impl PartialOrd for OrderedDepth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedDepth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

// 2^63; i64::MAX itself is not representable as f64
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn depth_key(depth: f64, epsilon: f64) -> DepthKey {
    let scaled = (depth / epsilon).round() + 0.0;
    if scaled >= -I64_BOUND && scaled < I64_BOUND {
        DepthKey::Fixed(scaled as i64)
    } else if scaled < 0.0 {
        DepthKey::Below(OrderedDepth(scaled))
    } else {
        DepthKey::Above(OrderedDepth(scaled))
    }
}

/// Stable token identifying the logical request, for safe client retries.
fn refresh_token(request: &WindowRequest) -> String {
    let canonical = format!(
        "{}|{}|{}|{}|{}",
        request.well_id, request.metric, request.from_depth, request.to_depth, request.pixel_width
    );
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{
        CountingRowSource, ScriptedVersionSource, UnavailableCacheStore,
    };
    use crate::infrastructure::memory_cache::MemoryCacheStore;

    fn fast_settings() -> WindowSettings {
        WindowSettings {
            lock_wait_ms: 10,
            max_wait_loops: 200,
            ..WindowSettings::default()
        }
    }

    fn service(
        rows: Arc<CountingRowSource>,
        versions: Arc<ScriptedVersionSource>,
        cache: Arc<dyn CacheStore>,
        settings: WindowSettings,
    ) -> WindowService {
        WindowService::new(rows, versions, cache, settings)
    }

    /// 0 to 2000 ft at half-foot spacing
    fn half_foot_curve() -> Arc<CountingRowSource> {
        Arc::new(CountingRowSource::uniform(0.0, 0.5, 4001))
    }

    fn assert_well_formed(result: &WindowResult, from: f64, to: f64) {
        let (lo, hi) = (from.min(to), from.max(to));
        assert!(!result.rows.is_empty());
        for pair in result.rows.windows(2) {
            assert!(
                pair[0].depth < pair[1].depth,
                "rows not ascending at {} -> {}",
                pair[0].depth,
                pair[1].depth
            );
        }
        assert!(result.rows.iter().all(|r| r.depth >= lo && r.depth <= hi));
    }

    #[tokio::test]
    async fn test_first_fetch_fresh_then_cached() {
        let cache = Arc::new(MemoryCacheStore::new(1024));
        let svc = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            cache.clone(),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 1200.0);

        let first = svc.fetch_window(&request).await.unwrap();
        assert_eq!(first.level, 0);
        assert_eq!(first.tiles_total, 1);
        assert_eq!(first.tiles_miss, 1);
        assert_eq!(first.source, Source::Fresh);
        assert_eq!(first.completeness, Completeness::Partial);
        assert!(first.refresh.recommended);
        assert_eq!(first.refresh.after_ms, 600);
        assert_eq!(first.refresh.token.len(), 16);
        assert_eq!(first.rows.len(), 401);
        assert_well_formed(&first, 1000.0, 1200.0);
        assert!(cache.exists("tile:W-1:GR:v1:L0:1000-1200").await.unwrap());

        let second = svc.fetch_window(&request).await.unwrap();
        assert_eq!(second.tiles_hit, 1);
        assert_eq!(second.source, Source::Cached);
        assert_eq!(second.completeness, Completeness::Complete);
        assert_eq!(second.refresh, RefreshHint::none());
        assert_eq!(second.rows, first.rows);
    }

    #[tokio::test]
    async fn test_reversed_unaligned_request_is_sorted_and_cropped() {
        let svc = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 1733.3, 250.7, 300.0);

        for _ in 0..2 {
            let result = svc.fetch_window(&request).await.unwrap();
            assert_eq!(result.level, 3);
            assert_eq!(result.tiles_total, 8);
            assert!(result.rows.len() <= 3 * 600);
            assert_well_formed(&result, 1733.3, 250.7);
        }
    }

    #[tokio::test]
    async fn test_dense_window_respects_budget_cap() {
        let rows = Arc::new(CountingRowSource::uniform(0.0, 0.01, 200_001));
        let svc = service(
            rows,
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 0.0, 2000.0, 250.0);

        let result = svc.fetch_window(&request).await.unwrap();
        assert_eq!(result.level, 8);
        assert!(result.rows.len() <= 3 * 500);
        assert_well_formed(&result, 0.0, 2000.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_requests_fetch_tile_once() {
        let rows = Arc::new(
            CountingRowSource::uniform(0.0, 0.5, 4001).with_delay(Duration::from_millis(30)),
        );
        let svc = Arc::new(service(
            rows.clone(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        ));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move {
                    let request = WindowRequest::new("W-1", "GR", 1010.0, 1190.0, 1200.0);
                    svc.fetch_window(&request).await.unwrap()
                })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.tiles_total, 1);
            assert_well_formed(&result, 1010.0, 1190.0);
        }
        assert_eq!(rows.calls_for(1000.0, 1200.0), 1);
        // only the builder saw a miss, so only it refines against raw rows
        assert_eq!(rows.calls_for(1010.0, 1190.0), 1);
    }

    #[tokio::test]
    async fn test_version_bump_makes_old_tiles_unreachable() {
        let versions = Arc::new(ScriptedVersionSource::new(1));
        let svc = service(
            half_foot_curve(),
            versions.clone(),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 1200.0);

        svc.fetch_window(&request).await.unwrap();
        assert_eq!(svc.fetch_window(&request).await.unwrap().tiles_hit, 1);

        versions.bump();
        svc.invalidate_series("W-1", "GR").await.unwrap();

        let result = svc.fetch_window(&request).await.unwrap();
        assert_eq!(result.tiles_miss, 1);
        assert_eq!(result.source, Source::Fresh);
    }

    #[tokio::test]
    async fn test_held_lock_falls_back_to_partial_result() {
        let cache = Arc::new(MemoryCacheStore::new(1024));
        cache
            .set_if_absent(
                "lock:tile:W-1:GR:v1:L0:1000-1200",
                b"stuck builder".to_vec(),
                Duration::from_secs(12),
            )
            .await
            .unwrap();
        let settings = WindowSettings {
            lock_wait_ms: 5,
            max_wait_loops: 3,
            ..WindowSettings::default()
        };
        let svc = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            cache.clone(),
            settings,
        );

        let result = svc
            .fetch_window(&WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 1200.0))
            .await
            .unwrap();
        assert_eq!(result.completeness, Completeness::Partial);
        assert_eq!(result.tiles_miss, 1);
        assert!(result.refresh.recommended);
        assert_eq!(result.rows.len(), 401);
        assert_well_formed(&result, 1000.0, 1200.0);
        // the fallback never writes the tile behind the lock holder's back
        assert!(!cache.exists("tile:W-1:GR:v1:L0:1000-1200").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_cache_still_serves_correct_rows() {
        let request = WindowRequest::new("W-1", "GR", 123.4, 987.6, 400.0);

        let healthy = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        )
        .fetch_window(&request)
        .await
        .unwrap();

        let degraded = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(UnavailableCacheStore),
            fast_settings(),
        )
        .fetch_window(&request)
        .await
        .unwrap();

        assert_eq!(degraded.rows, healthy.rows);
        assert_eq!(degraded.source, Source::Fresh);
        assert_eq!(degraded.completeness, Completeness::Partial);
    }

    #[tokio::test]
    async fn test_row_source_failure_is_propagated_and_not_cached() {
        let rows = half_foot_curve();
        let cache = Arc::new(MemoryCacheStore::new(1024));
        let svc = service(
            rows.clone(),
            Arc::new(ScriptedVersionSource::new(1)),
            cache.clone(),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 1200.0);
        // warm metadata first so the failure hits tile construction
        svc.plan_window(&request).await.unwrap();

        rows.set_failing(true);
        let err = svc.fetch_window(&request).await.unwrap_err();
        assert!(matches!(err, WindowError::RowSource(_)));
        assert!(!cache.exists("tile:W-1:GR:v1:L0:1000-1200").await.unwrap());
        assert!(!cache.exists("lock:tile:W-1:GR:v1:L0:1000-1200").await.unwrap());

        rows.set_failing(false);
        assert_eq!(svc.fetch_window(&request).await.unwrap().tiles_miss, 1);
    }

    #[tokio::test]
    async fn test_invalid_range_touches_nothing() {
        let rows = half_foot_curve();
        let versions = Arc::new(ScriptedVersionSource::new(1));
        let svc = service(
            rows.clone(),
            versions.clone(),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        );

        let err = svc
            .fetch_window(&WindowRequest::new("W-1", "GR", f64::NAN, 1200.0, 800.0))
            .await
            .unwrap_err();
        assert!(matches!(err, WindowError::InvalidRange { .. }));
        assert!(svc
            .plan_window(&WindowRequest::new("W-1", "", 0.0, 1200.0, 800.0))
            .await
            .is_err());
        assert_eq!(rows.total_calls(), 0);
        assert_eq!(versions.calls(), 0);
    }

    #[tokio::test]
    async fn test_window_wider_than_tile_limit_is_rejected() {
        let rows = half_foot_curve();
        let svc = service(
            rows.clone(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            fast_settings(),
        );

        for to_depth in [1e12, 1e300] {
            let request = WindowRequest::new("W-1", "GR", 0.0, to_depth, 800.0);
            let err = svc.fetch_window(&request).await.unwrap_err();
            assert!(matches!(err, WindowError::InvalidRange { .. }), "{err}");
            let err = svc.plan_window(&request).await.unwrap_err();
            assert!(matches!(err, WindowError::InvalidRange { .. }), "{err}");
        }
        assert_eq!(rows.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_window_at_tile_limit_is_served() {
        let settings = WindowSettings {
            max_tiles: 10,
            ..fast_settings()
        };
        let svc = service(
            half_foot_curve(),
            Arc::new(ScriptedVersionSource::new(1)),
            Arc::new(MemoryCacheStore::new(1024)),
            settings,
        );

        let plan = svc
            .plan_window(&WindowRequest::new("W-1", "GR", 0.0, 2000.0, 800.0))
            .await
            .unwrap();
        assert_eq!(plan.tiles_total, 10);

        let err = svc
            .plan_window(&WindowRequest::new("W-1", "GR", 0.0, 2000.5, 800.0))
            .await
            .unwrap_err();
        assert!(matches!(err, WindowError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn test_plan_reports_without_building() {
        let rows = half_foot_curve();
        let cache = Arc::new(MemoryCacheStore::new(1024));
        let svc = service(
            rows.clone(),
            Arc::new(ScriptedVersionSource::new(5)),
            cache.clone(),
            fast_settings(),
        );
        let request = WindowRequest::new("W-1", "GR", 950.0, 1250.0, 1200.0);

        let plan = svc.plan_window(&request).await.unwrap();
        assert_eq!(plan.level, 0);
        assert_eq!(plan.point_budget, 2400);
        assert_eq!(plan.estimated_points, 600);
        assert_eq!(plan.tiles_total, 3);
        assert_eq!(plan.tiles_miss, 3);
        assert_eq!(plan.source, Source::Fresh);
        assert_eq!(plan.version, 5);
        assert_eq!(plan.base_resolution, 0.5);
        assert_eq!(plan.tile_width, 200.0);
        assert_eq!(rows.total_calls(), 0);
        assert!(!cache.exists("tile:W-1:GR:v5:L0:800-1000").await.unwrap());

        svc.fetch_window(&request).await.unwrap();
        let plan = svc.plan_window(&request).await.unwrap();
        assert_eq!(plan.tiles_hit, 3);
        assert_eq!(plan.source, Source::Cached);
    }

    #[tokio::test]
    async fn test_refresh_token_is_deterministic() {
        let make = || {
            service(
                half_foot_curve(),
                Arc::new(ScriptedVersionSource::new(1)),
                Arc::new(MemoryCacheStore::new(1024)),
                fast_settings(),
            )
        };
        let request = WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 1200.0);

        let a = make().fetch_window(&request).await.unwrap();
        let b = make().fetch_window(&request).await.unwrap();
        assert_eq!(a.refresh.token, b.refresh.token);

        let other = WindowRequest::new("W-1", "GR", 1000.0, 1200.0, 600.0);
        let c = make().fetch_window(&other).await.unwrap();
        assert_ne!(a.refresh.token, c.refresh.token);
    }

    #[test]
    fn test_merge_prefers_raw_within_epsilon() {
        let decimated = vec![Row::new(1.0, 5.0), Row::new(2.0, 9.0)];
        let raw = vec![
            Row::new(1.000_000_000_1, 7.0),
            Row::new(1.5, 6.0),
            Row::new(3.0, 1.0),
        ];
        let merged = merge_prefer_raw(decimated, raw, 0.0, 2.5, 1e-6);
        assert_eq!(
            merged,
            vec![
                Row::new(1.000_000_000_1, 7.0),
                Row::new(1.5, 6.0),
                Row::new(2.0, 9.0),
            ]
        );
    }

    #[test]
    fn test_merge_epsilon_controls_collisions() {
        let decimated = vec![Row::new(10.0, 1.0)];
        let raw = vec![Row::new(10.004, 2.0)];
        assert_eq!(
            merge_prefer_raw(decimated.clone(), raw.clone(), 0.0, 20.0, 1e-6).len(),
            2
        );
        assert_eq!(merge_prefer_raw(decimated, raw, 0.0, 20.0, 0.01).len(), 1);
    }

    #[test]
    fn test_merge_keeps_depths_beyond_fixed_point_range() {
        let raw = vec![
            Row::new(1e13, 1.0),
            Row::new(2e13, 2.0),
            Row::new(3e13, 3.0),
        ];
        let merged = merge_prefer_raw(Vec::new(), raw.clone(), 0.0, 1e14, 1e-6);
        assert_eq!(merged, raw);
    }

    #[test]
    fn test_merge_orders_mixed_magnitudes() {
        let decimated = vec![Row::new(-2e13, 0.5), Row::new(5.0, 1.0)];
        let raw = vec![Row::new(5.0, 2.0), Row::new(4e13, 3.0), Row::new(-1.0, 4.0)];
        let merged = merge_prefer_raw(decimated, raw, -1e14, 1e14, 1e-6);
        assert_eq!(
            merged,
            vec![
                Row::new(-2e13, 0.5),
                Row::new(-1.0, 4.0),
                Row::new(5.0, 2.0),
                Row::new(4e13, 3.0),
            ]
        );
    }
}
