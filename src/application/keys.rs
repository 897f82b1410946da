// Cache key construction and tile enumeration

/// A `[start, end]` depth interval on the tile grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub start: f64,
    pub end: f64,
}

impl TileBounds {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Grid-aligned bounds covering `[min(from,to), max(from,to)]`.
///
/// A zero-width request sitting exactly on a grid line still gets one tile.
pub fn tile_bounds_for_window(from_depth: f64, to_depth: f64, tile_width: f64) -> TileBounds {
    debug_assert!(tile_width > 0.0);
    let lo = from_depth.min(to_depth);
    let hi = from_depth.max(to_depth);

    let start = normalize_zero((lo / tile_width).floor() * tile_width);
    let mut end = normalize_zero((hi / tile_width).ceil() * tile_width);
    if end <= start {
        end = start + tile_width;
    }
    TileBounds::new(start, end)
}

/// Consecutive `tile_width` windows covering `[start, end)`; the last one
/// ends exactly at `end`.
///
/// Yields nothing when [`tile_count`] cannot size the grid; callers bound the
/// count before enumerating.
pub fn enumerate_tiles(start: f64, end: f64, tile_width: f64) -> Vec<TileBounds> {
    let count = match tile_count(start, end, tile_width) {
        Some(count) => count,
        None => return Vec::new(),
    };

    // Tile edges are computed from the index so long ranges do not accumulate drift
    (0..count)
        .map(|i| {
            let tile_start = normalize_zero(start + i as f64 * tile_width);
            let tile_end = if i + 1 == count {
                end
            } else {
                normalize_zero(start + (i + 1) as f64 * tile_width)
            };
            TileBounds::new(tile_start, tile_end)
        })
        .collect()
}

/// Number of tiles [`enumerate_tiles`] yields for `[start, end)`.
///
/// `None` when the bounds or width are not finite, the width is not positive,
/// or the count does not fit in `usize`.
pub fn tile_count(start: f64, end: f64, tile_width: f64) -> Option<usize> {
    if !start.is_finite() || !end.is_finite() || !tile_width.is_finite() || tile_width <= 0.0 {
        return None;
    }
    if end <= start {
        return Some(0);
    }
    let count = ((end - start) / tile_width).round().max(1.0);
    if !count.is_finite() || count >= usize::MAX as f64 {
        return None;
    }
    Some(count as usize)
}

pub fn tile_key(
    well_id: &str,
    metric: &str,
    version: i64,
    level: u32,
    bounds: TileBounds,
) -> String {
    format!(
        "tile:{}:{}:v{}:L{}:{}-{}",
        well_id, metric, version, level, bounds.start, bounds.end
    )
}

/// Prefix shared by every single-flight lock key.
pub const LOCK_PREFIX: &str = "lock:";

pub fn lock_key(tile_key: &str) -> String {
    format!("{}{}", LOCK_PREFIX, tile_key)
}

pub fn meta_key(well_id: &str, metric: &str) -> String {
    format!("meta:{}:{}", well_id, metric)
}

// -0.0 would otherwise render as "-0" in keys
fn normalize_zero(value: f64) -> f64 {
    value + 0.0
}
