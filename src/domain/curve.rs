// Curve domain models
use serde::{Deserialize, Serialize};

/// A single sample of a well-log curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub depth: f64,
    pub value: f64,
}

impl Row {
    pub fn new(depth: f64, value: f64) -> Self {
        Self { depth, value }
    }

    pub fn is_finite(&self) -> bool {
        self.depth.is_finite() && self.value.is_finite()
    }

    /// Exact (depth, value) equality, used when collapsing consecutive duplicates.
    pub fn same_sample(&self, other: &Row) -> bool {
        self.depth == other.depth && self.value == other.value
    }
}

/// Per-(well, metric) metadata driving level selection and tile layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesMetadata {
    pub well_id: String,
    pub metric: String,
    pub version: i64,
    pub base_resolution: f64,
    pub max_level: u32,
    pub tile_width: f64,
}

/// Cached body of one pyramid tile.
///
/// Identity (well, metric, version, level, bounds) lives in the cache key, so
/// the payload only carries the rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TilePayload {
    pub rows: Vec<Row>,
}

impl TilePayload {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Decode cached bytes, rejecting anything that is not finite and
    /// strictly ascending by depth (equal depths allowed only with distinct values).
    pub fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        let payload: TilePayload = serde_json::from_slice(bytes)?;
        payload.validate()?;
        Ok(payload)
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Some(row) = self.rows.iter().find(|r| !r.is_finite()) {
            anyhow::bail!("tile payload contains non-finite row {:?}", row);
        }
        for pair in self.rows.windows(2) {
            if pair[1].depth < pair[0].depth || pair[1].same_sample(&pair[0]) {
                anyhow::bail!(
                    "tile payload is not ordered at depth {} -> {}",
                    pair[0].depth,
                    pair[1].depth
                );
            }
        }
        Ok(())
    }
}

/// A resolved tile of the level-of-detail pyramid.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub well_id: String,
    pub metric: String,
    pub version: i64,
    pub level: u32,
    pub tile_start: f64,
    pub tile_end: f64,
    pub rows: Vec<Row>,
}
