use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub influx: InfluxSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct InfluxSettings {
    pub host: String,
    pub token: String,
    pub database: String,
    pub retention_policy: String,
    #[serde(default = "default_measurement")]
    pub measurement: String,
    #[serde(default = "default_version_measurement")]
    pub version_measurement: String,
}

/// Tunables for level selection, tile layout and the single-flight lock.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowSettings {
    pub budget_factor: f64,
    pub min_budget: u64,
    pub max_budget: u64,
    pub tile_width: f64,
    pub max_level: u32,
    pub default_base_resolution: f64,
    /// Number of leading rows used to estimate base resolution.
    pub resolution_sample_size: usize,
    /// Floor on the number of points kept per built tile.
    pub min_tile_points: usize,
    pub meta_ttl_secs: u64,
    pub tile_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_wait_ms: u64,
    pub max_wait_loops: u32,
    pub refresh_after_ms: u64,
    /// Depth tolerance for merging raw rows over decimated ones. Two rows whose
    /// depths round to the same multiple of this value are the same sample.
    pub merge_epsilon: f64,
    /// Upper bound on tiles a single window may span.
    pub max_tiles: usize,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            budget_factor: 2.0,
            min_budget: 500,
            max_budget: 12_000,
            tile_width: 200.0,
            max_level: 8,
            default_base_resolution: 1.0,
            resolution_sample_size: 600,
            min_tile_points: 50,
            meta_ttl_secs: 24 * 60 * 60,
            tile_ttl_secs: 60 * 60,
            lock_ttl_secs: 12,
            lock_wait_ms: 120,
            max_wait_loops: 25,
            refresh_after_ms: 600,
            merge_epsilon: 1e-6,
            max_tiles: 4_096,
        }
    }
}

impl WindowSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.tile_width.is_finite() || self.tile_width <= 0.0 {
            anyhow::bail!("window.tile_width must be finite and > 0, got {}", self.tile_width);
        }
        if !self.budget_factor.is_finite() || self.budget_factor <= 0.0 {
            anyhow::bail!(
                "window.budget_factor must be finite and > 0, got {}",
                self.budget_factor
            );
        }
        if self.min_budget > self.max_budget {
            anyhow::bail!(
                "window.min_budget ({}) exceeds window.max_budget ({})",
                self.min_budget,
                self.max_budget
            );
        }
        if !self.merge_epsilon.is_finite() || self.merge_epsilon <= 0.0 {
            anyhow::bail!(
                "window.merge_epsilon must be finite and > 0, got {}",
                self.merge_epsilon
            );
        }
        if self.max_tiles == 0 {
            anyhow::bail!("window.max_tiles must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_measurement() -> String {
    "curve_rows".to_string()
}

fn default_version_measurement() -> String {
    "curve_versions".to_string()
}

pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/welllog").required(false))
        .add_source(config::Environment::with_prefix("WELLLOG").separator("__"))
        .build()?;

    let config: AppConfig = settings.try_deserialize()?;
    config.window.validate()?;
    Ok(config)
}
