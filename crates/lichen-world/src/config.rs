use serde::Deserialize;
use std::error::Error;
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, Deserialize)]
pub struct SmootherConfig {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub biomes: BiomeLists,
    #[serde(default)]
    pub performance: Performance,
    #[serde(default)]
    pub heightmap: Heightmap,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            general: General::default(),
            biomes: BiomeLists::default(),
            performance: Performance::default(),
            heightmap: Heightmap::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct General {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Biome size threshold in blocks; smaller connected components are
    /// replaced. Divided by 16 for biome-cell fills.
    #[serde(default = "default_threshold")]
    pub micro_biome_threshold: i32,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub performance_logging: bool,
}
fn default_enabled() -> bool {
    true
}
fn default_threshold() -> i32 {
    50
}
impl Default for General {
    fn default() -> Self {
        Self {
            enabled: true,
            micro_biome_threshold: default_threshold(),
            debug: false,
            performance_logging: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct BiomeLists {
    /// Biomes never removed.
    #[serde(default)]
    pub preserved: Vec<String>,
    /// Biomes never used as replacements.
    #[serde(default)]
    pub excluded_as_replacement: Vec<String>,
    /// Underground biomes skipped by surface projection.
    #[serde(default)]
    pub caves: Vec<String>,
    /// Preserve small patches of village-bearing biome families.
    #[serde(default = "default_preserve_villages")]
    pub preserve_village_biomes: bool,
}
fn default_preserve_villages() -> bool {
    true
}
impl Default for BiomeLists {
    fn default() -> Self {
        Self {
            preserved: Vec::new(),
            excluded_as_replacement: Vec::new(),
            caves: Vec::new(),
            preserve_village_biomes: default_preserve_villages(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Performance {
    #[serde(default = "default_cache_mb")]
    pub max_cache_memory_mb: i32,
}
fn default_cache_mb() -> i32 {
    512
}
impl Default for Performance {
    fn default() -> Self {
        Self {
            max_cache_memory_mb: default_cache_mb(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Heightmap {
    /// Heightmap sample spacing in blocks; must divide 16.
    #[serde(default = "default_grid_spacing")]
    pub grid_spacing: i32,
}
fn default_grid_spacing() -> i32 {
    16
}
impl Default for Heightmap {
    fn default() -> Self {
        Self {
            grid_spacing: default_grid_spacing(),
        }
    }
}

/// Flattened, validated snapshot of the config used in hot paths.
#[derive(Clone, Debug)]
pub struct SmootherParams {
    pub enabled: bool,
    pub micro_biome_threshold: i32,
    pub max_cache_memory_bytes: u64,
    pub grid_spacing: i32,
    pub preserved: Vec<String>,
    pub excluded_as_replacement: Vec<String>,
    pub caves: Vec<String>,
    pub preserve_village_biomes: bool,
    pub debug: bool,
    pub performance_logging: bool,
}

impl SmootherParams {
    pub fn default() -> Self {
        Self::from_config(&SmootherConfig::default())
    }

    pub fn from_config(cfg: &SmootherConfig) -> Self {
        let threshold = cfg.general.micro_biome_threshold;
        let threshold = if (10..=1000).contains(&threshold) {
            threshold
        } else {
            log::warn!(
                "micro_biome_threshold {} outside 10..=1000, clamping",
                threshold
            );
            threshold.clamp(10, 1000)
        };

        let cache_mb = cfg.performance.max_cache_memory_mb;
        let cache_mb = if (64..=4096).contains(&cache_mb) {
            cache_mb
        } else {
            log::warn!("max_cache_memory_mb {} outside 64..=4096, clamping", cache_mb);
            cache_mb.clamp(64, 4096)
        };

        let spacing = cfg.heightmap.grid_spacing;
        let spacing = if (4..=64).contains(&spacing) && 16 % spacing == 0 {
            spacing
        } else {
            log::warn!("grid_spacing {} invalid (must be 4..=64 and divide 16), using 16", spacing);
            16
        };

        Self {
            enabled: cfg.general.enabled,
            micro_biome_threshold: threshold,
            max_cache_memory_bytes: cache_mb as u64 * 1024 * 1024,
            grid_spacing: spacing,
            preserved: cfg.biomes.preserved.clone(),
            excluded_as_replacement: cfg.biomes.excluded_as_replacement.clone(),
            caves: cfg.biomes.caves.clone(),
            preserve_village_biomes: cfg.biomes.preserve_village_biomes,
            debug: cfg.general.debug,
            performance_logging: cfg.general.performance_logging,
        }
    }

    /// Micro cutoff in biome cells.
    #[inline]
    pub fn cell_threshold(&self) -> usize {
        (self.micro_biome_threshold / 16) as usize
    }
}

pub fn load_params_from_path(path: &Path) -> Result<SmootherParams, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: SmootherConfig = toml::from_str(&s)?;
    Ok(SmootherParams::from_config(&cfg))
}
