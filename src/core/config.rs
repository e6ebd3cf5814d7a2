//! Engine configuration loaded once at startup

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::ingest::IngestConfig;
use crate::streaming::resident::ResidencyConfig;
use crate::streaming::lod::{DecimationStrategy, LodLevel, LodTable, DEFAULT_LOD_LEVELS};

/// Configuration for the spatial engine.
///
/// Every field has a default, so a JSON file only needs the overrides:
/// ```
/// let config = helixcloud::core::EngineConfig::from_json(r#"{ "cell_size": 25.0 }"#).unwrap();
/// assert_eq!(config.cell_size, 25.0);
/// assert_eq!(config.pool_capacity, 50_000);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Voxel edge length in world units
    pub cell_size: f32,
    /// Multiplier on the sqrt(position) spiral radius
    pub radius_scale: f32,
    /// Distance bands and keep ratios, nearest first
    pub lod_levels: Vec<LodLevel>,
    /// How voxels are thinned at coarser LOD levels
    pub decimation: DecimationStrategy,
    /// Frustum plane tolerance as a fraction of the cell size
    pub plane_epsilon_factor: f32,
    /// Particles per pooled ingestion buffer
    pub pool_capacity: usize,
    /// Particles the per-frame arena can hold
    pub frame_particle_budget: usize,
    /// Relative error under which a batch estimate counts as accurate
    pub batch_tolerance: f32,
    /// Soft cap on reserved pool/arena memory, in megabytes
    pub memory_budget_mb: usize,
    /// Background ingestion settings
    pub ingest: IngestConfig,
    /// Camera-driven residency settings
    pub residency: ResidencyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            radius_scale: 1.0,
            lod_levels: DEFAULT_LOD_LEVELS.to_vec(),
            decimation: DecimationStrategy::default(),
            plane_epsilon_factor: 1e-3,
            pool_capacity: 50_000,
            frame_particle_budget: 2_000_000,
            batch_tolerance: 0.05,
            memory_budget_mb: 2048,
            ingest: IngestConfig::default(),
            residency: ResidencyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON config string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check invariants that the engine relies on
    pub fn validate(&self) -> Result<()> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(Error::InvalidCellSize(self.cell_size));
        }
        if !self.radius_scale.is_finite() || self.radius_scale <= 0.0 {
            return Err(Error::Config(format!("radius_scale must be > 0, got {}", self.radius_scale)));
        }
        if !self.plane_epsilon_factor.is_finite() || self.plane_epsilon_factor < 0.0 {
            return Err(Error::Config(format!(
                "plane_epsilon_factor must be >= 0, got {}",
                self.plane_epsilon_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.batch_tolerance) {
            return Err(Error::Config(format!(
                "batch_tolerance must be in [0, 1], got {}",
                self.batch_tolerance
            )));
        }
        if self.pool_capacity == 0 {
            return Err(Error::Config("pool_capacity must be > 0".into()));
        }
        if self.frame_particle_budget == 0 {
            return Err(Error::Config("frame_particle_budget must be > 0".into()));
        }
        self.ingest.validate()?;
        self.residency.validate()?;
        if self.ingest.chunk_size > self.pool_capacity {
            return Err(Error::Config(format!(
                "ingest.chunk_size ({}) exceeds pool_capacity ({})",
                self.ingest.chunk_size, self.pool_capacity
            )));
        }
        LodTable::new(self.lod_levels.clone())?;
        Ok(())
    }

    /// Build the validated LOD table
    pub fn lod_table(&self) -> Result<LodTable> {
        LodTable::new(self.lod_levels.clone())
    }

    /// Absolute frustum plane tolerance for this cell size
    pub fn plane_epsilon(&self) -> f32 {
        self.cell_size * self.plane_epsilon_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use crate::streaming::resident::EvictionPolicy;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cell_size, 10.0);
        assert!((config.plane_epsilon() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{ "cell_size": 4.0, "ingest": { "workers": 2 } }"#).unwrap();
        assert_eq!(config.cell_size, 4.0);
        assert_eq!(config.ingest.workers, 2);
        assert_eq!(config.ingest.channel_capacity, IngestConfig::default().channel_capacity);
        assert_eq!(config.lod_levels, DEFAULT_LOD_LEVELS.to_vec());
    }

    #[test]
    fn test_json_roundtrip_preserves_config() {
        let mut config = EngineConfig::default();
        config.decimation = DecimationStrategy::Stride;
        config.cell_size = 2.5;
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_rejects_bad_cell_size() {
        let err = EngineConfig::from_json(r#"{ "cell_size": 0.0 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidCellSize(_)));
        let err = EngineConfig::from_json(r#"{ "cell_size": -3.0 }"#).unwrap_err();
        assert!(matches!(err, Error::InvalidCellSize(_)));
    }

    #[test]
    fn test_rejects_increasing_keep_ratio() {
        let json = r#"{ "lod_levels": [
            { "max_distance": 10.0, "keep_ratio": 0.5 },
            { "max_distance": 20.0, "keep_ratio": 0.9 }
        ] }"#;
        let err = EngineConfig::from_json(json).unwrap_err();
        assert!(matches!(err, Error::InvalidLodTable(_)));
    }

    #[test]
    fn test_rejects_chunk_larger_than_pool_buffer() {
        let json = r#"{ "pool_capacity": 100, "ingest": { "chunk_size": 1000 } }"#;
        assert!(matches!(EngineConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_residency_section() {
        let json = r#"{ "residency": { "stream_radius": 250.0, "eviction": "lru" } }"#;
        let config = EngineConfig::from_json(json).unwrap();
        assert_eq!(config.residency.stream_radius, 250.0);
        assert_eq!(config.residency.eviction, EvictionPolicy::Lru);
        assert_eq!(config.residency.unload_factor, 1.5);

        let json = r#"{ "residency": { "unload_factor": 0.5 } }"#;
        assert!(matches!(EngineConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(matches!(EngineConfig::from_json("{ cell_size: "), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "cell_size": 12.0, "frame_particle_budget": 1000 }}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.cell_size, 12.0);
        assert_eq!(config.frame_particle_budget, 1000);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::load(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
