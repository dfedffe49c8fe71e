//! Tiler configuration.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `DZI_*` environment variables. Command-line flags are applied last by the
//! binary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use dzi_common::{DziError, DziResult, ResampleFilter, TileFormat};

use crate::builder::{BuildOptions, DescendantPolicy};
use crate::raster::PasteMode;
use crate::rasterizer::DEFAULT_RASTERIZER;

/// Configuration shared by the pyramid and overlay commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerConfig {
    /// Tile edge length in pixels, overlap excluded.
    pub tile_size: u32,

    /// Pixels shared with each neighbouring tile.
    pub overlap: u32,

    /// Tile file format.
    pub format: TileFormat,

    /// Resampling filter for every resize.
    pub filter: ResampleFilter,

    /// Maximum number of tile tasks in flight.
    pub concurrency: usize,

    /// First level to generate.
    pub min_level: u32,

    /// Level the full-resolution image is placed at. Derived from the image
    /// size when unset.
    pub max_level: Option<u32>,

    /// Handling of tiles under a single-color tile.
    pub descendants: DescendantPolicy,

    /// How overlays are combined with existing tiles.
    pub paste: PasteMode,

    /// Page rasterizer program.
    pub rasterizer: String,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            overlap: 1,
            format: TileFormat::Png,
            filter: ResampleFilter::Antialias,
            concurrency: 2,
            min_level: 0,
            max_level: None,
            descendants: DescendantPolicy::Off,
            paste: PasteMode::Replace,
            rasterizer: DEFAULT_RASTERIZER.to_string(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> DziResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DziError::configuration(format!("{} has an invalid value: '{}'", name, value)))
}

impl TilerConfig {
    /// Defaults overridden by the environment.
    pub fn from_env() -> DziResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a YAML file. Missing keys keep their defaults.
    pub fn from_yaml(path: impl AsRef<Path>) -> DziResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DziError::io(path, e))?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            DziError::configuration(format!("failed to parse {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `DZI_*` environment variables on top of the current values.
    pub fn apply_env(&mut self) -> DziResult<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply variables from `lookup`, keyed by their environment names.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> DziResult<()> {
        if let Some(val) = lookup("DZI_TILE_SIZE") {
            self.tile_size = parse_var("DZI_TILE_SIZE", &val)?;
        }

        if let Some(val) = lookup("DZI_OVERLAP") {
            self.overlap = parse_var("DZI_OVERLAP", &val)?;
        }

        if let Some(val) = lookup("DZI_FORMAT") {
            self.format = val.parse()?;
        }

        if let Some(val) = lookup("DZI_FILTER") {
            self.filter = val.parse()?;
        }

        if let Some(val) = lookup("DZI_CONCURRENCY") {
            self.concurrency = parse_var("DZI_CONCURRENCY", &val)?;
        }

        if let Some(val) = lookup("DZI_RASTERIZER") {
            self.rasterizer = val;
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DziResult<()> {
        if self.tile_size == 0 {
            return Err(DziError::configuration("tile_size must be > 0"));
        }

        if self.overlap >= self.tile_size {
            return Err(DziError::configuration(format!(
                "overlap ({}) must be smaller than tile_size ({})",
                self.overlap, self.tile_size
            )));
        }

        if self.concurrency == 0 {
            return Err(DziError::configuration("concurrency must be > 0"));
        }

        if let Some(max_level) = self.max_level {
            if self.min_level > max_level {
                return Err(DziError::configuration(format!(
                    "min_level ({}) is above max_level ({})",
                    self.min_level, max_level
                )));
            }
        }

        if self.rasterizer.trim().is_empty() {
            return Err(DziError::configuration("rasterizer must name a program"));
        }

        Ok(())
    }

    /// Options for [`crate::PyramidBuilder`].
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            filter: self.filter,
            concurrency: self.concurrency,
            min_level: self.min_level,
            descendants: self.descendants,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TilerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tile_size, 256);
        assert_eq!(config.overlap, 1);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.rasterizer, "pdftoppm");
    }

    #[test]
    fn test_apply_vars() {
        let env = vars(&[
            ("DZI_TILE_SIZE", "512"),
            ("DZI_FORMAT", "jpg"),
            ("DZI_FILTER", "Bicubic"),
            ("DZI_CONCURRENCY", "8"),
        ]);
        let mut config = TilerConfig::default();
        config.apply_vars(|name| env.get(name).cloned()).unwrap();

        assert_eq!(config.tile_size, 512);
        assert_eq!(config.overlap, 1);
        assert_eq!(config.format, TileFormat::Jpg);
        assert_eq!(config.filter, ResampleFilter::Bicubic);
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_bad_variable_is_configuration_error() {
        let env = vars(&[("DZI_OVERLAP", "lots")]);
        let err = TilerConfig::default()
            .apply_vars(|name| env.get(name).cloned())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("DZI_OVERLAP"));
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = TilerConfig {
            overlap: 256,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.overlap = 1;
        config.concurrency = 0;
        assert!(config.validate().is_err());

        config.concurrency = 1;
        config.min_level = 5;
        config.max_level = Some(4);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiler.yaml");
        std::fs::write(&path, "tile_size: 510\ndescendants: skip\npaste: blend\nmax_level: 12\n").unwrap();

        let config = TilerConfig::from_yaml(&path).unwrap();
        assert_eq!(config.tile_size, 510);
        assert_eq!(config.descendants, DescendantPolicy::Skip);
        assert_eq!(config.paste, PasteMode::Blend);
        assert_eq!(config.max_level, Some(12));
        assert_eq!(config.format, TileFormat::Png);
    }
}
