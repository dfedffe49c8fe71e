//! Error types for pyramid generation and overlay compositing.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tile::TileCoord;

/// Result type alias using DziError.
pub type DziResult<T> = Result<T, DziError>;

/// Primary error type for pyramid operations.
#[derive(Debug, Error)]
pub enum DziError {
    // === Configuration Errors ===
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    // === External Tool Errors ===
    #[error("External rasterizer failed for tile {coord}: {message}")]
    ExternalTool { coord: TileCoord, message: String },

    // === Pyramid Errors ===
    #[error("Pyramid is inconsistent: ancestor tile {coord} is missing")]
    PyramidInconsistency { coord: TileCoord },

    #[error("Invalid descriptor: {0}")]
    Descriptor(String),

    // === I/O Errors ===
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Raster error on {}: {message}", path.display())]
    Raster { path: PathBuf, message: String },

    // === Scheduling Errors ===
    #[error("Tile task failed: {0}")]
    Task(String),
}

impl DziError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an Io error bound to the path that failed.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a Raster error bound to the path that failed.
    pub fn raster(path: impl AsRef<Path>, message: impl ToString) -> Self {
        Self::Raster {
            path: path.as_ref().to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Whether the failure happened before any output was touched.
    pub fn is_configuration(&self) -> bool {
        matches!(self, DziError::Configuration(_))
    }
}

impl From<serde_json::Error> for DziError {
    fn from(err: serde_json::Error) -> Self {
        DziError::Descriptor(format!("JSON error: {}", err))
    }
}
