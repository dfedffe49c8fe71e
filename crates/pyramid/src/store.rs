//! Tile storage on the local filesystem.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use dzi_common::{DziError, DziResult, TileCoord, TileFormat};
use dzi_protocol::PyramidLayout;

use crate::raster::{Raster, RasterEngine};

/// Reads and writes the tiles of one pyramid.
///
/// Tiles are addressed by coordinate only; the layout decides where they live
/// and the raster engine how they are encoded.
#[derive(Clone)]
pub struct TileStore {
    layout: PyramidLayout,
    format: TileFormat,
    engine: Arc<dyn RasterEngine>,
}

impl TileStore {
    pub fn new(layout: PyramidLayout, format: TileFormat, engine: Arc<dyn RasterEngine>) -> Self {
        Self {
            layout,
            format,
            engine,
        }
    }

    pub fn layout(&self) -> &PyramidLayout {
        &self.layout
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn engine(&self) -> &Arc<dyn RasterEngine> {
        &self.engine
    }

    /// `<prefix>_files/<level>/<col>_<row>.<format>`
    pub fn path(&self, coord: &TileCoord) -> PathBuf {
        self.layout.tile_path(coord, self.format)
    }

    pub fn exists(&self, coord: &TileCoord) -> bool {
        self.path(coord).is_file()
    }

    /// Create the directory of `level` if it is missing.
    pub fn materialize_directory(&self, level: u32) -> DziResult<PathBuf> {
        let dir = self.layout.level_dir(level);
        fs::create_dir_all(&dir).map_err(|e| DziError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn open(&self, coord: &TileCoord) -> DziResult<Raster> {
        self.engine.open(&self.path(coord))
    }

    /// Encode and store a tile, replacing any previous version atomically.
    pub fn save(&self, coord: &TileCoord, raster: &Raster) -> DziResult<()> {
        self.materialize_directory(coord.level)?;
        let path = self.path(coord);
        self.engine.save(raster, &path, self.format)?;
        debug!(level = coord.level, col = coord.col, row = coord.row, "Saved tile");
        Ok(())
    }

    /// Move a file produced elsewhere on the same filesystem into the slot of
    /// `coord`.
    pub fn install_file(&self, coord: &TileCoord, produced: &Path) -> DziResult<()> {
        self.materialize_directory(coord.level)?;
        let path = self.path(coord);
        fs::rename(produced, &path).map_err(|e| DziError::io(&path, e))?;
        debug!(level = coord.level, col = coord.col, row = coord.row, "Installed tile");
        Ok(())
    }
}

impl std::fmt::Debug for TileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStore")
            .field("layout", &self.layout)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}
