//! Tile tree layout on disk.

use std::path::{Path, PathBuf};

use dzi_common::{TileCoord, TileFormat};

/// Paths of one pyramid, derived from its prefix.
///
/// For the prefix `/out/scan` the descriptor is `/out/scan.dzi` and the tiles
/// live under `/out/scan_files/<level>/<col>_<row>.<format>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLayout {
    prefix: PathBuf,
}

impl PyramidLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Layout for pyramid `name` inside `parent`.
    pub fn in_directory(parent: impl AsRef<Path>, name: &str) -> Self {
        Self::new(parent.as_ref().join(name))
    }

    /// Layout from a path to a descriptor (`.dzi` is stripped) or a prefix.
    pub fn from_descriptor_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("dzi") => Self::new(path.with_extension("")),
            _ => Self::new(path),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Directory containing the descriptor and the tile tree.
    pub fn parent_dir(&self) -> &Path {
        self.prefix.parent().unwrap_or_else(|| Path::new("."))
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut path = self.prefix.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.with_suffix(".dzi")
    }

    pub fn tiles_dir(&self) -> PathBuf {
        self.with_suffix("_files")
    }

    pub fn level_dir(&self, level: u32) -> PathBuf {
        self.tiles_dir().join(level.to_string())
    }

    pub fn tile_path(&self, coord: &TileCoord, format: TileFormat) -> PathBuf {
        self.level_dir(coord.level)
            .join(format!("{}_{}.{}", coord.col, coord.row, format.extension()))
    }
}
