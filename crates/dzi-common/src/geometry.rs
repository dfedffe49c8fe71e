//! Pyramid geometry.
//!
//! Pure functions mapping the full-resolution image size, tile size and
//! overlap to per-level dimensions and tile boxes. Both the bulk builder and
//! the overlay engine use this one model, so their tile layouts cannot drift.
//!
//! Level `level_count` is full resolution; every level below halves the
//! dimensions (rounding up) until level 0, which fits in a single pixel when
//! the level count is derived from the image size.

use serde::{Deserialize, Serialize};

use crate::error::{DziError, DziResult};
use crate::format::TileFormat;
use crate::tile::{TileBox, TileCoord};

/// Number of levels above level 0 needed to reach full resolution:
/// `ceil(log2(max(width, height)))`.
///
/// Fails only for a degenerate image whose dimensions are both zero.
pub fn level_count(width: u32, height: u32) -> DziResult<u32> {
    let longest = width.max(height);
    if longest == 0 {
        return Err(DziError::configuration(
            "cannot derive level count: image has no pixels",
        ));
    }
    Ok(u32::BITS - (longest - 1).leading_zeros())
}

/// `ceil(value / 2^shift)` without going through floating point.
fn shrink(value: u32, shift: u32) -> u32 {
    if shift >= 32 {
        return u32::from(value > 0);
    }
    let divisor = 1u64 << shift;
    ((value as u64 + divisor - 1) / divisor) as u32
}

/// Geometry of a tile pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PyramidGeometry {
    /// Full-resolution width in pixels
    pub width: u32,
    /// Full-resolution height in pixels
    pub height: u32,
    /// Tile edge length, overlap excluded
    pub tile_size: u32,
    /// Pixels of context shared with each neighbouring tile
    pub overlap: u32,
    level_count: u32,
}

impl PyramidGeometry {
    /// Create a geometry whose level count is derived from the image size.
    pub fn new(width: u32, height: u32, tile_size: u32, overlap: u32) -> DziResult<Self> {
        if width == 0 || height == 0 {
            return Err(DziError::configuration(format!(
                "image dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        if tile_size == 0 {
            return Err(DziError::configuration("tile size must be > 0"));
        }
        if overlap >= tile_size {
            return Err(DziError::configuration(format!(
                "overlap ({}) must be smaller than the tile size ({})",
                overlap, tile_size
            )));
        }

        Ok(Self {
            width,
            height,
            tile_size,
            overlap,
            level_count: level_count(width, height)?,
        })
    }

    /// Override the derived level count.
    ///
    /// The full-resolution image then sits at `level_count`, and lower levels
    /// keep halving from there.
    pub fn with_level_count(mut self, level_count: u32) -> Self {
        self.level_count = level_count;
        self
    }

    /// Index of the full-resolution level.
    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    /// Iterate all level indices, coarsest first.
    pub fn levels(&self) -> std::ops::RangeInclusive<u32> {
        0..=self.level_count
    }

    fn assert_level(&self, level: u32) {
        assert!(
            level <= self.level_count,
            "invalid pyramid level {} (max {})",
            level,
            self.level_count
        );
    }

    /// Scale of `level` relative to full resolution: `2^-(level_count - level)`.
    pub fn level_scale(&self, level: u32) -> f64 {
        self.assert_level(level);
        0.5f64.powi((self.level_count - level) as i32)
    }

    /// Pixel dimensions `(width, height)` of `level`.
    ///
    /// # Panics
    /// If `level` is above `level_count`.
    pub fn level_dimensions(&self, level: u32) -> (u32, u32) {
        self.assert_level(level);
        let shift = self.level_count - level;
        (shrink(self.width, shift), shrink(self.height, shift))
    }

    /// Number of tile `(rows, columns)` at `level`.
    pub fn rows_cols(&self, level: u32) -> (u32, u32) {
        let (width, height) = self.level_dimensions(level);
        (height.div_ceil(self.tile_size), width.div_ceil(self.tile_size))
    }

    /// Whether `coord` addresses a tile of this pyramid.
    pub fn contains(&self, coord: &TileCoord) -> bool {
        if coord.level > self.level_count {
            return false;
        }
        let (rows, cols) = self.rows_cols(coord.level);
        coord.col < cols && coord.row < rows
    }

    /// One axis of a tile box: start and exclusive end.
    fn span(&self, index: u32, extent: u32) -> (u32, u32) {
        let start = if index == 0 {
            0
        } else {
            self.tile_size * index - self.overlap
        };
        let margins = if index == 0 { 1 } else { 2 };
        let length = (self.tile_size + margins * self.overlap).min(extent - start);
        (start, start + length)
    }

    /// The level-pixel box of tile `(level, col, row)`, overlap included.
    ///
    /// Tiles in column/row 0 carry overlap on their trailing edge only, and
    /// tiles on the right/bottom edge are clipped to the level bounds, so edge
    /// tiles are smaller than interior ones.
    ///
    /// # Panics
    /// If the coordinate lies outside the pyramid.
    pub fn tile_box(&self, level: u32, col: u32, row: u32) -> TileBox {
        let coord = TileCoord::new(level, col, row);
        assert!(self.contains(&coord), "tile {} is outside the pyramid", coord);

        let (width, height) = self.level_dimensions(level);
        let (x0, x1) = self.span(col, width);
        let (y0, y1) = self.span(row, height);
        TileBox::new(x0, y0, x1, y1)
    }

    /// Every tile of `level` with its box, column by column.
    pub fn tiles(&self, level: u32) -> impl Iterator<Item = (TileCoord, TileBox)> + '_ {
        let (rows, cols) = self.rows_cols(level);
        (0..cols).flat_map(move |col| {
            (0..rows).map(move |row| (TileCoord::new(level, col, row), self.tile_box(level, col, row)))
        })
    }

    /// Whether a tile of this size is a full interior-sized tile, i.e. large
    /// enough for its content to say something about finer levels.
    pub fn is_full_tile(&self, width: u32, height: u32) -> bool {
        width >= self.tile_size && height >= self.tile_size
    }

    /// Summary of one level.
    pub fn level_info(&self, level: u32) -> LevelInfo {
        let (width, height) = self.level_dimensions(level);
        let (rows, cols) = self.rows_cols(level);
        LevelInfo {
            level,
            width,
            height,
            scale: self.level_scale(level),
            rows,
            cols,
        }
    }
}

/// Derived description of one level, for inspection and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub scale: f64,
    pub rows: u32,
    pub cols: u32,
}

impl LevelInfo {
    pub fn tile_count(&self) -> u64 {
        self.rows as u64 * self.cols as u64
    }
}

/// Geometry plus tile format: everything the descriptor records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidSpec {
    #[serde(flatten)]
    pub geometry: PyramidGeometry,
    pub format: TileFormat,
}

impl PyramidSpec {
    pub fn new(geometry: PyramidGeometry, format: TileFormat) -> Self {
        Self { geometry, format }
    }

    /// Per-level summary of the whole pyramid, coarsest first.
    pub fn level_summaries(&self) -> Vec<LevelInfo> {
        self.geometry
            .levels()
            .map(|level| self.geometry.level_info(level))
            .collect()
    }

    /// Pretty JSON document describing the pyramid and its levels.
    pub fn summary_json(&self) -> DziResult<String> {
        let document = serde_json::json!({
            "width": self.geometry.width,
            "height": self.geometry.height,
            "tile_size": self.geometry.tile_size,
            "overlap": self.geometry.overlap,
            "format": self.format,
            "level_count": self.geometry.level_count(),
            "levels": self.level_summaries(),
        });
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_count() {
        assert_eq!(level_count(600, 400).unwrap(), 10);
        assert_eq!(level_count(512, 1).unwrap(), 9);
        assert_eq!(level_count(513, 1).unwrap(), 10);
        assert_eq!(level_count(1, 1).unwrap(), 0);
        assert_eq!(level_count(0, 7).unwrap(), 3);
        assert!(level_count(0, 0).is_err());
    }

    #[test]
    fn test_shrink_rounds_up() {
        assert_eq!(shrink(600, 1), 300);
        assert_eq!(shrink(601, 1), 301);
        assert_eq!(shrink(400, 10), 1);
        assert_eq!(shrink(5, 40), 1);
    }

    #[test]
    #[should_panic(expected = "invalid pyramid level")]
    fn test_level_out_of_range_panics() {
        let geometry = PyramidGeometry::new(600, 400, 256, 1).unwrap();
        geometry.level_dimensions(11);
    }
}
