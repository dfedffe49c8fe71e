//! Tile addressing and pixel rectangles.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A tile coordinate (level/column/row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Pyramid level (0 is the coarsest)
    pub level: u32,
    /// Column
    pub col: u32,
    /// Row
    pub row: u32,
}

impl TileCoord {
    pub fn new(level: u32, col: u32, row: u32) -> Self {
        Self { level, col, row }
    }

    /// Get the parent tile (level - 1).
    pub fn parent(&self) -> Option<TileCoord> {
        if self.level == 0 {
            return None;
        }
        Some(TileCoord {
            level: self.level - 1,
            col: self.col / 2,
            row: self.row / 2,
        })
    }

    /// Get the four children tiles (level + 1).
    pub fn children(&self) -> [TileCoord; 4] {
        let col = self.col * 2;
        let row = self.row * 2;
        let level = self.level + 1;
        [
            TileCoord { level, col, row },
            TileCoord { level, col: col + 1, row },
            TileCoord { level, col, row: row + 1 },
            TileCoord {
                level,
                col: col + 1,
                row: row + 1,
            },
        ]
    }

    /// All tiles at `level` that lie under this tile.
    ///
    /// Coordinates are not clipped to the pyramid; callers filter them against
    /// the level's row/column counts. Yields nothing when `level` is not finer.
    pub fn descendants_at(&self, level: u32) -> impl Iterator<Item = TileCoord> {
        let depth = level.saturating_sub(self.level);
        let span = if level > self.level { 1u32 << depth.min(31) } else { 0 };
        let (col0, row0) = (self.col * span, self.row * span);
        (col0..col0 + span)
            .flat_map(move |col| (row0..row0 + span).map(move |row| TileCoord { level, col, row }))
    }

    /// Relative tile path fragment, e.g. `10/2_0.png`.
    pub fn file_fragment(&self, extension: &str) -> String {
        format!("{}/{}_{}.{}", self.level, self.col, self.row, extension)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.level, self.col, self.row)
    }
}

/// The level-pixel rectangle covered by one tile, overlap included.
///
/// `x1`/`y1` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl TileBox {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn as_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x0, self.y0, self.x1, self.y1)
    }

    pub fn to_rect(&self) -> PixelRect {
        PixelRect::new(self.x0 as i64, self.y0 as i64, self.x1 as i64, self.y1 as i64)
    }
}

impl fmt::Display for TileBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x0, self.y0, self.x1, self.y1)
    }
}

/// A signed pixel rectangle with exclusive right/bottom edges.
///
/// Used for overlay footprints, which may start left of or above the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl PixelRect {
    pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Create a rectangle from its top-left corner and size.
    pub fn from_origin_size(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i64 {
        self.y1 - self.y0
    }

    /// True when the rectangle covers no pixel.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Compute the intersection of two rectangles, `None` if it has no area.
    pub fn intersection(&self, other: &PixelRect) -> Option<PixelRect> {
        let rect = PixelRect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        };
        (!rect.is_empty()).then_some(rect)
    }

    /// Shift the rectangle so that `(x, y)` becomes its origin.
    pub fn relative_to(&self, x: i64, y: i64) -> PixelRect {
        PixelRect::new(self.x0 - x, self.y0 - y, self.x1 - x, self.y1 - y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent() {
        let coord = TileCoord::new(5, 7, 4);
        assert_eq!(coord.parent(), Some(TileCoord::new(4, 3, 2)));
        assert_eq!(TileCoord::new(0, 0, 0).parent(), None);
    }

    #[test]
    fn test_children_have_this_parent() {
        let coord = TileCoord::new(3, 2, 5);
        for child in coord.children() {
            assert_eq!(child.parent(), Some(coord));
        }
    }

    #[test]
    fn test_descendants_at() {
        let coord = TileCoord::new(2, 1, 0);
        let deeper: Vec<_> = coord.descendants_at(4).collect();
        assert_eq!(deeper.len(), 16);
        assert!(deeper.iter().all(|c| c.level == 4 && (4..8).contains(&c.col) && c.row < 4));
        assert_eq!(coord.descendants_at(2).count(), 0);
    }

    #[test]
    fn test_rect_intersection() {
        let a = PixelRect::new(0, 0, 10, 10);
        let b = PixelRect::from_origin_size(5, 8, 10, 10);
        assert_eq!(a.intersection(&b), Some(PixelRect::new(5, 8, 10, 10)));

        let touching = PixelRect::new(10, 0, 20, 10);
        assert_eq!(a.intersection(&touching), None);
    }
}
