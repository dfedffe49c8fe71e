//! Common types and utilities shared across the Deep Zoom tiler crates.

pub mod error;
pub mod filter;
pub mod format;
pub mod geometry;
pub mod tile;

pub use error::{DziError, DziResult};
pub use filter::ResampleFilter;
pub use format::TileFormat;
pub use geometry::{level_count, LevelInfo, PyramidGeometry, PyramidSpec};
pub use tile::{PixelRect, TileBox, TileCoord};
