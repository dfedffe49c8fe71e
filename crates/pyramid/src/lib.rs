//! Deep Zoom pyramid generation and overlay compositing.
//!
//! This crate turns a large raster, or a document page rendered by an external
//! rasterizer, into a tile pyramid on disk, and pastes overlays into pyramids
//! that already exist:
//!
//! - **Bulk generation**: level by level, with optional hole/copy handling of
//!   single-color regions
//! - **Ancestor reconstruction**: missing tiles are rebuilt from their parent
//! - **Overlay compositing**: only the tiles an overlay touches are rewritten
//!
//! # Architecture
//!
//! ```text
//! PyramidBuilder / OverlayCompositor
//!      │
//!      ├─► PyramidGeometry (levels, tile boxes)
//!      ├─► OverlayProjector (per-level patch plan)
//!      │
//!      ▼
//! ConcurrencyGate ──► tile task on the blocking pool
//!                          │
//!                          ├─► AncestorMaterializer ──► TileStore
//!                          └─► TileStore ──► RasterEngine (image crate)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use pyramid::{OverlayCompositor, OverlayPlacement, ConcurrencyGate, ImageEngine};
//!
//! let compositor = OverlayCompositor::open(layout, Arc::new(ImageEngine::default()),
//!     ResampleFilter::Antialias, ConcurrencyGate::new(2))?;
//! let placement = OverlayPlacement::for_raster(550, 10, &overlay);
//! compositor.run(overlay, placement).await?;
//! ```

pub mod ancestor;
pub mod builder;
pub mod config;
pub mod gate;
pub mod overlay;
pub mod raster;
pub mod rasterizer;
pub mod store;

// Re-export commonly used types at crate root
pub use ancestor::{AncestorMaterializer, Materialized};
pub use builder::{BuildOptions, BuildReport, DescendantPolicy, PyramidBuilder, TileOutcome, TileSource};
pub use config::TilerConfig;
pub use gate::{Batch, ConcurrencyGate};
pub use overlay::{
    LevelPlan, OverlayCompositor, OverlayPlacement, OverlayProjector, OverlayReport, TilePatch,
    TileRange,
};
pub use raster::{ImageEngine, PasteMode, Raster, RasterEngine};
pub use rasterizer::{PageRasterizer, DEFAULT_RASTERIZER};
pub use store::TileStore;
