//! Overlay compositing onto an existing pyramid.
//!
//! [`OverlayProjector`] is pure math: it scales the overlay's full-resolution
//! placement into each level and works out, tile by tile, which part of the
//! resized overlay lands where. [`OverlayCompositor`] drives the I/O, one
//! level at a time from full resolution down to level 0.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tracing::{debug, info, instrument};

use dzi_common::{
    DziError, DziResult, PixelRect, PyramidGeometry, PyramidSpec, ResampleFilter, TileBox,
    TileCoord,
};
use dzi_protocol::{Descriptor, PyramidLayout};

use crate::ancestor::{AncestorMaterializer, Materialized};
use crate::gate::ConcurrencyGate;
use crate::raster::{Raster, RasterEngine};
use crate::store::TileStore;

/// Where the overlay goes, in full-resolution pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPlacement {
    /// Left edge; may be negative
    pub x: i64,
    /// Top edge; may be negative
    pub y: i64,
    /// Native overlay width
    pub width: u32,
    /// Native overlay height
    pub height: u32,
}

impl OverlayPlacement {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Placement for `raster` with its top-left corner at `(x, y)`.
    pub fn for_raster(x: i64, y: i64, raster: &Raster) -> Self {
        Self::new(x, y, raster.width(), raster.height())
    }

    /// Placement given as fractions of the pyramid width, the unit viewers
    /// use for overlay markers. Both coordinates are scaled by the width.
    pub fn from_relative(fx: f64, fy: f64, pyramid_width: u32, width: u32, height: u32) -> Self {
        let scale = pyramid_width as f64;
        Self::new((fx * scale) as i64, (fy * scale) as i64, width, height)
    }
}

/// Inclusive column and row bounds of the tiles an overlay may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub col_min: u32,
    pub col_max: u32,
    pub row_min: u32,
    pub row_max: u32,
}

impl TileRange {
    /// Every coordinate of the range at `level`, column by column.
    pub fn coords(&self, level: u32) -> impl Iterator<Item = TileCoord> {
        let rows = self.row_min..=self.row_max;
        (self.col_min..=self.col_max)
            .flat_map(move |col| rows.clone().map(move |row| TileCoord::new(level, col, row)))
    }

    pub fn tile_count(&self) -> usize {
        ((self.col_max - self.col_min + 1) * (self.row_max - self.row_min + 1)) as usize
    }
}

/// What to do to one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePatch {
    pub coord: TileCoord,
    /// The tile's box in level pixels
    pub tile_box: TileBox,
    /// Where the crop's top-left corner goes inside the tile
    pub offset: (u32, u32),
    /// Part of the level-resized overlay to paste
    pub crop: PixelRect,
}

/// Patches needed at one level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelPlan {
    pub level: u32,
    /// The overlay's rectangle in level pixels
    pub footprint: PixelRect,
    pub patches: Vec<TilePatch>,
}

/// Projects an overlay placement into pyramid levels.
#[derive(Debug, Clone, Copy)]
pub struct OverlayProjector {
    geometry: PyramidGeometry,
    placement: OverlayPlacement,
}

impl OverlayProjector {
    pub fn new(geometry: PyramidGeometry, placement: OverlayPlacement) -> Self {
        Self {
            geometry,
            placement,
        }
    }

    pub fn geometry(&self) -> &PyramidGeometry {
        &self.geometry
    }

    /// The overlay rectangle at `level`: position and size scaled by the
    /// level scale and truncated.
    pub fn box_at_level(&self, level: u32) -> PixelRect {
        let scale = self.geometry.level_scale(level);
        let p = &self.placement;
        PixelRect::from_origin_size(
            (p.x as f64 * scale) as i64,
            (p.y as f64 * scale) as i64,
            (p.width as f64 * scale) as i64,
            (p.height as f64 * scale) as i64,
        )
    }

    /// Tiles whose box may intersect the overlay at `level`, overlap margin
    /// included, clamped to the level.
    pub fn affected_tiles(&self, level: u32) -> TileRange {
        let footprint = self.box_at_level(level);
        let tile_size = self.geometry.tile_size as i64;
        let overlap = self.geometry.overlap as i64;
        let (rows, cols) = self.geometry.rows_cols(level);

        let clamp = |value: i64, count: u32| value.div_euclid(tile_size).clamp(0, count as i64 - 1) as u32;

        TileRange {
            col_min: clamp(footprint.x0 - overlap, cols),
            col_max: clamp(footprint.x1 + overlap, cols),
            row_min: clamp(footprint.y0 - overlap, rows),
            row_max: clamp(footprint.y1 + overlap, rows),
        }
    }

    /// The patch for one tile, `None` when the overlay misses its box.
    pub fn patch_for(&self, coord: TileCoord, footprint: &PixelRect) -> Option<TilePatch> {
        let tile_box = self.geometry.tile_box(coord.level, coord.col, coord.row);
        let hit = tile_box.to_rect().intersection(footprint)?;
        Some(TilePatch {
            coord,
            tile_box,
            offset: (
                (hit.x0 - tile_box.x0 as i64) as u32,
                (hit.y0 - tile_box.y0 as i64) as u32,
            ),
            crop: hit.relative_to(footprint.x0, footprint.y0),
        })
    }

    /// Every patch needed at `level`.
    pub fn plan(&self, level: u32) -> LevelPlan {
        let footprint = self.box_at_level(level);
        let patches = if footprint.is_empty() {
            Vec::new()
        } else {
            self.affected_tiles(level)
                .coords(level)
                .filter_map(|coord| self.patch_for(coord, &footprint))
                .collect()
        };
        LevelPlan {
            level,
            footprint,
            patches,
        }
    }
}

/// Totals of one overlay run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlayReport {
    pub levels_patched: u32,
    pub tiles_patched: usize,
    pub tiles_reconstructed: usize,
}

/// Pastes an overlay into every level of an existing pyramid.
pub struct OverlayCompositor {
    spec: PyramidSpec,
    materializer: Arc<AncestorMaterializer>,
    filter: ResampleFilter,
    gate: ConcurrencyGate,
}

impl OverlayCompositor {
    pub fn new(spec: PyramidSpec, store: TileStore, filter: ResampleFilter, gate: ConcurrencyGate) -> Self {
        Self {
            spec,
            materializer: Arc::new(AncestorMaterializer::new(store, spec.geometry, filter)),
            filter,
            gate,
        }
    }

    /// Compositor for the pyramid whose descriptor sits at `layout`.
    pub fn open(
        layout: PyramidLayout,
        engine: Arc<dyn RasterEngine>,
        filter: ResampleFilter,
        gate: ConcurrencyGate,
    ) -> DziResult<Self> {
        let descriptor = Descriptor::read_from(layout.descriptor_path())?;
        let spec = descriptor.to_spec()?;
        info!(
            width = descriptor.width,
            height = descriptor.height,
            levels = spec.geometry.level_count(),
            "Loaded pyramid descriptor"
        );
        let store = TileStore::new(layout, spec.format, engine);
        Ok(Self::new(spec, store, filter, gate))
    }

    pub fn spec(&self) -> &PyramidSpec {
        &self.spec
    }

    /// Paste `overlay` at `placement` into every level, finest first.
    ///
    /// Each level is one batch and is fully joined before the next, coarser
    /// level starts, so a tile being patched is never read as an ancestor at
    /// the same time.
    #[instrument(skip_all, fields(x = placement.x, y = placement.y))]
    pub async fn run(&self, overlay: Raster, placement: OverlayPlacement) -> DziResult<OverlayReport> {
        if overlay.dimensions() != (placement.width, placement.height) {
            return Err(DziError::configuration(format!(
                "placement is for a {}x{} overlay but the raster is {}x{}",
                placement.width,
                placement.height,
                overlay.width(),
                overlay.height()
            )));
        }

        let start = Instant::now();
        let overlay = Arc::new(overlay);
        let projector = OverlayProjector::new(self.spec.geometry, placement);
        let mut report = OverlayReport::default();

        for level in self.spec.geometry.levels().rev() {
            let plan = projector.plan(level);
            if plan.patches.is_empty() {
                debug!(level, "Overlay misses level");
                continue;
            }

            let resized = self.resize_overlay(&overlay, &plan.footprint).await?;
            let patched = plan.patches.len();
            let reconstructed = self.patch_level(plan, resized).await?;

            report.levels_patched += 1;
            report.tiles_patched += patched;
            report.tiles_reconstructed += reconstructed;
            debug!(level, tiles = patched, reconstructed, "Patched level");
        }

        info!(
            levels = report.levels_patched,
            tiles = report.tiles_patched,
            reconstructed = report.tiles_reconstructed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Overlay complete"
        );
        Ok(report)
    }

    async fn resize_overlay(&self, overlay: &Arc<Raster>, footprint: &PixelRect) -> DziResult<Arc<Raster>> {
        let overlay = overlay.clone();
        let engine = self.materializer.store().engine().clone();
        let (width, height) = (footprint.width() as u32, footprint.height() as u32);
        let filter = self.filter;
        let resized = tokio::task::spawn_blocking(move || engine.resize(&overlay, width, height, filter))
            .await
            .map_err(|e| DziError::Task(e.to_string()))?;
        Ok(Arc::new(resized))
    }

    /// Patch every tile of one level plan; returns how many tiles had to be
    /// reconstructed first.
    async fn patch_level(&self, plan: LevelPlan, overlay: Arc<Raster>) -> DziResult<usize> {
        let mut batch = self.gate.batch(format!("overlay level {}", plan.level));

        for patch in plan.patches {
            let materializer = self.materializer.clone();
            let overlay = overlay.clone();
            let dispatched = batch
                .dispatch(move || apply_patch(&materializer, &overlay, &patch))
                .await?;
            if !dispatched {
                break;
            }
        }

        let outcomes = batch.join().await?;
        Ok(outcomes
            .into_iter()
            .filter(|outcome| *outcome == Materialized::Reconstructed)
            .count())
    }
}

/// ensure, crop, paste, save.
fn apply_patch(
    materializer: &AncestorMaterializer,
    overlay: &Raster,
    patch: &TilePatch,
) -> DziResult<Materialized> {
    let outcome = materializer.ensure_tile(patch.coord)?;

    let store = materializer.store();
    let engine = store.engine();
    let crop = &patch.crop;
    let piece = engine.crop(
        overlay,
        crop.x0 as u32,
        crop.y0 as u32,
        crop.x1 as u32,
        crop.y1 as u32,
    );

    let mut tile = store.open(&patch.coord)?;
    engine.paste(&mut tile, &piece, patch.offset.0, patch.offset.1);
    store.save(&patch.coord, &tile)?;

    counter!("dzi_overlay_patches_total").increment(1);
    Ok(outcome)
}
