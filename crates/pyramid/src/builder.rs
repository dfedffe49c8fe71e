//! Bulk pyramid generation.
//!
//! Levels are produced coarsest first. Each level is one batch: the source is
//! prepared for the level (resized raster or rasterizer scale), every tile not
//! already on disk and not marked as a hole is dispatched through the gate, and
//! the batch is joined before the next level starts. The descriptor is written
//! once the last level has drained.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use dzi_common::{
    DziError, DziResult, PyramidGeometry, PyramidSpec, ResampleFilter, TileBox, TileCoord,
};
use dzi_protocol::Descriptor;

use crate::gate::ConcurrencyGate;
use crate::raster::Raster;
use crate::rasterizer::PageRasterizer;
use crate::store::TileStore;

/// What happens under a tile found to be a single color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DescendantPolicy {
    /// No uniform detection
    #[default]
    Off,
    /// Leave descendants ungenerated (holes)
    Skip,
    /// Write descendants as solid tiles of the same color
    Copy,
}

impl fmt::Display for DescendantPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DescendantPolicy::Off => "off",
            DescendantPolicy::Skip => "skip",
            DescendantPolicy::Copy => "copy",
        })
    }
}

impl FromStr for DescendantPolicy {
    type Err = DziError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(DescendantPolicy::Off),
            "skip" | "holes" => Ok(DescendantPolicy::Skip),
            "copy" => Ok(DescendantPolicy::Copy),
            other => Err(DziError::configuration(format!(
                "unknown descendant policy '{}' (expected off, skip or copy)",
                other
            ))),
        }
    }
}

/// Generation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub filter: ResampleFilter,
    pub concurrency: usize,
    /// First level to generate; coarser levels are left alone
    pub min_level: u32,
    pub descendants: DescendantPolicy,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            filter: ResampleFilter::default(),
            concurrency: 2,
            min_level: 0,
            descendants: DescendantPolicy::default(),
        }
    }
}

/// Where tile pixels come from.
#[derive(Debug, Clone)]
pub enum TileSource {
    /// A decoded full-resolution raster
    Raster(Arc<Raster>),
    /// A document page rendered per tile
    Page(Arc<PageRasterizer>),
}

/// The source prepared for one level.
#[derive(Clone)]
enum LevelSource {
    Raster(Arc<Raster>),
    Page {
        rasterizer: Arc<PageRasterizer>,
        scale: (u32, u32),
    },
}

/// Result of one tile task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOutcome {
    /// A new tile was written
    Written,
    /// A new single-color tile was written and `descendants` finer tiles were
    /// marked or copied
    Uniform { descendants: usize },
    /// The tile was on disk from an earlier run
    AlreadyPresent,
}

/// Totals of one build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub levels: u32,
    pub tiles_written: usize,
    pub tiles_present: usize,
    pub uniform_tiles: usize,
    /// Descendants marked as holes or copied
    pub descendants: usize,
    /// Tiles never dispatched because they were marked as holes
    pub tiles_skipped: usize,
}

impl BuildReport {
    fn record(&mut self, outcome: TileOutcome) {
        match outcome {
            TileOutcome::Written => self.tiles_written += 1,
            TileOutcome::Uniform { descendants } => {
                self.tiles_written += 1;
                self.uniform_tiles += 1;
                self.descendants += descendants;
            }
            TileOutcome::AlreadyPresent => self.tiles_present += 1,
        }
    }
}

/// Coordinates that must not be generated.
#[derive(Debug, Default)]
struct SkipSet {
    coords: Mutex<HashSet<TileCoord>>,
}

impl SkipSet {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<TileCoord>> {
        self.coords.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns false if `coord` was already marked.
    fn mark(&self, coord: TileCoord) -> bool {
        self.lock().insert(coord)
    }

    fn contains(&self, coord: &TileCoord) -> bool {
        self.lock().contains(coord)
    }
}

/// State shared by all tile tasks of a build.
struct TileContext {
    store: TileStore,
    geometry: PyramidGeometry,
    descendants: DescendantPolicy,
    skip: SkipSet,
}

/// Generates a complete pyramid.
pub struct PyramidBuilder {
    spec: PyramidSpec,
    options: BuildOptions,
    gate: ConcurrencyGate,
    context: Arc<TileContext>,
}

impl PyramidBuilder {
    pub fn new(spec: PyramidSpec, store: TileStore, options: BuildOptions) -> Self {
        let context = TileContext {
            store,
            geometry: spec.geometry,
            descendants: options.descendants,
            skip: SkipSet::default(),
        };
        Self {
            spec,
            options,
            gate: ConcurrencyGate::new(options.concurrency),
            context: Arc::new(context),
        }
    }

    pub fn spec(&self) -> &PyramidSpec {
        &self.spec
    }

    pub fn store(&self) -> &TileStore {
        &self.context.store
    }

    fn validate(&self, source: &TileSource) -> DziResult<()> {
        let geometry = &self.spec.geometry;
        if self.options.min_level > geometry.level_count() {
            return Err(DziError::configuration(format!(
                "min level {} is above the full-resolution level {}",
                self.options.min_level,
                geometry.level_count()
            )));
        }
        if let TileSource::Raster(raster) = source {
            if raster.dimensions() != (geometry.width, geometry.height) {
                return Err(DziError::configuration(format!(
                    "source raster is {}x{} but the pyramid is {}x{}",
                    raster.width(),
                    raster.height(),
                    geometry.width,
                    geometry.height
                )));
            }
        }
        Ok(())
    }

    /// Generate every level from the minimum level to full resolution, then
    /// write the descriptor.
    #[instrument(skip_all, fields(width = self.spec.geometry.width, height = self.spec.geometry.height))]
    pub async fn build(&self, source: TileSource) -> DziResult<BuildReport> {
        self.validate(&source)?;

        let geometry = self.spec.geometry;
        let start = Instant::now();
        let mut report = BuildReport::default();

        info!(
            levels = geometry.level_count(),
            min_level = self.options.min_level,
            tile_size = geometry.tile_size,
            overlap = geometry.overlap,
            concurrency = self.gate.capacity(),
            descendants = %self.options.descendants,
            "Starting pyramid build"
        );

        for level in self.options.min_level..=geometry.level_count() {
            let level_start = Instant::now();
            let prepared = self.prepare_level(&source, level).await?;
            self.context.store.materialize_directory(level)?;

            let mut batch = self.gate.batch(format!("level {}", level));
            for (coord, tile_box) in geometry.tiles(level) {
                if self.context.skip.contains(&coord) {
                    report.tiles_skipped += 1;
                    counter!("dzi_tiles_skipped_total").increment(1);
                    continue;
                }

                let context = self.context.clone();
                let prepared = prepared.clone();
                let dispatched = batch
                    .dispatch(move || produce_tile(&context, &prepared, coord, tile_box))
                    .await?;
                if !dispatched {
                    break;
                }
            }

            for outcome in batch.join().await? {
                report.record(outcome);
            }
            report.levels += 1;

            let (width, height) = geometry.level_dimensions(level);
            info!(
                level,
                width,
                height,
                elapsed_ms = level_start.elapsed().as_millis() as u64,
                "Level complete"
            );
        }

        let descriptor_path = self.context.store.layout().descriptor_path();
        Descriptor::from_spec(&self.spec).write_to(&descriptor_path)?;

        info!(
            descriptor = %descriptor_path.display(),
            written = report.tiles_written,
            present = report.tiles_present,
            uniform = report.uniform_tiles,
            skipped = report.tiles_skipped,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pyramid build complete"
        );
        Ok(report)
    }

    async fn prepare_level(&self, source: &TileSource, level: u32) -> DziResult<LevelSource> {
        let (width, height) = self.spec.geometry.level_dimensions(level);
        match source {
            TileSource::Raster(raster) if raster.dimensions() == (width, height) => {
                Ok(LevelSource::Raster(raster.clone()))
            }
            TileSource::Raster(raster) => {
                let raster = raster.clone();
                let engine = self.context.store.engine().clone();
                let filter = self.options.filter;
                let resized = tokio::task::spawn_blocking(move || engine.resize(&raster, width, height, filter))
                    .await
                    .map_err(|e| DziError::Task(e.to_string()))?;
                debug!(level, width, height, "Resized source for level");
                Ok(LevelSource::Raster(Arc::new(resized)))
            }
            TileSource::Page(rasterizer) => Ok(LevelSource::Page {
                rasterizer: rasterizer.clone(),
                scale: (width, height),
            }),
        }
    }
}

/// Whether `coord` takes part in uniform detection: the policy is on, a
/// finer level exists and the tile is full-size.
fn detects_uniform(context: &TileContext, coord: TileCoord, tile_box: &TileBox) -> bool {
    let geometry = &context.geometry;
    context.descendants != DescendantPolicy::Off
        && coord.level < geometry.level_count()
        && geometry.is_full_tile(tile_box.width(), tile_box.height())
}

/// Produce one tile and run uniform detection on it.
fn produce_tile(
    context: &TileContext,
    source: &LevelSource,
    coord: TileCoord,
    tile_box: TileBox,
) -> DziResult<TileOutcome> {
    let store = &context.store;
    let detect = detects_uniform(context, coord, &tile_box);

    if store.exists(&coord) {
        // Holes left by an earlier run are marked again from the tile on disk.
        if detect {
            let tile = store.open(&coord)?;
            if tile.is_uniform() {
                propagate_uniform(context, coord, &tile)?;
            }
        }
        return Ok(TileOutcome::AlreadyPresent);
    }

    let produced = match source {
        LevelSource::Raster(raster) => {
            let (x0, y0, x1, y1) = tile_box.as_tuple();
            let tile = store.engine().crop(raster, x0, y0, x1, y1);
            store.save(&coord, &tile)?;
            Some(tile)
        }
        LevelSource::Page { rasterizer, scale } => {
            rasterizer.render(store, coord, *scale, &tile_box)?;
            None
        }
    };
    counter!("dzi_tiles_written_total").increment(1);

    if !detect {
        return Ok(TileOutcome::Written);
    }

    let tile = match produced {
        Some(tile) => tile,
        None => store.open(&coord)?,
    };
    if !tile.is_uniform() {
        return Ok(TileOutcome::Written);
    }

    let descendants = propagate_uniform(context, coord, &tile)?;
    debug!(
        level = coord.level,
        col = coord.col,
        row = coord.row,
        descendants,
        "Uniform tile"
    );
    Ok(TileOutcome::Uniform { descendants })
}

/// Mark or fill every missing descendant of a uniform tile.
fn propagate_uniform(context: &TileContext, coord: TileCoord, tile: &Raster) -> DziResult<usize> {
    let geometry = &context.geometry;
    let store = &context.store;
    let mut handled = 0;

    for level in coord.level + 1..=geometry.level_count() {
        for child in coord.descendants_at(level).filter(|c| geometry.contains(c)) {
            if store.exists(&child) {
                continue;
            }
            match context.descendants {
                DescendantPolicy::Skip => {
                    if context.skip.mark(child) {
                        handled += 1;
                    }
                }
                DescendantPolicy::Copy => {
                    let child_box = geometry.tile_box(child.level, child.col, child.row);
                    store.save(&child, &tile.solid_like(child_box.width(), child_box.height()))?;
                    handled += 1;
                }
                DescendantPolicy::Off => {}
            }
        }
    }
    Ok(handled)
}
