//! On-demand reconstruction of missing tiles.
//!
//! A pyramid built with holes has no files under uniform regions. Before such
//! a tile can be patched it is rebuilt from its nearest existing ancestor: the
//! parent is magnified 2x and the region under the child's tile box is
//! cropped out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use metrics::counter;
use tracing::debug;

use dzi_common::{DziError, DziResult, PyramidGeometry, ResampleFilter, TileCoord};

use crate::store::TileStore;

/// How [`AncestorMaterializer::ensure_tile`] satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The tile was already on disk
    Present,
    /// The tile was rebuilt from its parent
    Reconstructed,
}

/// Rebuilds missing tiles from their ancestors.
pub struct AncestorMaterializer {
    store: TileStore,
    geometry: PyramidGeometry,
    filter: ResampleFilter,
    locks: Mutex<HashMap<TileCoord, Arc<Mutex<()>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Guarded state is either unit or a lock table, both valid after a panic.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AncestorMaterializer {
    pub fn new(store: TileStore, geometry: PyramidGeometry, filter: ResampleFilter) -> Self {
        Self {
            store,
            geometry,
            filter,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &TileStore {
        &self.store
    }

    fn coordinate_lock(&self, coord: TileCoord) -> Arc<Mutex<()>> {
        lock(&self.locks).entry(coord).or_default().clone()
    }

    /// Make sure the tile at `coord` exists on disk, reconstructing it and any
    /// missing ancestors if needed.
    ///
    /// Calls for the same coordinate are serialized. Locks are taken from the
    /// requested tile towards level 0, never the other way.
    pub fn ensure_tile(&self, coord: TileCoord) -> DziResult<Materialized> {
        let slot = self.coordinate_lock(coord);
        let _guard = lock(&slot);

        let outcome = if self.store.exists(&coord) {
            Materialized::Present
        } else {
            self.reconstruct(coord)?;
            Materialized::Reconstructed
        };

        // The tile is on disk from here on; later callers need no slot.
        lock(&self.locks).remove(&coord);
        Ok(outcome)
    }

    fn reconstruct(&self, coord: TileCoord) -> DziResult<()> {
        if !self.geometry.contains(&coord) {
            return Err(DziError::configuration(format!(
                "tile {} is outside the pyramid",
                coord
            )));
        }
        let parent = coord
            .parent()
            .ok_or(DziError::PyramidInconsistency { coord })?;
        self.ensure_tile(parent)?;

        let engine = self.store.engine();
        let source = self.store.open(&parent)?;
        let (width, height) = (source.width() * 2, source.height() * 2);
        let magnified = engine.resize(&source, width, height, self.filter);

        // Child box in the magnified parent's frame.
        let parent_box = self.geometry.tile_box(parent.level, parent.col, parent.row);
        let child_box = self.geometry.tile_box(coord.level, coord.col, coord.row);
        let (origin_x, origin_y) = (parent_box.x0 * 2, parent_box.y0 * 2);
        let region = engine.crop(
            &magnified,
            child_box.x0.saturating_sub(origin_x).min(width),
            child_box.y0.saturating_sub(origin_y).min(height),
            child_box.x1.saturating_sub(origin_x).min(width),
            child_box.y1.saturating_sub(origin_y).min(height),
        );
        self.store.save(&coord, &region)?;

        counter!("dzi_tiles_materialized_total").increment(1);
        debug!(
            level = coord.level,
            col = coord.col,
            row = coord.row,
            width = region.width(),
            height = region.height(),
            "Reconstructed tile from parent"
        );
        Ok(())
    }
}
