//! Tests for overlay projection and compositing.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, RgbaImage};

use dzi_common::{PixelRect, PyramidGeometry, PyramidSpec, ResampleFilter, TileCoord, TileFormat};
use dzi_protocol::PyramidLayout;
use pyramid::{
    BuildOptions, ConcurrencyGate, DescendantPolicy, ImageEngine, OverlayCompositor,
    OverlayPlacement, OverlayProjector, PasteMode, PyramidBuilder, Raster, TileRange, TileSource,
    TileStore,
};
use test_utils::pyramid::{PyramidSize, REFERENCE, SMALL, SQUARE_TILED};
use test_utils::{assert_approx_eq, colors, gradient_rgba, list_tiles, read_rgba, solid_rgba};

fn geometry(size: PyramidSize) -> PyramidGeometry {
    PyramidGeometry::new(size.width, size.height, size.tile_size, size.overlap).unwrap()
}

fn raster(image: RgbaImage) -> Raster {
    Raster::new(DynamicImage::ImageRgba8(image))
}

/// Build a pyramid under `dir/base` with nearest-neighbour resampling.
async fn build_base(dir: &Path, size: PyramidSize, image: RgbaImage, descendants: DescendantPolicy) -> PyramidLayout {
    let layout = PyramidLayout::in_directory(dir, "base");
    let store = TileStore::new(layout.clone(), TileFormat::Png, Arc::new(ImageEngine::default()));
    let options = BuildOptions {
        filter: ResampleFilter::Nearest,
        descendants,
        ..Default::default()
    };
    PyramidBuilder::new(PyramidSpec::new(geometry(size), TileFormat::Png), store, options)
        .build(TileSource::Raster(Arc::new(raster(image))))
        .await
        .unwrap();
    layout
}

fn compositor(layout: &PyramidLayout, paste: PasteMode, capacity: usize) -> OverlayCompositor {
    OverlayCompositor::open(
        layout.clone(),
        Arc::new(ImageEngine::new(paste)),
        ResampleFilter::Nearest,
        ConcurrencyGate::new(capacity),
    )
    .unwrap()
}

fn snapshot(layout: &PyramidLayout) -> Vec<(String, Vec<u8>)> {
    let tiles_dir = layout.tiles_dir();
    list_tiles(&tiles_dir)
        .into_iter()
        .map(|name| {
            let bytes = std::fs::read(tiles_dir.join(&name)).unwrap();
            (name, bytes)
        })
        .collect()
}

// ============================================================================
// Projection tests
// ============================================================================

#[test]
fn test_reference_overlay_touches_one_tile_at_full_resolution() {
    let projector = OverlayProjector::new(geometry(REFERENCE), OverlayPlacement::new(550, 10, 100, 50));

    assert_eq!(
        projector.affected_tiles(10),
        TileRange {
            col_min: 2,
            col_max: 2,
            row_min: 0,
            row_max: 0
        }
    );

    let plan = projector.plan(10);
    assert_eq!(plan.footprint, PixelRect::new(550, 10, 650, 60));
    assert_eq!(plan.patches.len(), 1);

    let patch = plan.patches[0];
    assert_eq!(patch.coord, TileCoord::new(10, 2, 0));
    assert_eq!(patch.offset, (550 - 511, 10));
    // Only the part inside the image is pasted.
    assert_eq!(patch.crop, PixelRect::new(0, 0, 50, 50));
}

#[test]
fn test_placement_inside_one_tile_has_offset_from_box_origin() {
    let geometry = geometry(REFERENCE);
    let projector = OverlayProjector::new(geometry, OverlayPlacement::new(300, 280, 40, 30));

    let plan = projector.plan(10);
    assert_eq!(plan.patches.len(), 1);
    let patch = plan.patches[0];
    let tile_box = geometry.tile_box(10, 1, 1);
    assert_eq!(patch.coord, TileCoord::new(10, 1, 1));
    assert_eq!(patch.offset, ((300 - tile_box.x0), (280 - tile_box.y0)));
    assert_eq!(patch.crop, PixelRect::new(0, 0, 40, 30));
}

#[test]
fn test_overlay_on_a_boundary_reaches_both_overlaps() {
    let projector = OverlayProjector::new(geometry(REFERENCE), OverlayPlacement::new(253, 20, 4, 4));

    let patches = projector.plan(10).patches;
    assert_eq!(patches.len(), 2);

    assert_eq!(patches[0].coord, TileCoord::new(10, 0, 0));
    assert_eq!(patches[0].offset, (253, 20));
    assert_eq!(patches[0].crop, PixelRect::new(0, 0, 4, 4));

    // Column 1 starts at 255, so only the last two overlay columns land in it.
    assert_eq!(patches[1].coord, TileCoord::new(10, 1, 0));
    assert_eq!(patches[1].offset, (0, 20));
    assert_eq!(patches[1].crop, PixelRect::new(2, 0, 4, 4));
}

#[test]
fn test_footprint_scales_with_level() {
    let geometry = geometry(REFERENCE);
    let projector = OverlayProjector::new(geometry, OverlayPlacement::new(550, 10, 100, 50));

    let full = projector.box_at_level(10);
    let half = projector.box_at_level(9);
    assert_approx_eq!(half.width() as f64 / full.width() as f64, geometry.level_scale(9), 1e-9);
    assert_eq!(half, PixelRect::new(275, 5, 325, 30));

    // 100 * 2^-7 truncates to zero: nothing left to paste.
    assert!(projector.box_at_level(3).is_empty());
    assert!(projector.plan(3).patches.is_empty());
}

#[test]
fn test_overlay_outside_image_has_no_patches() {
    let projector = OverlayProjector::new(geometry(REFERENCE), OverlayPlacement::new(700, 500, 30, 30));
    for level in geometry(REFERENCE).levels() {
        assert!(projector.plan(level).patches.is_empty(), "level {}", level);
    }
}

#[test]
fn test_negative_placement_is_clipped() {
    let projector = OverlayProjector::new(geometry(REFERENCE), OverlayPlacement::new(-10, -5, 30, 20));
    let patches = projector.plan(10).patches;
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].offset, (0, 0));
    assert_eq!(patches[0].crop, PixelRect::new(10, 5, 30, 20));
}

// ============================================================================
// Compositing tests
// ============================================================================

#[tokio::test]
async fn test_overlay_patches_every_level_it_covers() {
    let dir = tempfile::tempdir().unwrap();
    let layout = build_base(dir.path(), SMALL, solid_rgba(64, 48, colors::WHITE), DescendantPolicy::Off).await;
    let untouched = layout.tile_path(&TileCoord::new(6, 3, 2), TileFormat::Png);
    let untouched_before = std::fs::read(&untouched).unwrap();
    let descriptor_before = std::fs::read(layout.descriptor_path()).unwrap();

    let overlay = raster(solid_rgba(8, 8, colors::RED));
    let placement = OverlayPlacement::for_raster(20, 20, &overlay);
    let report = compositor(&layout, PasteMode::Replace, 2)
        .run(overlay, placement)
        .await
        .unwrap();

    // The 8px overlay shrinks to nothing below level 3.
    assert_eq!(report.levels_patched, 4);
    assert_eq!(report.tiles_patched, 4);
    assert_eq!(report.tiles_reconstructed, 0);

    // Tile (6, 1, 1) covers (15, 15)-(33, 33).
    let tile = read_rgba(layout.tile_path(&TileCoord::new(6, 1, 1), TileFormat::Png));
    assert_eq!(tile.get_pixel(5, 5).0, colors::RED);
    assert_eq!(tile.get_pixel(12, 12).0, colors::RED);
    assert_eq!(tile.get_pixel(4, 4).0, colors::WHITE);
    assert_eq!(tile.get_pixel(13, 13).0, colors::WHITE);

    let half = read_rgba(layout.tile_path(&TileCoord::new(5, 0, 0), TileFormat::Png));
    assert_eq!(half.get_pixel(10, 10).0, colors::RED);
    assert_eq!(half.get_pixel(14, 14).0, colors::WHITE);

    assert_eq!(std::fs::read(&untouched).unwrap(), untouched_before);
    assert_eq!(std::fs::read(layout.descriptor_path()).unwrap(), descriptor_before);
}

#[tokio::test]
async fn test_overlay_rebuilds_holes_before_patching() {
    let dir = tempfile::tempdir().unwrap();
    let layout = build_base(
        dir.path(),
        SQUARE_TILED,
        solid_rgba(64, 64, colors::WHITE),
        DescendantPolicy::Skip,
    )
    .await;
    let target = TileCoord::new(6, 2, 2);
    assert!(!layout.tile_path(&target, TileFormat::Png).exists());

    let overlay = raster(solid_rgba(4, 4, colors::RED));
    let placement = OverlayPlacement::for_raster(40, 40, &overlay);
    let report = compositor(&layout, PasteMode::Replace, 2)
        .run(overlay, placement)
        .await
        .unwrap();

    assert_eq!(report.levels_patched, 3);
    assert_eq!(report.tiles_reconstructed, 1);

    let tile = read_rgba(layout.tile_path(&target, TileFormat::Png));
    assert_eq!(tile.dimensions(), (16, 16));
    assert_eq!(tile.get_pixel(0, 0).0, colors::WHITE);
    assert_eq!(tile.get_pixel(8, 8).0, colors::RED);
    assert_eq!(tile.get_pixel(11, 11).0, colors::RED);
    assert_eq!(tile.get_pixel(12, 12).0, colors::WHITE);

    let parent = read_rgba(layout.tile_path(&TileCoord::new(5, 1, 1), TileFormat::Png));
    assert_eq!(parent.get_pixel(4, 4).0, colors::RED);
    assert_eq!(parent.get_pixel(6, 6).0, colors::WHITE);

    // Holes away from the overlay stay holes.
    assert!(!layout.tile_path(&TileCoord::new(6, 0, 0), TileFormat::Png).exists());
}

#[tokio::test]
async fn test_rebuilt_hole_with_overlap_matches_its_box() {
    let dir = tempfile::tempdir().unwrap();
    let size = PyramidSize {
        width: 40,
        height: 40,
        tile_size: 16,
        overlap: 1,
    };
    let layout = build_base(dir.path(), size, solid_rgba(40, 40, colors::WHITE), DescendantPolicy::Skip).await;

    // Tile (5, 0, 0) is uniform and full-size, so its level 6 children are holes.
    let target = TileCoord::new(6, 1, 1);
    assert!(!layout.tile_path(&target, TileFormat::Png).exists());

    let overlay = raster(solid_rgba(4, 4, colors::RED));
    let placement = OverlayPlacement::for_raster(20, 20, &overlay);
    let report = compositor(&layout, PasteMode::Replace, 2)
        .run(overlay, placement)
        .await
        .unwrap();
    assert_eq!(report.tiles_reconstructed, 1);

    let tile_box = geometry(size).tile_box(6, 1, 1);
    assert_eq!(tile_box.as_tuple(), (15, 15, 33, 33));
    let tile = read_rgba(layout.tile_path(&target, TileFormat::Png));
    assert_eq!(tile.dimensions(), (tile_box.width(), tile_box.height()));
    assert_eq!(tile.get_pixel(4, 4).0, colors::WHITE);
    assert_eq!(tile.get_pixel(5, 5).0, colors::RED);
    assert_eq!(tile.get_pixel(8, 8).0, colors::RED);
    assert_eq!(tile.get_pixel(9, 9).0, colors::WHITE);
    assert_eq!(tile.get_pixel(17, 17).0, colors::WHITE);
}

#[tokio::test]
async fn test_blend_keeps_tile_under_transparent_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let layout = build_base(dir.path(), SMALL, solid_rgba(64, 48, colors::BLUE), DescendantPolicy::Off).await;

    let overlay = raster(solid_rgba(10, 10, colors::TRANSPARENT));
    let placement = OverlayPlacement::for_raster(2, 2, &overlay);
    compositor(&layout, PasteMode::Blend, 1)
        .run(overlay, placement)
        .await
        .unwrap();

    let tile = read_rgba(layout.tile_path(&TileCoord::new(6, 0, 0), TileFormat::Png));
    assert_eq!(tile.get_pixel(5, 5).0, colors::BLUE);
}

#[tokio::test]
async fn test_replace_copies_transparency() {
    let dir = tempfile::tempdir().unwrap();
    let layout = build_base(dir.path(), SMALL, solid_rgba(64, 48, colors::BLUE), DescendantPolicy::Off).await;

    let overlay = raster(solid_rgba(10, 10, colors::TRANSPARENT));
    let placement = OverlayPlacement::for_raster(2, 2, &overlay);
    compositor(&layout, PasteMode::Replace, 1)
        .run(overlay, placement)
        .await
        .unwrap();

    let tile = read_rgba(layout.tile_path(&TileCoord::new(6, 0, 0), TileFormat::Png));
    assert_eq!(tile.get_pixel(5, 5).0, colors::TRANSPARENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_capacity_does_not_change_output() {
    let mut snapshots = Vec::new();
    for capacity in [1, 4] {
        let dir = tempfile::tempdir().unwrap();
        let layout = build_base(dir.path(), SMALL, gradient_rgba(64, 48), DescendantPolicy::Off).await;

        let overlay = raster(solid_rgba(40, 30, colors::GREEN));
        let placement = OverlayPlacement::for_raster(10, 5, &overlay);
        compositor(&layout, PasteMode::Replace, capacity)
            .run(overlay, placement)
            .await
            .unwrap();
        snapshots.push(snapshot(&layout));
    }
    assert_eq!(snapshots[0], snapshots[1]);
}

#[tokio::test]
async fn test_placement_must_match_overlay_size() {
    let dir = tempfile::tempdir().unwrap();
    let layout = build_base(dir.path(), SMALL, solid_rgba(64, 48, colors::BLUE), DescendantPolicy::Off).await;

    let err = compositor(&layout, PasteMode::Replace, 1)
        .run(raster(solid_rgba(4, 4, colors::RED)), OverlayPlacement::new(0, 0, 5, 5))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_missing_descriptor_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let layout = PyramidLayout::in_directory(dir.path(), "absent");
    let result = OverlayCompositor::open(
        layout,
        Arc::new(ImageEngine::default()),
        ResampleFilter::Nearest,
        ConcurrencyGate::new(1),
    );
    assert!(result.is_err());
}
