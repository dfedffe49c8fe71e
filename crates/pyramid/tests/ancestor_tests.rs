//! Tests for reconstructing missing tiles from their ancestors.

use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, RgbaImage};

use dzi_common::{DziError, PyramidGeometry, ResampleFilter, TileCoord, TileFormat};
use dzi_protocol::PyramidLayout;
use pyramid::{AncestorMaterializer, ImageEngine, Materialized, Raster, TileStore};
use test_utils::pyramid::{PyramidSize, SMALL, SQUARE_TILED};
use test_utils::{
    assert_pixel_near, colors, gradient_rgba, is_solid, marked_rgba, quadrants_rgba, read_rgba,
    solid_rgba,
};

fn geometry(size: PyramidSize) -> PyramidGeometry {
    PyramidGeometry::new(size.width, size.height, size.tile_size, size.overlap).unwrap()
}

fn materializer(dir: &Path, size: PyramidSize, filter: ResampleFilter) -> AncestorMaterializer {
    let store = TileStore::new(
        PyramidLayout::in_directory(dir, "holes"),
        TileFormat::Png,
        Arc::new(ImageEngine::default()),
    );
    AncestorMaterializer::new(store, geometry(size), filter)
}

fn save(materializer: &AncestorMaterializer, coord: TileCoord, image: RgbaImage) {
    let raster = Raster::new(DynamicImage::ImageRgba8(image));
    materializer.store().save(&coord, &raster).unwrap();
}

#[test]
fn test_constant_root_gives_constant_tiles_at_every_level() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Nearest);
    save(&materializer, TileCoord::new(0, 0, 0), solid_rgba(1, 1, colors::BLUE));

    let target = TileCoord::new(6, 3, 2);
    assert_eq!(materializer.ensure_tile(target).unwrap(), Materialized::Reconstructed);

    let geometry = geometry(SMALL);
    let mut coord = target;
    while let Some(parent) = coord.parent() {
        let tile_box = geometry.tile_box(coord.level, coord.col, coord.row);
        let tile = read_rgba(materializer.store().path(&coord));
        assert_eq!(tile.dimensions(), (tile_box.width(), tile_box.height()), "tile {}", coord);
        assert!(is_solid(&tile, colors::BLUE), "tile {}", coord);
        coord = parent;
    }
}

#[test]
fn test_smoothing_filters_keep_constant_color() {
    for filter in [ResampleFilter::Bilinear, ResampleFilter::Cubic, ResampleFilter::Antialias] {
        let dir = tempfile::tempdir().unwrap();
        let materializer = materializer(dir.path(), SMALL, filter);
        save(&materializer, TileCoord::new(0, 0, 0), solid_rgba(1, 1, [40, 80, 120, 255]));

        let coord = TileCoord::new(5, 1, 0);
        materializer.ensure_tile(coord).unwrap();
        let tile = read_rgba(materializer.store().path(&coord));
        assert_eq!(tile.dimensions(), (17, 17));
        for pixel in tile.pixels() {
            assert_pixel_near!(pixel.0, [40, 80, 120, 255], 1);
        }
    }
}

#[test]
fn test_second_call_leaves_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Bicubic);
    save(&materializer, TileCoord::new(4, 0, 0), gradient_rgba(16, 12));

    let coord = TileCoord::new(6, 2, 1);
    materializer.ensure_tile(coord).unwrap();
    let first = std::fs::read(materializer.store().path(&coord)).unwrap();

    assert_eq!(materializer.ensure_tile(coord).unwrap(), Materialized::Present);
    let second = std::fs::read(materializer.store().path(&coord)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_child_is_the_magnified_quadrant_without_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SQUARE_TILED, ResampleFilter::Nearest);
    let quadrant_colors = [colors::RED, colors::GREEN, colors::BLUE, colors::WHITE];
    save(&materializer, TileCoord::new(4, 0, 0), quadrants_rgba(16, 16, quadrant_colors));

    for (index, child) in [(0, 0), (1, 0), (0, 1), (1, 1)].into_iter().enumerate() {
        let coord = TileCoord::new(5, child.0, child.1);
        materializer.ensure_tile(coord).unwrap();
        let tile = read_rgba(materializer.store().path(&coord));
        assert_eq!(tile.dimensions(), (16, 16));
        assert!(is_solid(&tile, quadrant_colors[index]), "tile {}", coord);
    }
}

#[test]
fn test_child_is_aligned_with_its_box_under_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Nearest);
    // Level 4 is one 16x12 tile; the mark covers level-5 pixels x >= 16, y >= 16.
    let parent = marked_rgba(16, 12, colors::RED, colors::GREEN, (8, 8, 16, 12));
    save(&materializer, TileCoord::new(4, 0, 0), parent);

    // Box (15, 15, 32, 24): local pixel 0 sits one pixel before the mark.
    let coord = TileCoord::new(5, 1, 1);
    materializer.ensure_tile(coord).unwrap();
    let tile = read_rgba(materializer.store().path(&coord));
    assert_eq!(tile.dimensions(), (17, 9));
    for (x, y, pixel) in tile.enumerate_pixels() {
        let expected = if x >= 1 && y >= 1 { colors::GREEN } else { colors::RED };
        assert_eq!(pixel.0, expected, "pixel ({}, {})", x, y);
    }
}

#[test]
fn test_recursion_stops_at_nearest_existing_ancestor() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Nearest);
    save(&materializer, TileCoord::new(4, 0, 0), solid_rgba(16, 12, colors::GREEN));

    materializer.ensure_tile(TileCoord::new(6, 3, 2)).unwrap();

    assert!(materializer.store().exists(&TileCoord::new(5, 1, 1)));
    assert!(!materializer.store().exists(&TileCoord::new(0, 0, 0)));
}

#[test]
fn test_missing_level_zero_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Nearest);

    let err = materializer.ensure_tile(TileCoord::new(5, 1, 1)).unwrap_err();
    match err {
        DziError::PyramidInconsistency { coord } => assert_eq!(coord, TileCoord::new(0, 0, 0)),
        other => panic!("unexpected error: {}", other),
    }
    assert!(!materializer.store().exists(&TileCoord::new(1, 0, 0)));
}

#[test]
fn test_concurrent_requests_reconstruct_once() {
    let dir = tempfile::tempdir().unwrap();
    let materializer = materializer(dir.path(), SMALL, ResampleFilter::Nearest);
    save(&materializer, TileCoord::new(0, 0, 0), solid_rgba(1, 1, colors::RED));

    let target = TileCoord::new(5, 1, 1);
    let outcomes: Vec<Materialized> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| materializer.ensure_tile(target).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let rebuilt = outcomes
        .iter()
        .filter(|outcome| **outcome == Materialized::Reconstructed)
        .count();
    assert_eq!(rebuilt, 1);
    assert!(is_solid(&read_rgba(materializer.store().path(&target)), colors::RED));
}
