//! Subcommand implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use dzi_common::{PyramidGeometry, PyramidSpec};
use dzi_protocol::{Descriptor, PyramidLayout};
use pyramid::{
    BuildReport, ConcurrencyGate, ImageEngine, OverlayCompositor, OverlayPlacement,
    PageRasterizer, PyramidBuilder, Raster, RasterEngine, TileSource, TileStore, TilerConfig,
};

use crate::cli::{expand_path, ImageArgs, InfoArgs, OutputArgs, OverlayArgs, PdfArgs};

pub async fn image(mut config: TilerConfig, args: ImageArgs) -> Result<()> {
    args.geometry.apply(&mut config);
    args.run.apply(&mut config);
    config.validate()?;

    let source = expand_path(&args.source)?;
    let layout = output_layout(&source, &args.output, None)?;
    let engine = Arc::new(ImageEngine::new(config.paste));
    let raster = decode(engine.clone(), source.clone()).await?;
    info!(
        source = %source.display(),
        width = raster.width(),
        height = raster.height(),
        "Loaded source image"
    );

    let geometry = geometry(&config, raster.width(), raster.height())?;
    let builder = PyramidBuilder::new(
        PyramidSpec::new(geometry, config.format),
        TileStore::new(layout, config.format, engine),
        config.build_options(),
    );
    let report = builder
        .build(TileSource::Raster(Arc::new(raster)))
        .await
        .with_context(|| format!("Failed to build pyramid from {}", source.display()))?;

    finish(&builder, &report);
    Ok(())
}

pub async fn pdf(mut config: TilerConfig, args: PdfArgs) -> Result<()> {
    args.geometry.apply(&mut config);
    args.run.apply(&mut config);
    if let Some(rasterizer) = &args.rasterizer {
        config.rasterizer = rasterizer.clone();
    }
    config.validate()?;

    let source = expand_path(&args.source)?;
    if !source.is_file() {
        bail!("Document not found: {}", source.display());
    }
    let layout = output_layout(&source, &args.output, Some(args.page))?;
    let program = expand_path(&config.rasterizer)?;
    let rasterizer = PageRasterizer::new(program, &source, args.page, config.format)?;

    let geometry = geometry(&config, args.width, args.height)?;
    let builder = PyramidBuilder::new(
        PyramidSpec::new(geometry, config.format),
        TileStore::new(layout, config.format, Arc::new(ImageEngine::new(config.paste))),
        config.build_options(),
    );
    let report = builder
        .build(TileSource::Page(Arc::new(rasterizer)))
        .await
        .with_context(|| {
            format!(
                "Failed to build pyramid from page {} of {}",
                args.page,
                source.display()
            )
        })?;

    finish(&builder, &report);
    Ok(())
}

pub async fn overlay(mut config: TilerConfig, args: OverlayArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let overlay_path = expand_path(&args.overlay)?;
    let layout = PyramidLayout::from_descriptor_path(expand_path(&args.pyramid)?);
    let descriptor = layout.descriptor_path();
    let engine = Arc::new(ImageEngine::new(config.paste));
    let compositor = OverlayCompositor::open(
        layout,
        engine.clone(),
        config.filter,
        ConcurrencyGate::new(config.concurrency),
    )
    .with_context(|| format!("Failed to open pyramid {}", descriptor.display()))?;

    let raster = decode(engine, overlay_path.clone()).await?;
    let placement = if args.relative {
        OverlayPlacement::from_relative(
            args.x,
            args.y,
            compositor.spec().geometry.width,
            raster.width(),
            raster.height(),
        )
    } else {
        OverlayPlacement::for_raster(args.x.round() as i64, args.y.round() as i64, &raster)
    };
    info!(
        overlay = %overlay_path.display(),
        x = placement.x,
        y = placement.y,
        width = placement.width,
        height = placement.height,
        paste = %config.paste,
        "Compositing overlay"
    );

    let report = compositor
        .run(raster, placement)
        .await
        .with_context(|| format!("Failed to composite {}", overlay_path.display()))?;

    info!(
        levels = report.levels_patched,
        tiles = report.tiles_patched,
        reconstructed = report.tiles_reconstructed,
        "Overlay complete"
    );
    Ok(())
}

pub fn info(mut config: TilerConfig, args: InfoArgs) -> Result<()> {
    args.geometry.apply(&mut config);
    config.validate()?;

    let source = expand_path(&args.source)?;
    let spec = if is_descriptor(&source) {
        Descriptor::read_from(&source)
            .and_then(|descriptor| descriptor.to_spec())
            .with_context(|| format!("Failed to read descriptor {}", source.display()))?
    } else {
        let (width, height) = ImageEngine::probe_dimensions(&source)?;
        PyramidSpec::new(geometry(&config, width, height)?, config.format)
    };

    if args.json {
        println!("{}", summary_json(&spec, args.tiles)?);
    } else {
        print!("{}", summary_text(&spec, args.tiles));
    }
    Ok(())
}

/// Pyramid geometry for a `width`x`height` source under `config`.
fn geometry(config: &TilerConfig, width: u32, height: u32) -> Result<PyramidGeometry> {
    let mut geometry = PyramidGeometry::new(width, height, config.tile_size, config.overlap)?;
    if let Some(max_level) = config.max_level {
        geometry = geometry.with_level_count(max_level);
    }
    Ok(geometry)
}

/// Decode an image off the async runtime.
async fn decode(engine: Arc<ImageEngine>, path: PathBuf) -> Result<Raster> {
    let display = path.display().to_string();
    tokio::task::spawn_blocking(move || engine.open(&path))
        .await
        .context("Image decoding task failed")?
        .with_context(|| format!("Failed to open {}", display))
}

/// Layout for the pyramid of `source`. The output directory is created.
///
/// PDF pyramids carry the page number after the name.
fn output_layout(source: &Path, output: &OutputArgs, page: Option<u32>) -> Result<PyramidLayout> {
    let mut name = match &output.name {
        Some(name) => name.clone(),
        None => source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive a pyramid name from {}", source.display()))?,
    };
    if let Some(page) = page {
        name.push_str(&page.to_string());
    }

    let dir = match &output.path {
        Some(path) => expand_path(path)?,
        None => match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    Ok(PyramidLayout::in_directory(dir, &name))
}

fn is_descriptor(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("dzi"))
        .unwrap_or(false)
}

fn finish(builder: &PyramidBuilder, report: &BuildReport) {
    let descriptor = builder.store().layout().descriptor_path();
    info!(
        descriptor = %descriptor.display(),
        levels = report.levels,
        written = report.tiles_written,
        present = report.tiles_present,
        uniform = report.uniform_tiles,
        descendants = report.descendants,
        skipped = report.tiles_skipped,
        "Pyramid complete"
    );
    println!("{}", descriptor.display());
}

fn summary_json(spec: &PyramidSpec, tiles: bool) -> Result<String> {
    let mut document: serde_json::Value = serde_json::from_str(&spec.summary_json()?)?;
    if tiles {
        let listing: Vec<serde_json::Value> = spec
            .geometry
            .levels()
            .flat_map(|level| spec.geometry.tiles(level))
            .map(|(coord, tile_box)| serde_json::json!({ "coord": coord, "box": tile_box }))
            .collect();
        document["tiles"] = serde_json::Value::Array(listing);
    }
    Ok(serde_json::to_string_pretty(&document)?)
}

fn summary_text(spec: &PyramidSpec, tiles: bool) -> String {
    let geometry = &spec.geometry;
    let mut out = format!(
        "{}x{} pixels, tile size {}, overlap {}, format {}, levels 0..={}\n",
        geometry.width,
        geometry.height,
        geometry.tile_size,
        geometry.overlap,
        spec.format,
        geometry.level_count()
    );
    for level in spec.level_summaries() {
        out.push_str(&format!(
            "level {:>2}: {}x{} scale {} cols {} rows {}\n",
            level.level, level.width, level.height, level.scale, level.cols, level.rows
        ));
        if tiles {
            for (coord, tile_box) in geometry.tiles(level.level) {
                out.push_str(&format!("    {} {}\n", coord, tile_box));
            }
        }
    }
    out
}
