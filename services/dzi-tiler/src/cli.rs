//! Command-line arguments and configuration layering.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use dzi_common::{ResampleFilter, TileFormat};
use pyramid::{DescendantPolicy, TilerConfig};

#[derive(Parser, Debug)]
#[command(name = "dzi-tiler")]
#[command(about = "Build Deep Zoom pyramids and paste overlays into them", long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "DZI_CONFIG")]
    pub config: Option<String>,

    /// Log level, used when RUST_LOG is unset or invalid
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a pyramid from a raster image
    Image(ImageArgs),

    /// Build a pyramid from one page of a PDF document
    Pdf(PdfArgs),

    /// Paste an image into an existing pyramid
    Overlay(OverlayArgs),

    /// Print the level layout of a pyramid or of an image
    Info(InfoArgs),
}

/// Flags that shape the pyramid.
#[derive(Args, Debug, Default)]
pub struct GeometryArgs {
    /// Tile size in pixels, overlap excluded
    #[arg(short = 's', long)]
    pub tile_size: Option<u32>,

    /// Pixels shared with each neighbouring tile
    #[arg(long)]
    pub overlap: Option<u32>,

    /// Tile format (png, jpg, jpeg, tif, tiff, bmp)
    #[arg(short, long)]
    pub format: Option<TileFormat>,

    /// Level the full-resolution image is placed at
    #[arg(short = 'l', long)]
    pub max_level: Option<u32>,
}

/// Flags that control how tiles are produced.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Resampling filter (Nearest, Bilinear, Bicubic, Cubic, Antialias)
    #[arg(short = 't', long)]
    pub filter: Option<ResampleFilter>,

    /// Maximum number of tiles in flight
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// First level to generate
    #[arg(long)]
    pub min_level: Option<u32>,

    /// Handling of tiles under a single-color tile (off, skip, copy)
    #[arg(long)]
    pub descendants: Option<DescendantPolicy>,
}

/// Where the pyramid is written.
#[derive(Args, Debug, Default)]
pub struct OutputArgs {
    /// Pyramid name; defaults to the source file stem
    #[arg(short, long)]
    pub name: Option<String>,

    /// Output directory; defaults to the source directory
    #[arg(short, long)]
    pub path: Option<String>,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    /// Source image
    pub source: String,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub geometry: GeometryArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct PdfArgs {
    /// Source document
    pub source: String,

    /// Full-resolution page width in pixels
    #[arg(short = 'W', long)]
    pub width: u32,

    /// Full-resolution page height in pixels
    #[arg(short = 'H', long)]
    pub height: u32,

    /// Page number, starting at 1
    #[arg(short = 'P', long, default_value_t = 1)]
    pub page: u32,

    /// Rasterizer program
    #[arg(long)]
    pub rasterizer: Option<String>,

    #[command(flatten)]
    pub output: OutputArgs,

    #[command(flatten)]
    pub geometry: GeometryArgs,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Args, Debug)]
pub struct OverlayArgs {
    /// Image to paste
    pub overlay: String,

    /// Pyramid prefix or descriptor path
    pub pyramid: String,

    /// Left edge in full-resolution pixels
    #[arg(short, default_value_t = 0.0, allow_negative_numbers = true)]
    pub x: f64,

    /// Top edge in full-resolution pixels
    #[arg(short, default_value_t = 0.0, allow_negative_numbers = true)]
    pub y: f64,

    /// Read x and y as fractions of the pyramid width
    #[arg(long)]
    pub relative: bool,

    /// Alpha-composite instead of replacing pixels
    #[arg(long)]
    pub blend: bool,

    /// Resampling filter (Nearest, Bilinear, Bicubic, Cubic, Antialias)
    #[arg(short = 't', long)]
    pub filter: Option<ResampleFilter>,

    /// Maximum number of tiles in flight
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Pyramid descriptor (.dzi) or source image
    pub source: String,

    /// List the box of every tile
    #[arg(long)]
    pub tiles: bool,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub geometry: GeometryArgs,
}

impl GeometryArgs {
    pub fn apply(&self, config: &mut TilerConfig) {
        if let Some(tile_size) = self.tile_size {
            config.tile_size = tile_size;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(max_level) = self.max_level {
            config.max_level = Some(max_level);
        }
    }
}

impl RunArgs {
    pub fn apply(&self, config: &mut TilerConfig) {
        if let Some(filter) = self.filter {
            config.filter = filter;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(min_level) = self.min_level {
            config.min_level = min_level;
        }
        if let Some(descendants) = self.descendants {
            config.descendants = descendants;
        }
    }
}

impl OverlayArgs {
    pub fn apply(&self, config: &mut TilerConfig) {
        if let Some(filter) = self.filter {
            config.filter = filter;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if self.blend {
            config.paste = pyramid::PasteMode::Blend;
        }
    }
}

/// Defaults, then the YAML file, then `DZI_*` variables.
pub fn load_config(path: Option<&str>) -> Result<TilerConfig> {
    let mut config = match path {
        Some(raw) => {
            let path = expand_path(raw)?;
            TilerConfig::from_yaml(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        None => TilerConfig::default(),
    };
    config
        .apply_env()
        .context("Invalid DZI_* environment variable")?;
    Ok(config)
}

/// Expand `~` and environment variables in a path argument.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path '{}'", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}
