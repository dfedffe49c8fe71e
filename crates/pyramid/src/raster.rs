//! Raster engine.
//!
//! The pyramid code never touches pixels directly: it opens, resizes, crops,
//! pastes and saves rasters through [`RasterEngine`]. [`ImageEngine`] is the
//! implementation backed by the `image` crate.

use std::fmt;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageOutputFormat};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use dzi_common::{DziError, DziResult, ResampleFilter, TileFormat};

/// Quality used when tiles are written as JPEG.
pub const JPEG_QUALITY: u8 = 90;

/// A decoded raster held in memory.
#[derive(Debug, Clone)]
pub struct Raster {
    image: DynamicImage,
}

impl Raster {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn into_image(self) -> DynamicImage {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// True when every pixel has exactly the same value.
    pub fn is_uniform(&self) -> bool {
        let bytes = self.image.as_bytes();
        let pixel_len = self.image.color().bytes_per_pixel() as usize;
        match bytes.get(..pixel_len) {
            Some(first) => bytes.par_chunks_exact(pixel_len).all(|pixel| pixel == first),
            None => true,
        }
    }

    /// A `width`x`height` raster filled with this raster's top-left pixel, in
    /// the same color type.
    pub fn solid_like(&self, width: u32, height: u32) -> Raster {
        let pixel = self.image.crop_imm(0, 0, 1, 1);
        Raster::new(pixel.resize_exact(width, height, FilterType::Nearest))
    }
}

/// How an overlay is combined with the tile underneath.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PasteMode {
    /// Overwrite the destination pixels, alpha included
    #[default]
    Replace,
    /// Alpha-composite the source over the destination
    Blend,
}

impl fmt::Display for PasteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PasteMode::Replace => "replace",
            PasteMode::Blend => "blend",
        })
    }
}

impl FromStr for PasteMode {
    type Err = DziError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(PasteMode::Replace),
            "blend" => Ok(PasteMode::Blend),
            other => Err(DziError::configuration(format!(
                "unknown paste mode '{}' (expected replace or blend)",
                other
            ))),
        }
    }
}

/// Operations the pyramid code needs from an imaging library.
pub trait RasterEngine: Send + Sync {
    /// Decode the raster stored at `path`.
    fn open(&self, path: &Path) -> DziResult<Raster>;

    /// Resize to exactly `width`x`height`.
    fn resize(&self, raster: &Raster, width: u32, height: u32, filter: ResampleFilter) -> Raster;

    /// Copy out the rectangle `[x0, x1) x [y0, y1)`.
    fn crop(&self, raster: &Raster, x0: u32, y0: u32, x1: u32, y1: u32) -> Raster;

    /// Paste `src` onto `dest` with its top-left corner at `(x, y)`. Pixels
    /// falling outside `dest` are dropped.
    fn paste(&self, dest: &mut Raster, src: &Raster, x: u32, y: u32);

    /// Encode `raster` as `format` and store it at `path`.
    ///
    /// Readers of `path` never observe a partially written file.
    fn save(&self, raster: &Raster, path: &Path, format: TileFormat) -> DziResult<()>;
}

/// [`RasterEngine`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageEngine {
    paste_mode: PasteMode,
}

impl ImageEngine {
    pub fn new(paste_mode: PasteMode) -> Self {
        Self { paste_mode }
    }

    pub fn paste_mode(&self) -> PasteMode {
        self.paste_mode
    }

    /// Read the dimensions of an image file without decoding its pixels.
    pub fn probe_dimensions(path: &Path) -> DziResult<(u32, u32)> {
        image::image_dimensions(path).map_err(|e| DziError::raster(path, e))
    }
}

fn filter_type(filter: ResampleFilter) -> FilterType {
    match filter {
        ResampleFilter::Nearest => FilterType::Nearest,
        ResampleFilter::Bilinear => FilterType::Triangle,
        ResampleFilter::Bicubic | ResampleFilter::Cubic => FilterType::CatmullRom,
        ResampleFilter::Antialias => FilterType::Lanczos3,
    }
}

fn output_format(format: TileFormat) -> ImageOutputFormat {
    match format {
        TileFormat::Png => ImageOutputFormat::Png,
        TileFormat::Jpg | TileFormat::Jpeg => ImageOutputFormat::Jpeg(JPEG_QUALITY),
        TileFormat::Tif | TileFormat::Tiff => ImageOutputFormat::Tiff,
        TileFormat::Bmp => ImageOutputFormat::Bmp,
    }
}

impl RasterEngine for ImageEngine {
    fn open(&self, path: &Path) -> DziResult<Raster> {
        image::open(path)
            .map(Raster::new)
            .map_err(|e| DziError::raster(path, e))
    }

    fn resize(&self, raster: &Raster, width: u32, height: u32, filter: ResampleFilter) -> Raster {
        if raster.dimensions() == (width, height) {
            return raster.clone();
        }
        Raster::new(raster.image.resize_exact(width, height, filter_type(filter)))
    }

    fn crop(&self, raster: &Raster, x0: u32, y0: u32, x1: u32, y1: u32) -> Raster {
        Raster::new(raster.image.crop_imm(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0)))
    }

    fn paste(&self, dest: &mut Raster, src: &Raster, x: u32, y: u32) {
        match self.paste_mode {
            PasteMode::Replace => imageops::replace(&mut dest.image, &src.image, x as i64, y as i64),
            PasteMode::Blend => imageops::overlay(&mut dest.image, &src.image, x as i64, y as i64),
        }
    }

    fn save(&self, raster: &Raster, path: &Path, format: TileFormat) -> DziResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = tempfile::Builder::new()
            .prefix(".tile")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| DziError::io(dir, e))?;

        // Opaque codecs cannot take an alpha channel.
        let flattened;
        let image = if format.is_opaque() && raster.image.color().has_alpha() {
            flattened = DynamicImage::ImageRgb8(raster.image.to_rgb8());
            &flattened
        } else {
            &raster.image
        };

        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            image
                .write_to(&mut writer, output_format(format))
                .map_err(|e| DziError::raster(path, e))?;
            writer.flush().map_err(|e| DziError::io(path, e))?;
        }

        staged.persist(path).map_err(|e| DziError::io(path, e.error))?;
        Ok(())
    }
}
