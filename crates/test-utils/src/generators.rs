//! Synthetic raster generators.
//!
//! These generators create predictable, verifiable images that can be used
//! across the test suite without shipping binary fixtures.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

/// Creates an image filled with a single color.
pub fn solid_rgba(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Creates an image where every pixel encodes its own position.
///
/// Pixel `(x, y)` is `[x % 256, y % 256, (x / 256 + y / 256) % 256, 255]`, so
/// no two pixels of an image up to 256x256 share a value and cropped windows
/// can be located exactly.
///
/// # Example
///
/// ```
/// use test_utils::gradient_rgba;
///
/// let image = gradient_rgba(300, 10);
/// assert_eq!(image.get_pixel(3, 7).0, [3, 7, 0, 255]);
/// assert_eq!(image.get_pixel(259, 0).0, [3, 0, 1, 255]);
/// ```
pub fn gradient_rgba(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x % 256) as u8,
            (y % 256) as u8,
            ((x / 256 + y / 256) % 256) as u8,
            255,
        ])
    })
}

/// Creates an image split into four solid quadrants.
///
/// `colors` are given as top-left, top-right, bottom-left, bottom-right. The
/// split sits at `(width / 2, height / 2)`.
pub fn quadrants_rgba(width: u32, height: u32, colors: [[u8; 4]; 4]) -> RgbaImage {
    let (mid_x, mid_y) = (width / 2, height / 2);
    RgbaImage::from_fn(width, height, |x, y| {
        let index = usize::from(x >= mid_x) + 2 * usize::from(y >= mid_y);
        Rgba(colors[index])
    })
}

/// Creates an image that is `background` everywhere except a `mark`-colored
/// rectangle `[x0, x1) x [y0, y1)`.
pub fn marked_rgba(
    width: u32,
    height: u32,
    background: [u8; 4],
    mark: [u8; 4],
    rect: (u32, u32, u32, u32),
) -> RgbaImage {
    let (x0, y0, x1, y1) = rect;
    RgbaImage::from_fn(width, height, |x, y| {
        if x >= x0 && x < x1 && y >= y0 && y < y1 {
            Rgba(mark)
        } else {
            Rgba(background)
        }
    })
}

/// Writes `image` as a PNG file called `name` inside `dir`.
pub fn write_png(dir: impl AsRef<Path>, name: &str, image: &RgbaImage) -> PathBuf {
    let path = dir.as_ref().join(name);
    DynamicImage::ImageRgba8(image.clone())
        .save_with_format(&path, ImageFormat::Png)
        .expect("Failed to write test PNG");
    path
}

/// Reads an image file as RGBA.
pub fn read_rgba(path: impl AsRef<Path>) -> RgbaImage {
    image::open(path.as_ref())
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.as_ref().display(), e))
        .to_rgba8()
}

/// True when every pixel of `image` equals `color`.
pub fn is_solid(image: &RgbaImage, color: [u8; 4]) -> bool {
    image.pixels().all(|pixel| pixel.0 == color)
}
