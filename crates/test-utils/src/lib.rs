//! Shared test utilities for the dzi-tiler workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Test data path helpers and tile tree listings
//! - Skip macros for optional test data and external programs
//! - Synthetic raster generators
//! - Common pyramid fixtures and a scripted stand-in for the page rasterizer
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{require_test_file, fixtures, solid_rgba};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro to skip a test if the required file is not found.
///
/// This is useful for tests that depend on sample documents that may not
/// be present in all environments.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_test_file;
///
/// #[test]
/// fn test_real_document() {
///     let path = require_test_file!("sample_page.pdf");
///     // Test code using path...
/// }
/// ```
///
/// If the file is not found, the test will print a skip message and return early.
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Add it to testdata/ or set TEST_DATA_DIR.",
                    $name
                );
                return;
            }
        }
    }};
}

/// Macro to skip a test if a program is not available on `PATH`.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_program;
///
/// #[test]
/// fn test_with_pdftoppm() {
///     let program = require_program!("pdftoppm");
/// }
/// ```
#[macro_export]
macro_rules! require_program {
    ($name:expr) => {{
        match $crate::find_program($name) {
            Some(path) => path,
            None => {
                eprintln!("SKIPPED: Program '{}' not found on PATH.", $name);
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Macro asserting that an RGBA pixel is within `tolerance` of a color on
/// every channel. Resampling filters may shift values slightly.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_pixel_near;
///
/// assert_pixel_near!(image.get_pixel(0, 0).0, [255, 0, 0, 255], 2);
/// ```
#[macro_export]
macro_rules! assert_pixel_near {
    ($pixel:expr, $expected:expr, $tolerance:expr) => {{
        let pixel: [u8; 4] = $pixel;
        let expected: [u8; 4] = $expected;
        let tolerance: u8 = $tolerance;
        let close = pixel
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| a.abs_diff(*b) <= tolerance);
        if !close {
            panic!(
                "assertion failed: pixel `{:?}` is not within {} of `{:?}`",
                pixel, tolerance, expected
            );
        }
    }};
}
