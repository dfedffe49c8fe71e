//! Common test fixtures for pyramid tests.
//!
//! This module provides pre-defined image sizes and colors that represent
//! common scenarios, plus scripted stand-ins for the external page
//! rasterizer.

use std::path::{Path, PathBuf};

/// Common pyramid dimensions for testing.
pub mod pyramid {
    /// Full-resolution size, tile size and overlap of a test pyramid.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PyramidSize {
        pub width: u32,
        pub height: u32,
        pub tile_size: u32,
        pub overlap: u32,
    }

    /// The reference image: 10 levels, 3x2 tiles at full resolution.
    pub const REFERENCE: PyramidSize = PyramidSize {
        width: 600,
        height: 400,
        tile_size: 256,
        overlap: 1,
    };

    /// Small enough to build in milliseconds, with several tiles per level.
    pub const SMALL: PyramidSize = PyramidSize {
        width: 64,
        height: 48,
        tile_size: 16,
        overlap: 1,
    };

    /// Square image whose finest level is exactly 4x4 interior tiles.
    pub const SQUARE_TILED: PyramidSize = PyramidSize {
        width: 64,
        height: 64,
        tile_size: 16,
        overlap: 0,
    };

    /// Fits in a single tile at every level.
    pub const SINGLE_TILE: PyramidSize = PyramidSize {
        width: 40,
        height: 30,
        tile_size: 256,
        overlap: 1,
    };
}

/// Common RGBA colors.
pub mod colors {
    pub const BLACK: [u8; 4] = [0, 0, 0, 255];
    pub const WHITE: [u8; 4] = [255, 255, 255, 255];
    pub const RED: [u8; 4] = [255, 0, 0, 255];
    pub const GREEN: [u8; 4] = [0, 255, 0, 255];
    pub const BLUE: [u8; 4] = [0, 0, 255, 255];
    pub const TRANSPARENT: [u8; 4] = [0, 0, 0, 0];
}

/// Writes an executable shell script that behaves like a page rasterizer:
/// it appends its arguments to `log` and copies `fixture` to
/// `<last argument>.png`.
#[cfg(unix)]
pub fn fake_rasterizer(dir: impl AsRef<Path>, fixture: &Path, log: &Path) -> PathBuf {
    let body = format!(
        "for last; do :; done\necho \"$@\" >> '{}'\ncp '{}' \"$last.png\"\n",
        log.display(),
        fixture.display()
    );
    write_script(dir.as_ref(), "fake-rasterizer", &body)
}

/// Writes a rasterizer script that prints `message` to stderr and exits
/// with status 3.
#[cfg(unix)]
pub fn failing_rasterizer(dir: impl AsRef<Path>, message: &str) -> PathBuf {
    let body = format!("echo '{}' >&2\nexit 3\n", message);
    write_script(dir.as_ref(), "failing-rasterizer", &body)
}

/// Writes a rasterizer script that succeeds without producing any file.
#[cfg(unix)]
pub fn silent_rasterizer(dir: impl AsRef<Path>) -> PathBuf {
    write_script(dir.as_ref(), "silent-rasterizer", "exit 0\n")
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("Failed to make script executable");
    path
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_fake_rasterizer_copies_fixture() {
        let dir = crate::temp_test_dir();
        let fixture = dir.path().join("fixture.png");
        std::fs::write(&fixture, b"png").unwrap();
        let log = dir.path().join("calls.log");
        let script = fake_rasterizer(dir.path(), &fixture, &log);

        let prefix = dir.path().join("out");
        let status = Command::new(&script).arg("-q").arg(&prefix).status().unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read(dir.path().join("out.png")).unwrap(), b"png");
        assert!(std::fs::read_to_string(&log).unwrap().starts_with("-q "));
    }

    #[test]
    fn test_failing_rasterizer() {
        let dir = crate::temp_test_dir();
        let output = Command::new(failing_rasterizer(dir.path(), "bad page"))
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(String::from_utf8_lossy(&output.stderr).trim(), "bad page");
    }
}
