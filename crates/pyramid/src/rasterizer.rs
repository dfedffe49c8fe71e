//! External page rasterizer.
//!
//! PDF pages are not decoded in-process. For every tile, `pdftoppm` (or a
//! compatible program) renders the page at the level's pixel size and writes
//! only the tile's window to disk.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use dzi_common::{DziError, DziResult, TileBox, TileCoord, TileFormat};

use crate::store::TileStore;

/// Default rasterizer program.
pub const DEFAULT_RASTERIZER: &str = "pdftoppm";

/// Renders windows of one document page.
#[derive(Debug, Clone)]
pub struct PageRasterizer {
    program: PathBuf,
    source: PathBuf,
    page: u32,
    format: TileFormat,
}

impl PageRasterizer {
    pub fn new(
        program: impl Into<PathBuf>,
        source: impl Into<PathBuf>,
        page: u32,
        format: TileFormat,
    ) -> DziResult<Self> {
        if format.rasterizer_flag().is_none() {
            return Err(DziError::configuration(format!(
                "page rasterizer cannot write {} tiles",
                format
            )));
        }
        if page == 0 {
            return Err(DziError::configuration("page numbers start at 1"));
        }
        Ok(Self {
            program: program.into(),
            source: source.into(),
            page,
            format,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    /// The command rendering `window` of the page scaled to `scale`
    /// (`(width, height)` in pixels) into `<prefix>.<ext>`.
    pub fn command(&self, scale: (u32, u32), window: &TileBox, prefix: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("-f")
            .arg(self.page.to_string())
            .arg("-singlefile")
            .arg("-scale-to-x")
            .arg(scale.0.to_string())
            .arg("-scale-to-y")
            .arg(scale.1.to_string())
            .arg("-x")
            .arg(window.x0.to_string())
            .arg("-y")
            .arg(window.y0.to_string())
            .arg("-W")
            .arg(window.width().to_string())
            .arg("-H")
            .arg(window.height().to_string());
        if let Some(flag) = self.format.rasterizer_flag() {
            command.arg(flag);
        }
        command.arg("-q").arg(&self.source).arg(prefix);
        command
    }

    /// Render tile `coord` and install it in `store`.
    pub fn render(
        &self,
        store: &TileStore,
        coord: TileCoord,
        scale: (u32, u32),
        window: &TileBox,
    ) -> DziResult<PathBuf> {
        let level_dir = store.materialize_directory(coord.level)?;
        let scratch = tempfile::Builder::new()
            .prefix(".render")
            .tempdir_in(&level_dir)
            .map_err(|e| DziError::io(&level_dir, e))?;
        let prefix = scratch.path().join("tile");

        let output = self
            .command(scale, window, &prefix)
            .output()
            .map_err(|e| DziError::ExternalTool {
                coord,
                message: format!("failed to run {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            return Err(DziError::ExternalTool {
                coord,
                message: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        // Checked in the constructor.
        let extension = self.format.rasterizer_extension().unwrap_or("png");
        let produced = prefix.with_extension(extension);
        if !produced.is_file() {
            return Err(DziError::ExternalTool {
                coord,
                message: format!("no output at {}", produced.display()),
            });
        }

        store.install_file(&coord, &produced)?;
        debug!(level = coord.level, col = coord.col, row = coord.row, "Rendered page tile");
        Ok(store.path(&coord))
    }
}
