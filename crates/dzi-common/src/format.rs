//! Tile file formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DziError;

/// On-disk tile format.
///
/// The spelling is preserved (`jpg` vs `jpeg`, `tif` vs `tiff`) because it is
/// both the tile file extension and the `Format` attribute of the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Png,
    Jpg,
    Jpeg,
    Tif,
    Tiff,
    Bmp,
}

impl TileFormat {
    /// File extension (and descriptor `Format` value).
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Tif => "tif",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
        }
    }

    /// Whether the codec cannot store an alpha channel.
    pub fn is_opaque(&self) -> bool {
        matches!(self, Self::Jpg | Self::Jpeg | Self::Bmp)
    }

    /// Output switch understood by `pdftoppm`.
    pub fn rasterizer_flag(&self) -> Option<&'static str> {
        match self {
            Self::Png => Some("-png"),
            Self::Jpg | Self::Jpeg => Some("-jpeg"),
            Self::Tif | Self::Tiff => Some("-tiff"),
            Self::Bmp => None,
        }
    }

    /// Extension `pdftoppm` appends to its output prefix.
    pub fn rasterizer_extension(&self) -> Option<&'static str> {
        match self {
            Self::Png => Some("png"),
            Self::Jpg | Self::Jpeg => Some("jpg"),
            Self::Tif | Self::Tiff => Some("tif"),
            Self::Bmp => None,
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for TileFormat {
    type Err = DziError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" => Ok(Self::Jpg),
            "jpeg" => Ok(Self::Jpeg),
            "tif" => Ok(Self::Tif),
            "tiff" => Ok(Self::Tiff),
            "bmp" => Ok(Self::Bmp),
            other => Err(DziError::configuration(format!(
                "unsupported tile format '{}'",
                other
            ))),
        }
    }
}
