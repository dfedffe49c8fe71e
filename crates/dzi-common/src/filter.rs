//! Resampling filter selection.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DziError;

/// Resampling filter used whenever a raster is resized.
///
/// `cubic` and `bicubic` are accepted as separate names for compatibility
/// with existing command lines; both select the same cubic kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResampleFilter {
    Nearest,
    Bilinear,
    Bicubic,
    Cubic,
    /// High quality windowed-sinc filter
    #[default]
    Antialias,
}

impl ResampleFilter {
    pub const ALL: [ResampleFilter; 5] = [
        ResampleFilter::Nearest,
        ResampleFilter::Bilinear,
        ResampleFilter::Bicubic,
        ResampleFilter::Cubic,
        ResampleFilter::Antialias,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Cubic => "cubic",
            Self::Antialias => "antialias",
        }
    }
}

impl fmt::Display for ResampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResampleFilter {
    type Err = DziError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|filter| filter.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                DziError::configuration(format!(
                    "unknown resampling filter '{}' (expected one of nearest, bilinear, bicubic, cubic, antialias)",
                    s
                ))
            })
    }
}
