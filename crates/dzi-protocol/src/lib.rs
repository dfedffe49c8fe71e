//! Deep Zoom on-disk protocol.
//!
//! Supports:
//! - The XML image descriptor (`<name>.dzi`) read by Deep Zoom viewers
//! - The tile tree layout (`<name>_files/<level>/<col>_<row>.<format>`)

pub mod descriptor;
pub mod layout;

pub use descriptor::{Descriptor, DEEPZOOM_NAMESPACE};
pub use layout::PyramidLayout;
