//! Raster tiles and the image sources that produce them.
//!
//! - [`TileBuffer`] - multi-band block with per-band null/min/max and a
//!   [`TileStatus`]
//! - [`ImageSource`] - upstream reader consumed by the sequencer
//! - [`MemoryImage`] - in-memory source with reduced resolution levels
//! - [`open_image`] - decode an image file into a [`MemoryImage`]

mod buffer;
mod file;
mod scalar;
mod source;

pub use buffer::{PixelData, TileBuffer, TileStatus};
pub use file::{from_dynamic_image, open_image};
pub use scalar::{Pixel, ScalarType};
pub use source::{ImageSource, MemoryImage, SourceError};
