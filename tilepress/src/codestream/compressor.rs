//! The compressor contract used by the sequencer.

use std::io::Write;

use super::CompressError;
use crate::geometry::Rect;
use crate::raster::{ScalarType, TileBuffer};
use crate::tlm::TlmLayout;

/// Everything a compressor needs to encode one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressParams {
    pub scalar: ScalarType,
    pub bands: u32,
    /// Full output image rectangle.
    pub image_rect: Rect,
    pub tile_size: (u32, u32),
    pub num_tiles: u32,
    /// Always false for overview tiles.
    pub alpha: bool,
    /// Tile position in output space.
    pub fragment: Rect,
    pub tile_index: u32,
    /// Table layout; tile 0 embeds a placeholder of `tlm.tlm_bytes()`.
    pub tlm: TlmLayout,
}

impl CompressParams {
    pub fn max_tile_parts(&self) -> u8 {
        self.tlm.max_tile_parts()
    }
}

/// Encodes tiles into a byte stream, one tile per `create`/`finish` pair.
///
/// Implementations must be `Send` so a producer can run on its own thread.
///
/// # Contract
///
/// 1. `create` is called once per tile. For tile 0 it writes the main
///    header, including a zero-filled TLM placeholder of exactly
///    `params.tlm.tlm_bytes()` bytes.
/// 2. `write_tile` is called only when the tile holds data.
/// 3. `finish` is always called and emits every tile-part for the tile.
pub trait TileCompressor: Send {
    /// Prepare to encode the tile described by `params`.
    fn create(&mut self, stream: &mut dyn Write, params: &CompressParams)
        -> Result<(), CompressError>;

    /// Encode the tile samples. Returns false if the tile was not encoded.
    fn write_tile(
        &mut self,
        stream: &mut dyn Write,
        tile: &TileBuffer,
    ) -> Result<bool, CompressError>;

    /// Flush the tile-parts for the current tile.
    fn finish(&mut self, stream: &mut dyn Write) -> Result<(), CompressError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
