//! Reference compressor: DEFLATE-coded samples in a tiled codestream.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::trace;

use super::markers::{
    COD, COD_LENGTH, SIZ, SIZ_FLAG_ALPHA, SIZ_LENGTH, SOC, SOD, SOT, SOT_LENGTH,
    TILE_PART_HEADER_BYTES,
};
use super::{CompressError, CompressParams, TileCompressor};
use crate::raster::{ScalarType, TileBuffer};

/// DEFLATE level used when none is configured.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Tiled codestream compressor with DEFLATE payloads.
///
/// Each tile becomes one data tile-part holding the DEFLATE stream of its
/// big-endian band-sequential samples, followed by blank filler tile-parts
/// up to `max_tile_parts`. A tile that was never written gets an empty
/// data tile-part.
///
/// # Example
///
/// ```
/// use tilepress::codestream::{CodestreamCompressor, TileCompressor};
///
/// let compressor = CodestreamCompressor::new().with_compression_level(9);
/// assert_eq!(compressor.compression_level(), 9);
/// assert_eq!(compressor.name(), "deflate codestream");
/// ```
#[derive(Debug, Clone)]
pub struct CodestreamCompressor {
    level: u32,
    current: Option<CompressParams>,
    payload: Vec<u8>,
}

impl CodestreamCompressor {
    pub fn new() -> Self {
        Self {
            level: DEFAULT_COMPRESSION_LEVEL,
            current: None,
            payload: Vec::new(),
        }
    }

    /// Set the DEFLATE level, clamped to 0..=9.
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.level = level.min(MAX_COMPRESSION_LEVEL);
        self
    }

    pub fn compression_level(&self) -> u32 {
        self.level
    }

    fn write_main_header(
        &self,
        stream: &mut dyn Write,
        params: &CompressParams,
    ) -> Result<(), CompressError> {
        let bands = u16::try_from(params.bands).map_err(|_| CompressError::FieldOverflow {
            field: "bands",
            value: u64::from(params.bands),
        })?;
        let flags = if params.alpha { SIZ_FLAG_ALPHA } else { 0 };

        let mut header = Vec::with_capacity(64 + params.tlm.tlm_bytes());
        header.extend_from_slice(&SOC.to_be_bytes());

        header.extend_from_slice(&SIZ.to_be_bytes());
        header.extend_from_slice(&SIZ_LENGTH.to_be_bytes());
        header.extend_from_slice(&params.image_rect.width.to_be_bytes());
        header.extend_from_slice(&params.image_rect.height.to_be_bytes());
        header.extend_from_slice(&params.tile_size.0.to_be_bytes());
        header.extend_from_slice(&params.tile_size.1.to_be_bytes());
        header.extend_from_slice(&params.num_tiles.to_be_bytes());
        header.extend_from_slice(&bands.to_be_bytes());
        header.extend_from_slice(&params.scalar.code().to_be_bytes());
        header.push(params.scalar.actual_bits() as u8);
        header.push(flags);

        header.extend_from_slice(&COD.to_be_bytes());
        header.extend_from_slice(&COD_LENGTH.to_be_bytes());
        header.push(self.level as u8);
        header.push(params.max_tile_parts());
        header.push(0); // band-sequential

        header.extend_from_slice(&params.tlm.placeholder());
        stream.write_all(&header)?;
        Ok(())
    }
}

impl Default for CodestreamCompressor {
    fn default() -> Self {
        Self::new()
    }
}

fn write_tile_part_header(
    stream: &mut dyn Write,
    tile: u16,
    psot: u32,
    part: u8,
    parts: u8,
) -> Result<(), CompressError> {
    let mut header = [0u8; TILE_PART_HEADER_BYTES];
    header[0..2].copy_from_slice(&SOT.to_be_bytes());
    header[2..4].copy_from_slice(&SOT_LENGTH.to_be_bytes());
    header[4..6].copy_from_slice(&tile.to_be_bytes());
    header[6..10].copy_from_slice(&psot.to_be_bytes());
    header[10] = part;
    header[11] = parts;
    header[12..14].copy_from_slice(&SOD.to_be_bytes());
    stream.write_all(&header)?;
    Ok(())
}

impl TileCompressor for CodestreamCompressor {
    fn create(
        &mut self,
        stream: &mut dyn Write,
        params: &CompressParams,
    ) -> Result<(), CompressError> {
        self.current = None;
        self.payload.clear();

        if params.scalar == ScalarType::Unknown {
            return Err(CompressError::UnsupportedScalar(params.scalar));
        }
        if params.tile_index > u32::from(u16::MAX) {
            return Err(CompressError::FieldOverflow {
                field: "tile index",
                value: u64::from(params.tile_index),
            });
        }
        if params.tile_index == 0 {
            self.write_main_header(stream, params)?;
        }

        trace!(
            tile = params.tile_index,
            fragment = %params.fragment,
            "compressor created"
        );
        self.current = Some(params.clone());
        Ok(())
    }

    fn write_tile(
        &mut self,
        _stream: &mut dyn Write,
        tile: &TileBuffer,
    ) -> Result<bool, CompressError> {
        let params = self.current.as_ref().ok_or(CompressError::NotCreated)?;
        if (tile.width(), tile.height()) != params.tile_size || tile.bands() != params.bands {
            return Err(CompressError::TileMismatch(format!(
                "expected {}×{}×{}, got {}×{}×{}",
                params.tile_size.0,
                params.tile_size.1,
                params.bands,
                tile.width(),
                tile.height(),
                tile.bands()
            )));
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(&tile.data().to_be_bytes())?;
        self.payload = encoder.finish()?;
        Ok(true)
    }

    fn finish(&mut self, stream: &mut dyn Write) -> Result<(), CompressError> {
        let params = self.current.take().ok_or(CompressError::NotCreated)?;
        let tile = params.tile_index as u16;
        let parts = params.max_tile_parts();

        let length = TILE_PART_HEADER_BYTES + self.payload.len();
        let psot = u32::try_from(length).map_err(|_| CompressError::FieldOverflow {
            field: "tile-part length",
            value: length as u64,
        })?;
        write_tile_part_header(stream, tile, psot, 0, parts)?;
        stream.write_all(&self.payload)?;

        for part in 1..parts {
            write_tile_part_header(stream, tile, TILE_PART_HEADER_BYTES as u32, part, parts)?;
        }

        trace!(tile = params.tile_index, bytes = length, "tile finished");
        self.payload.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "deflate codestream"
    }
}

/// Decode the DEFLATE payload of a data tile-part.
pub fn inflate_payload(payload: &[u8]) -> Result<Vec<u8>, CompressError> {
    let mut out = Vec::new();
    DeflateDecoder::new(payload).read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::markers::BLANK_TILE_PART_BYTES;
    use crate::codestream::{locate_tlm, read_tile_parts};
    use crate::geometry::Rect;
    use crate::tlm::TlmLayout;

    fn params(tile_index: u32, max_tile_parts: u8) -> CompressParams {
        CompressParams {
            scalar: ScalarType::U8,
            bands: 1,
            image_rect: Rect::from_size(8, 8),
            tile_size: (4, 4),
            num_tiles: 4,
            alpha: false,
            fragment: Rect::new(0, 0, 4, 4),
            tile_index,
            tlm: TlmLayout::new(4, max_tile_parts, 2, 4).unwrap(),
        }
    }

    fn tile_with(value: f64) -> TileBuffer {
        let mut tile = TileBuffer::with_defaults(Rect::from_size(4, 4), ScalarType::U8, 1);
        tile.fill_band(0, value);
        tile.validate();
        tile
    }

    #[test]
    fn test_tile_zero_carries_header_and_placeholder() {
        let mut compressor = CodestreamCompressor::new();
        let p = params(0, 1);
        let mut out = Vec::new();
        compressor.create(&mut out, &p).unwrap();
        compressor.write_tile(&mut out, &tile_with(9.0)).unwrap();
        compressor.finish(&mut out).unwrap();

        let idx = locate_tlm(&out).unwrap();
        assert_eq!(idx, 2 + 2 + SIZ_LENGTH as usize + 2 + COD_LENGTH as usize);
        let placeholder = &out[idx..idx + p.tlm.tlm_bytes()];
        assert_eq!(placeholder, p.tlm.placeholder().as_slice());

        let tile_part = &out[idx + p.tlm.tlm_bytes()..];
        assert_eq!(&tile_part[0..2], &SOT.to_be_bytes());
        let psot = u32::from_be_bytes([tile_part[6], tile_part[7], tile_part[8], tile_part[9]]);
        assert_eq!(psot as usize, tile_part.len());
    }

    #[test]
    fn test_other_tiles_have_no_header() {
        let mut compressor = CodestreamCompressor::new();
        let mut out = Vec::new();
        compressor.create(&mut out, &params(3, 1)).unwrap();
        compressor.write_tile(&mut out, &tile_with(1.0)).unwrap();
        compressor.finish(&mut out).unwrap();

        assert_eq!(&out[0..2], &SOT.to_be_bytes());
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 3);
    }

    #[test]
    fn test_unwritten_tile_is_header_only() {
        let mut compressor = CodestreamCompressor::new();
        let mut out = Vec::new();
        compressor.create(&mut out, &params(1, 1)).unwrap();
        compressor.finish(&mut out).unwrap();
        assert_eq!(out.len(), BLANK_TILE_PART_BYTES);
    }

    #[test]
    fn test_filler_tile_parts() {
        let mut compressor = CodestreamCompressor::new();
        let mut out = Vec::new();
        compressor.create(&mut out, &params(2, 3)).unwrap();
        compressor.write_tile(&mut out, &tile_with(5.0)).unwrap();
        compressor.finish(&mut out).unwrap();

        let parts = read_tile_parts(&out, 0).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].length, BLANK_TILE_PART_BYTES as u32);
        assert_eq!(parts[2].part, 2);
        assert!(parts.iter().all(|p| p.tile == 2 && p.num_parts == 3));
    }

    #[test]
    fn test_payload_decodes_to_samples() {
        let mut compressor = CodestreamCompressor::new().with_compression_level(1);
        let tile = tile_with(77.0);
        let mut out = Vec::new();
        compressor.create(&mut out, &params(1, 1)).unwrap();
        compressor.write_tile(&mut out, &tile).unwrap();
        compressor.finish(&mut out).unwrap();

        let samples = inflate_payload(&out[TILE_PART_HEADER_BYTES..]).unwrap();
        assert_eq!(samples, tile.data().to_be_bytes());
    }

    #[test]
    fn test_finish_without_create_fails() {
        let mut compressor = CodestreamCompressor::new();
        assert!(matches!(
            compressor.finish(&mut Vec::new()),
            Err(CompressError::NotCreated)
        ));
    }

    #[test]
    fn test_unknown_scalar_fails_create() {
        let mut compressor = CodestreamCompressor::new();
        let mut p = params(0, 1);
        p.scalar = ScalarType::Unknown;
        let mut out = Vec::new();
        assert!(compressor.create(&mut out, &p).is_err());
        assert!(out.is_empty());
        assert!(compressor.finish(&mut out).is_err());
    }

    #[test]
    fn test_mismatched_tile_is_rejected() {
        let mut compressor = CodestreamCompressor::new();
        let mut out = Vec::new();
        compressor.create(&mut out, &params(1, 1)).unwrap();
        let small = TileBuffer::with_defaults(Rect::from_size(2, 2), ScalarType::U8, 1);
        assert!(matches!(
            compressor.write_tile(&mut out, &small),
            Err(CompressError::TileMismatch(_))
        ));
    }

    #[test]
    fn test_compression_level_is_clamped() {
        assert_eq!(
            CodestreamCompressor::new()
                .with_compression_level(42)
                .compression_level(),
            9
        );
    }
}
