//! Tile-part length table (TLM) builder.
//!
//! The collector learns tile-part lengths one tile at a time but the table
//! lives in the main header, ahead of every tile. The builder fixes the
//! table's size at [`TlmBuilder::init`] so the region can be reserved before
//! any tile data is written, then renders the real table once every tile has
//! been accounted for.
//!
//! # Segment layout
//!
//! ```text
//! +------+------+------+------+---------------------------+
//! | FF55 | Ltlm | Ztlm | Stlm | Ttlm/Ptlm records ...      |
//! +------+------+------+------+---------------------------+
//!   u16    u16    u8     u8     ST + SP bytes per record
//! ```
//!
//! `Stlm` carries the tile index field size (ST, bits 4-5) and the length
//! field size (SP, bit 6: 0 = 16 bit, 1 = 32 bit). A segment holds at most
//! `(65535 - 4) / record_size` records; larger tables spill into further
//! segments, up to 256.

use std::io::Write;

use thiserror::Error;
use tracing::debug;

use crate::codestream::markers::TLM;

/// Largest Ltlm value.
const MAX_SEGMENT_LENGTH: usize = 65535;

/// Ltlm + Ztlm + Stlm.
const SEGMENT_FIXED_BYTES: usize = 4;

/// Marker bytes ahead of Ltlm.
const MARKER_BYTES: usize = 2;

/// Ztlm is a single byte.
const MAX_SEGMENTS: usize = 256;

/// Errors from table accounting and rendering.
#[derive(Debug, Error)]
pub enum TlmError {
    #[error("Invalid TLM layout: {0}")]
    InvalidLayout(String),

    #[error("Tile {tile} does not fit a {bytes}-byte tile index field")]
    TileIndexOverflow { tile: u32, bytes: u8 },

    #[error("TLM needs {segments} segments, at most 256 are allowed")]
    TooManySegments { segments: usize },

    #[error("Tile {tile} out of range (table has {num_tiles} tiles)")]
    TileOutOfRange { tile: u32, num_tiles: u32 },

    #[error("Tile {tile} already has {max} tile-part lengths")]
    TooManyTileParts { tile: u32, max: u8 },

    #[error("Tile {tile} has {recorded} of {expected} tile-part lengths")]
    Incomplete {
        tile: u32,
        recorded: usize,
        expected: u8,
    },

    #[error("Tile {tile} length {length} does not fit a {bytes}-byte length field")]
    LengthOverflow { tile: u32, length: u64, bytes: u8 },

    #[error("TLM already written")]
    Finalized,

    #[error("I/O error writing TLM: {0}")]
    Io(#[from] std::io::Error),
}

/// Table-level parameters, fixed at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlmLayout {
    num_tiles: u32,
    max_tile_parts: u8,
    tile_index_bytes: u8,
    length_bytes: u8,
}

impl TlmLayout {
    /// Validate a layout.
    ///
    /// # Arguments
    ///
    /// * `num_tiles` - Tiles in the image
    /// * `max_tile_parts` - Tile-parts per tile, at least 1
    /// * `tile_index_bytes` - 0, 1 or 2; 0 means indices are implied and
    ///   only works with one tile-part per tile
    /// * `length_bytes` - 2 or 4
    pub fn new(
        num_tiles: u32,
        max_tile_parts: u8,
        tile_index_bytes: u8,
        length_bytes: u8,
    ) -> Result<Self, TlmError> {
        if max_tile_parts == 0 {
            return Err(TlmError::InvalidLayout(
                "max_tile_parts must be at least 1".to_string(),
            ));
        }
        if tile_index_bytes > 2 {
            return Err(TlmError::InvalidLayout(format!(
                "tile index field must be 0, 1 or 2 bytes, got {}",
                tile_index_bytes
            )));
        }
        if tile_index_bytes == 0 && max_tile_parts > 1 {
            return Err(TlmError::InvalidLayout(
                "implied tile indices need exactly one tile-part per tile".to_string(),
            ));
        }
        if length_bytes != 2 && length_bytes != 4 {
            return Err(TlmError::InvalidLayout(format!(
                "length field must be 2 or 4 bytes, got {}",
                length_bytes
            )));
        }
        let last = num_tiles.saturating_sub(1);
        let index_limit = match tile_index_bytes {
            1 => u32::from(u8::MAX),
            2 => u32::from(u16::MAX),
            _ => u32::MAX,
        };
        if last > index_limit {
            return Err(TlmError::TileIndexOverflow {
                tile: last,
                bytes: tile_index_bytes,
            });
        }

        let layout = Self {
            num_tiles,
            max_tile_parts,
            tile_index_bytes,
            length_bytes,
        };
        let segments = layout.num_segments();
        if segments > MAX_SEGMENTS {
            return Err(TlmError::TooManySegments { segments });
        }
        Ok(layout)
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_tiles
    }

    pub fn max_tile_parts(&self) -> u8 {
        self.max_tile_parts
    }

    pub fn tile_index_bytes(&self) -> u8 {
        self.tile_index_bytes
    }

    pub fn length_bytes(&self) -> u8 {
        self.length_bytes
    }

    pub fn record_bytes(&self) -> usize {
        usize::from(self.tile_index_bytes) + usize::from(self.length_bytes)
    }

    pub fn num_records(&self) -> usize {
        self.num_tiles as usize * usize::from(self.max_tile_parts)
    }

    pub fn records_per_segment(&self) -> usize {
        (MAX_SEGMENT_LENGTH - SEGMENT_FIXED_BYTES) / self.record_bytes()
    }

    pub fn num_segments(&self) -> usize {
        self.num_records().div_ceil(self.records_per_segment()).max(1)
    }

    /// Rendered size of the whole table, markers included.
    pub fn tlm_bytes(&self) -> usize {
        self.num_segments() * (MARKER_BYTES + SEGMENT_FIXED_BYTES)
            + self.num_records() * self.record_bytes()
    }

    fn stlm(&self) -> u8 {
        let sp = u8::from(self.length_bytes == 4);
        (self.tile_index_bytes << 4) | (sp << 6)
    }

    /// Encode `records` (tile index, length) in segment order.
    fn encode(&self, records: &[(u32, u64)]) -> Result<Vec<u8>, TlmError> {
        let mut out = Vec::with_capacity(self.tlm_bytes());
        let chunks: Vec<&[(u32, u64)]> = if records.is_empty() {
            vec![&[]]
        } else {
            records.chunks(self.records_per_segment()).collect()
        };

        for (z, chunk) in chunks.iter().enumerate() {
            let ltlm = SEGMENT_FIXED_BYTES + chunk.len() * self.record_bytes();
            out.extend_from_slice(&TLM.to_be_bytes());
            out.extend_from_slice(&(ltlm as u16).to_be_bytes());
            out.push(z as u8);
            out.push(self.stlm());
            for &(tile, length) in chunk.iter() {
                match self.tile_index_bytes {
                    1 => out.push(tile as u8),
                    2 => out.extend_from_slice(&(tile as u16).to_be_bytes()),
                    _ => {}
                }
                if self.length_bytes == 2 {
                    let length = u16::try_from(length).map_err(|_| TlmError::LengthOverflow {
                        tile,
                        length,
                        bytes: 2,
                    })?;
                    out.extend_from_slice(&length.to_be_bytes());
                } else {
                    let length = u32::try_from(length).map_err(|_| TlmError::LengthOverflow {
                        tile,
                        length,
                        bytes: 4,
                    })?;
                    out.extend_from_slice(&length.to_be_bytes());
                }
            }
        }
        Ok(out)
    }

    /// The table with every length zero, used to reserve its region.
    pub fn placeholder(&self) -> Vec<u8> {
        let records: Vec<(u32, u64)> = (0..self.num_tiles)
            .flat_map(|t| std::iter::repeat((t, 0)).take(usize::from(self.max_tile_parts)))
            .collect();
        // Zero lengths always fit.
        self.encode(&records).unwrap_or_default()
    }
}

/// Accumulates tile-part lengths and renders the finished table.
///
/// # Example
///
/// ```
/// use tilepress::tlm::TlmBuilder;
///
/// let mut tlm = TlmBuilder::init(2, 1, 2, 4).unwrap();
/// assert_eq!(tlm.tlm_bytes(), 6 + 2 * 6);
///
/// tlm.add_tpart_length(0, 1200).unwrap();
/// tlm.add_tpart_length(1, 800).unwrap();
///
/// let mut table = Vec::new();
/// tlm.write_tlms(&mut table).unwrap();
/// assert_eq!(table.len(), tlm.tlm_bytes());
/// ```
#[derive(Debug, Clone)]
pub struct TlmBuilder {
    layout: TlmLayout,
    lengths: Vec<Vec<u64>>,
    finalized: bool,
}

impl TlmBuilder {
    /// Start a table. The rendered size is known from here on.
    pub fn init(
        num_tiles: u32,
        max_tile_parts: u8,
        tile_index_bytes: u8,
        length_bytes: u8,
    ) -> Result<Self, TlmError> {
        let layout = TlmLayout::new(num_tiles, max_tile_parts, tile_index_bytes, length_bytes)?;
        Ok(Self::from_layout(layout))
    }

    pub fn from_layout(layout: TlmLayout) -> Self {
        debug!(
            num_tiles = layout.num_tiles(),
            max_tile_parts = layout.max_tile_parts(),
            segments = layout.num_segments(),
            tlm_bytes = layout.tlm_bytes(),
            "TLM initialised"
        );
        Self {
            layout,
            lengths: vec![Vec::with_capacity(usize::from(layout.max_tile_parts())); layout.num_tiles() as usize],
            finalized: false,
        }
    }

    pub fn layout(&self) -> &TlmLayout {
        &self.layout
    }

    pub fn tlm_bytes(&self) -> usize {
        self.layout.tlm_bytes()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Lengths recorded so far for `tile`.
    pub fn tile_lengths(&self, tile: u32) -> &[u64] {
        self.lengths
            .get(tile as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sum of every recorded length.
    pub fn total_length(&self) -> u64 {
        self.lengths.iter().flatten().sum()
    }

    /// Record the length of the next tile-part of `tile`.
    pub fn add_tpart_length(&mut self, tile: u32, length: u64) -> Result<(), TlmError> {
        if self.finalized {
            return Err(TlmError::Finalized);
        }
        let num_tiles = self.layout.num_tiles();
        let max = self.layout.max_tile_parts();
        let parts = self
            .lengths
            .get_mut(tile as usize)
            .ok_or(TlmError::TileOutOfRange { tile, num_tiles })?;
        if parts.len() >= usize::from(max) {
            return Err(TlmError::TooManyTileParts { tile, max });
        }
        parts.push(length);
        Ok(())
    }

    /// Render the finished table into `out`.
    ///
    /// Every tile must have exactly `max_tile_parts` lengths. On success the
    /// builder is finalized.
    pub fn write_tlms<W: Write>(&mut self, out: &mut W) -> Result<(), TlmError> {
        if self.finalized {
            return Err(TlmError::Finalized);
        }
        let expected = self.layout.max_tile_parts();
        let mut records = Vec::with_capacity(self.layout.num_records());
        for (tile, parts) in self.lengths.iter().enumerate() {
            if parts.len() != usize::from(expected) {
                return Err(TlmError::Incomplete {
                    tile: tile as u32,
                    recorded: parts.len(),
                    expected,
                });
            }
            records.extend(parts.iter().map(|&length| (tile as u32, length)));
        }

        let table = self.layout.encode(&records)?;
        out.write_all(&table)?;
        self.finalized = true;
        debug!(bytes = table.len(), "TLM written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tlm_bytes_known_at_init() {
        let tlm = TlmBuilder::init(16, 1, 2, 4).unwrap();
        assert_eq!(tlm.tlm_bytes(), 6 + 16 * 6);

        let tlm = TlmBuilder::init(16, 3, 1, 2).unwrap();
        assert_eq!(tlm.tlm_bytes(), 6 + 48 * 3);
    }

    #[test]
    fn test_table_spills_into_segments() {
        let layout = TlmLayout::new(20_000, 1, 2, 4).unwrap();
        assert_eq!(layout.records_per_segment(), 10_921);
        assert_eq!(layout.num_segments(), 2);
        assert_eq!(layout.tlm_bytes(), 2 * 6 + 20_000 * 6);
        assert_eq!(layout.placeholder().len(), layout.tlm_bytes());
    }

    #[test]
    fn test_rendered_table_bytes() {
        let mut tlm = TlmBuilder::init(2, 1, 2, 4).unwrap();
        tlm.add_tpart_length(0, 0x0102).unwrap();
        tlm.add_tpart_length(1, 0x0A0B0C0D).unwrap();
        let mut out = Vec::new();
        tlm.write_tlms(&mut out).unwrap();

        assert_eq!(
            out,
            vec![
                0xFF, 0x55, 0x00, 0x10, 0x00, 0x60, // marker, Ltlm 16, Z 0, ST 2 + SP 1
                0x00, 0x00, 0x00, 0x00, 0x01, 0x02, // tile 0
                0x00, 0x01, 0x0A, 0x0B, 0x0C, 0x0D, // tile 1
            ]
        );
    }

    #[test]
    fn test_placeholder_matches_final_size() {
        let mut tlm = TlmBuilder::init(5, 2, 2, 4).unwrap();
        let placeholder = tlm.layout().placeholder();
        for tile in 0..5 {
            tlm.add_tpart_length(tile, 100).unwrap();
            tlm.add_tpart_length(tile, 14).unwrap();
        }
        let mut out = Vec::new();
        tlm.write_tlms(&mut out).unwrap();
        assert_eq!(out.len(), placeholder.len());
        assert_eq!(out[..6], placeholder[..6]);
    }

    #[test]
    fn test_write_requires_every_tile() {
        let mut tlm = TlmBuilder::init(3, 1, 2, 4).unwrap();
        tlm.add_tpart_length(0, 10).unwrap();
        tlm.add_tpart_length(2, 10).unwrap();
        let err = tlm.write_tlms(&mut Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            TlmError::Incomplete {
                tile: 1,
                recorded: 0,
                expected: 1
            }
        ));
        assert!(!tlm.is_finalized());
    }

    #[test]
    fn test_finalized_builder_rejects_more_lengths() {
        let mut tlm = TlmBuilder::init(1, 1, 2, 4).unwrap();
        tlm.add_tpart_length(0, 10).unwrap();
        tlm.write_tlms(&mut Vec::new()).unwrap();
        assert!(matches!(tlm.add_tpart_length(0, 1), Err(TlmError::Finalized)));
        assert!(matches!(
            tlm.write_tlms(&mut Vec::new()),
            Err(TlmError::Finalized)
        ));
    }

    #[test]
    fn test_too_many_tile_parts() {
        let mut tlm = TlmBuilder::init(1, 1, 2, 4).unwrap();
        tlm.add_tpart_length(0, 10).unwrap();
        assert!(matches!(
            tlm.add_tpart_length(0, 10),
            Err(TlmError::TooManyTileParts { tile: 0, max: 1 })
        ));
        assert!(matches!(
            tlm.add_tpart_length(4, 10),
            Err(TlmError::TileOutOfRange { tile: 4, .. })
        ));
    }

    #[test]
    fn test_length_overflow_in_short_field() {
        let mut tlm = TlmBuilder::init(1, 1, 2, 2).unwrap();
        tlm.add_tpart_length(0, 70_000).unwrap();
        assert!(matches!(
            tlm.write_tlms(&mut Vec::new()),
            Err(TlmError::LengthOverflow { tile: 0, length: 70_000, bytes: 2 })
        ));
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(matches!(
            TlmLayout::new(300, 1, 1, 4),
            Err(TlmError::TileIndexOverflow { tile: 299, bytes: 1 })
        ));
        assert!(matches!(
            TlmLayout::new(4, 2, 0, 4),
            Err(TlmError::InvalidLayout(_))
        ));
        assert!(matches!(
            TlmLayout::new(4, 1, 2, 3),
            Err(TlmError::InvalidLayout(_))
        ));
        assert!(matches!(
            TlmLayout::new(4, 0, 2, 4),
            Err(TlmError::InvalidLayout(_))
        ));
    }

    #[test]
    fn test_too_many_segments() {
        // 65536 tiles × 255 parts of 6 bytes needs far more than 256 segments.
        assert!(matches!(
            TlmLayout::new(65_536, 255, 2, 4),
            Err(TlmError::TooManySegments { .. })
        ));
    }
}
