//! Structural walk over a codestream.
//!
//! The main header is read segment by segment using each segment's length
//! field, so an `FF55` byte pair inside another segment's body is never
//! mistaken for the TLM marker.

use std::ops::Range;

use super::markers::{self, COD, SIZ, SOC, SOT, TILE_PART_HEADER_BYTES, TLM};
use super::CompressError;
use crate::raster::ScalarType;

/// Decoded main header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainHeader {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub num_tiles: u32,
    pub bands: u16,
    pub scalar: ScalarType,
    pub bit_depth: u8,
    pub alpha: bool,
    pub compression_level: u8,
    pub max_tile_parts: u8,
    /// Offset of the first TLM marker, if any.
    pub tlm_offset: Option<usize>,
    /// Offset of the first byte after the main header.
    pub header_end: usize,
}

/// One Ttlm/Ptlm entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlmRecord {
    pub tile: u32,
    pub length: u32,
}

/// A tile-part located in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePart {
    /// Offset of the SOT marker.
    pub offset: usize,
    pub tile: u32,
    pub part: u8,
    pub num_parts: u8,
    /// Psot: the whole tile-part, SOT marker included.
    pub length: u32,
}

impl TilePart {
    /// Bytes after SOD.
    pub fn payload<'a>(&self, stream: &'a [u8]) -> &'a [u8] {
        let start = self.offset + TILE_PART_HEADER_BYTES;
        let end = self.offset + self.length as usize;
        &stream[start.min(stream.len())..end.min(stream.len())]
    }
}

#[derive(Debug)]
struct Segment {
    marker: u16,
    offset: usize,
    body: Range<usize>,
}

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, CompressError> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| CompressError::malformed(at, "truncated u16"))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, CompressError> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| CompressError::malformed(at, "truncated u32"))
}

/// Segments of the main header and the offset where it ends.
fn walk_main_header(bytes: &[u8]) -> Result<(Vec<Segment>, usize), CompressError> {
    if read_u16(bytes, 0)? != SOC {
        return Err(CompressError::malformed(0, "missing SOC marker"));
    }

    let mut segments = Vec::new();
    let mut pos = 2;
    while pos < bytes.len() {
        let marker = read_u16(bytes, pos)?;
        if markers::ends_main_header(marker) {
            return Ok((segments, pos));
        }
        if marker >> 8 != 0xFF {
            return Err(CompressError::malformed(
                pos,
                format!("expected a marker, found {:04X}", marker),
            ));
        }
        let length = read_u16(bytes, pos + 2)? as usize;
        if length < 2 || pos + 2 + length > bytes.len() {
            return Err(CompressError::malformed(
                pos,
                format!("segment {:04X} length {} out of bounds", marker, length),
            ));
        }
        segments.push(Segment {
            marker,
            offset: pos,
            body: pos + 4..pos + 2 + length,
        });
        pos += 2 + length;
    }
    Ok((segments, pos))
}

/// Offset of the first TLM marker in the main header at the start of
/// `bytes`, or `None` if there is none or the header is malformed.
pub fn locate_tlm(bytes: &[u8]) -> Option<usize> {
    let (segments, _) = walk_main_header(bytes).ok()?;
    segments.iter().find(|s| s.marker == TLM).map(|s| s.offset)
}

pub fn parse_main_header(bytes: &[u8]) -> Result<MainHeader, CompressError> {
    let (segments, header_end) = walk_main_header(bytes)?;

    let siz = segments
        .iter()
        .find(|s| s.marker == SIZ)
        .ok_or_else(|| CompressError::malformed(2, "missing SIZ segment"))?;
    let b = siz.body.start;
    if siz.body.len() < 26 {
        return Err(CompressError::malformed(siz.offset, "short SIZ segment"));
    }

    let (compression_level, max_tile_parts) = match segments.iter().find(|s| s.marker == COD) {
        Some(cod) if cod.body.len() >= 2 => (bytes[cod.body.start], bytes[cod.body.start + 1]),
        Some(cod) => return Err(CompressError::malformed(cod.offset, "short COD segment")),
        None => (0, 1),
    };

    Ok(MainHeader {
        image_width: read_u32(bytes, b)?,
        image_height: read_u32(bytes, b + 4)?,
        tile_width: read_u32(bytes, b + 8)?,
        tile_height: read_u32(bytes, b + 12)?,
        num_tiles: read_u32(bytes, b + 16)?,
        bands: read_u16(bytes, b + 20)?,
        scalar: ScalarType::from_code(read_u16(bytes, b + 22)?),
        bit_depth: bytes[b + 24],
        alpha: bytes[b + 25] & markers::SIZ_FLAG_ALPHA != 0,
        compression_level,
        max_tile_parts,
        tlm_offset: segments.iter().find(|s| s.marker == TLM).map(|s| s.offset),
        header_end,
    })
}

/// Every TLM record in the main header, in segment order.
///
/// Implied tile indices (ST = 0) are numbered from 0.
pub fn parse_tlm_segments(bytes: &[u8]) -> Result<Vec<TlmRecord>, CompressError> {
    let (segments, _) = walk_main_header(bytes)?;
    let mut records = Vec::new();

    for segment in segments.iter().filter(|s| s.marker == TLM) {
        let body = &bytes[segment.body.clone()];
        if body.len() < 2 {
            return Err(CompressError::malformed(segment.offset, "short TLM segment"));
        }
        let stlm = body[1];
        let st = usize::from((stlm >> 4) & 0x03);
        let sp = if stlm & 0x40 != 0 { 4 } else { 2 };
        if st == 3 {
            return Err(CompressError::malformed(segment.offset, "invalid ST value 3"));
        }
        let record = st + sp;
        let data = &body[2..];
        if data.len() % record != 0 {
            return Err(CompressError::malformed(
                segment.offset,
                "TLM body is not a whole number of records",
            ));
        }

        for chunk in data.chunks_exact(record) {
            let tile = match st {
                0 => records.len() as u32,
                1 => u32::from(chunk[0]),
                _ => u32::from(u16::from_be_bytes([chunk[0], chunk[1]])),
            };
            let p = &chunk[st..];
            let length = if sp == 4 {
                u32::from_be_bytes([p[0], p[1], p[2], p[3]])
            } else {
                u32::from(u16::from_be_bytes([p[0], p[1]]))
            };
            records.push(TlmRecord { tile, length });
        }
    }
    Ok(records)
}

/// Walk tile-parts starting at `offset` until the end of `bytes`.
pub fn read_tile_parts(bytes: &[u8], offset: usize) -> Result<Vec<TilePart>, CompressError> {
    let mut parts = Vec::new();
    let mut pos = offset;
    while pos < bytes.len() {
        if read_u16(bytes, pos)? != SOT {
            return Err(CompressError::malformed(pos, "expected SOT marker"));
        }
        let length = read_u32(bytes, pos + 6)?;
        let end = pos + length as usize;
        if (length as usize) < TILE_PART_HEADER_BYTES || end > bytes.len() {
            return Err(CompressError::malformed(
                pos,
                format!("tile-part length {} out of bounds", length),
            ));
        }
        let tile_part_header = bytes
            .get(pos + 10..pos + 12)
            .ok_or_else(|| CompressError::malformed(pos, "truncated SOT segment"))?;
        parts.push(TilePart {
            offset: pos,
            tile: u32::from(read_u16(bytes, pos + 4)?),
            part: tile_part_header[0],
            num_parts: tile_part_header[1],
            length,
        });
        pos = end;
    }
    Ok(parts)
}
