//! Fixed-size container header.

use std::io::Read;

use super::ContainerError;
use crate::geometry::TileGeometry;
use crate::raster::ScalarType;

pub const MAGIC: [u8; 8] = *b"TPOVR\0\0\0";
pub const VERSION: u16 = 1;
pub const HEADER_BYTES: usize = 64;

/// Container header. All integers are big-endian.
///
/// ```text
///  0  magic            8    36  output width   4
///  8  version          2    40  output height  4
/// 10  header length    2    44  tile width     4
/// 12  file length      8    48  tile height    4
/// 20  codestream off   4    52  tiles wide     4
/// 24  codestream len   8    56  tiles high     4
/// 32  decimation       2    60  bands          2
/// 34  reserved         2    62  scalar code    2
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub file_length: u64,
    pub codestream_offset: u32,
    pub codestream_length: u64,
    pub output_width: u32,
    pub output_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_wide: u32,
    pub tiles_high: u32,
    pub bands: u16,
    pub scalar: ScalarType,
    pub decimation: u16,
}

impl ContainerHeader {
    /// Header for an overview with lengths still unknown.
    pub fn for_geometry(
        geometry: &TileGeometry,
        scalar: ScalarType,
        bands: u32,
    ) -> Result<Self, ContainerError> {
        let (tile_width, tile_height) = geometry.tile_size();
        Ok(Self {
            version: VERSION,
            file_length: 0,
            codestream_offset: HEADER_BYTES as u32,
            codestream_length: 0,
            output_width: geometry.output_width(),
            output_height: geometry.output_height(),
            tile_width,
            tile_height,
            tiles_wide: geometry.tiles_wide(),
            tiles_high: geometry.tiles_high(),
            bands: narrow("bands", bands)?,
            scalar,
            decimation: narrow("decimation", geometry.decimation())?,
        })
    }

    pub fn num_tiles(&self) -> u64 {
        u64::from(self.tiles_wide) * u64::from(self.tiles_high)
    }

    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut out = [0u8; HEADER_BYTES];
        out[0..8].copy_from_slice(&MAGIC);
        out[8..10].copy_from_slice(&self.version.to_be_bytes());
        out[10..12].copy_from_slice(&(HEADER_BYTES as u16).to_be_bytes());
        out[12..20].copy_from_slice(&self.file_length.to_be_bytes());
        out[20..24].copy_from_slice(&self.codestream_offset.to_be_bytes());
        out[24..32].copy_from_slice(&self.codestream_length.to_be_bytes());
        out[32..34].copy_from_slice(&self.decimation.to_be_bytes());
        out[36..40].copy_from_slice(&self.output_width.to_be_bytes());
        out[40..44].copy_from_slice(&self.output_height.to_be_bytes());
        out[44..48].copy_from_slice(&self.tile_width.to_be_bytes());
        out[48..52].copy_from_slice(&self.tile_height.to_be_bytes());
        out[52..56].copy_from_slice(&self.tiles_wide.to_be_bytes());
        out[56..60].copy_from_slice(&self.tiles_high.to_be_bytes());
        out[60..62].copy_from_slice(&self.bands.to_be_bytes());
        out[62..64].copy_from_slice(&self.scalar.code().to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        if bytes.len() < HEADER_BYTES {
            return Err(ContainerError::Truncated(bytes.len()));
        }
        if bytes[0..8] != MAGIC {
            return Err(ContainerError::BadMagic);
        }
        let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| (u64::from(u32_at(at)) << 32) | u64::from(u32_at(at + 4));

        let version = u16_at(8);
        if version != VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let header_length = u16_at(10);
        if usize::from(header_length) != HEADER_BYTES {
            return Err(ContainerError::Corrupt(format!(
                "header length {header_length}"
            )));
        }

        Ok(Self {
            version,
            file_length: u64_at(12),
            codestream_offset: u32_at(20),
            codestream_length: u64_at(24),
            decimation: u16_at(32),
            output_width: u32_at(36),
            output_height: u32_at(40),
            tile_width: u32_at(44),
            tile_height: u32_at(48),
            tiles_wide: u32_at(52),
            tiles_high: u32_at(56),
            bands: u16_at(60),
            scalar: ScalarType::from_code(u16_at(62)),
        })
    }
}

/// Read and decode a header from the start of `reader`.
pub fn read_header<R: Read>(reader: &mut R) -> Result<ContainerHeader, ContainerError> {
    let mut buf = [0u8; HEADER_BYTES];
    let mut filled = 0;
    while filled < HEADER_BYTES {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(ContainerError::Truncated(filled));
        }
        filled += n;
    }
    ContainerHeader::decode(&buf)
}

fn narrow(field: &'static str, value: u32) -> Result<u16, ContainerError> {
    u16::try_from(value).map_err(|_| ContainerError::FieldOverflow { field, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn header() -> ContainerHeader {
        let geometry = TileGeometry::new(Rect::from_size(1025, 600), (256, 256), 2).unwrap();
        ContainerHeader::for_geometry(&geometry, ScalarType::U16, 3).unwrap()
    }

    #[test]
    fn test_geometry_fields() {
        let h = header();
        assert_eq!((h.output_width, h.output_height), (513, 300));
        assert_eq!((h.tiles_wide, h.tiles_high), (3, 2));
        assert_eq!(h.decimation, 2);
        assert_eq!(h.codestream_offset, 64);
    }

    #[test]
    fn test_decode_encoded_header() {
        let mut h = header();
        h.file_length = 123_456_789_012;
        h.codestream_length = 77;
        assert_eq!(ContainerHeader::decode(&h.encode()).unwrap(), h);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = header().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(ContainerError::BadMagic)
        ));
    }

    #[test]
    fn test_short_input() {
        let bytes = header().encode();
        assert!(matches!(
            read_header(&mut &bytes[..40]),
            Err(ContainerError::Truncated(40))
        ));
    }

    #[test]
    fn test_too_many_bands() {
        let geometry = TileGeometry::new(Rect::from_size(8, 8), (8, 8), 1).unwrap();
        assert!(matches!(
            ContainerHeader::for_geometry(&geometry, ScalarType::U8, 70_000),
            Err(ContainerError::FieldOverflow { field: "bands", .. })
        ));
    }
}
