//! Codestream marker codes and fixed segment sizes.

/// Start of codestream.
pub const SOC: u16 = 0xFF4F;
/// Image and tile size.
pub const SIZ: u16 = 0xFF51;
/// Coding style.
pub const COD: u16 = 0xFF52;
/// Tile-part lengths.
pub const TLM: u16 = 0xFF55;
/// Start of tile-part.
pub const SOT: u16 = 0xFF90;
/// Start of data.
pub const SOD: u16 = 0xFF93;
/// End of codestream. Never written; the container records the length.
pub const EOC: u16 = 0xFFD9;

/// Lsot: Lsot + Isot + Psot + TPsot + TNsot.
pub const SOT_LENGTH: u16 = 10;

/// SOT marker + segment + SOD marker.
pub const TILE_PART_HEADER_BYTES: usize = 2 + SOT_LENGTH as usize + 2;

/// A filler tile-part with no data is only its header.
pub const BLANK_TILE_PART_BYTES: usize = TILE_PART_HEADER_BYTES;

/// Lsiz: Lsiz + five u32 geometry fields + bands, scalar, bit depth, flags.
pub const SIZ_LENGTH: u16 = 2 + 5 * 4 + 2 + 2 + 1 + 1;

/// Lcod: Lcod + level + tile-parts + band order.
pub const COD_LENGTH: u16 = 2 + 3;

/// SIZ flag bit for an alpha band.
pub const SIZ_FLAG_ALPHA: u8 = 0x01;

/// Markers that end the main header.
pub fn ends_main_header(marker: u16) -> bool {
    matches!(marker, SOT | SOD | EOC)
}
