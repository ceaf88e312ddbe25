//! Tile codestreams: the compressor boundary and a reference codec.
//!
//! The sequencer talks to a [`TileCompressor`] through the
//! `create` / `write_tile` / `finish` contract, once per tile, and never
//! looks at the bytes it produces. The collector only needs to find the TLM
//! placeholder in tile 0 and knows nothing else about the format.
//!
//! # Stream layout
//!
//! ```text
//! tile 0:  SOC SIZ COD [TLM placeholder] SOT SOD payload [filler parts]
//! tile n:                                SOT SOD payload [filler parts]
//! ```
//!
//! Filler tile-parts (`max_tile_parts - 1` of them per tile) are a bare
//! SOT + SOD of [`BLANK_TILE_PART_BYTES`] each.
//!
//! # Available compressors
//!
//! - [`CodestreamCompressor`] - DEFLATE-coded band-sequential samples
//!
//! # Inspection
//!
//! [`locate_tlm`], [`parse_main_header`], [`parse_tlm_segments`] and
//! [`read_tile_parts`] walk a finished codestream marker by marker.

mod compressor;
mod deflate;
mod error;
pub mod markers;
mod parse;

pub use compressor::{CompressParams, TileCompressor};
pub use deflate::{inflate_payload, CodestreamCompressor, DEFAULT_COMPRESSION_LEVEL};
pub use error::CompressError;
pub use markers::BLANK_TILE_PART_BYTES;
pub use parse::{
    locate_tlm, parse_main_header, parse_tlm_segments, read_tile_parts, MainHeader, TilePart,
    TlmRecord,
};
