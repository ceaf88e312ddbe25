//! Default configuration values.

pub const DEFAULT_TILE_SIZE: u32 = 1024;
pub const DEFAULT_DECIMATION: u32 = crate::sequencer::DEFAULT_DECIMATION;
pub const DEFAULT_SOURCE_LEVEL: u32 = 0;

pub const DEFAULT_MAX_TILE_PARTS: u8 = crate::sequencer::DEFAULT_MAX_TILE_PARTS;
pub const DEFAULT_TILE_INDEX_BYTES: u8 = crate::sequencer::DEFAULT_TILE_INDEX_BYTES;
pub const DEFAULT_LENGTH_BYTES: u8 = crate::sequencer::DEFAULT_LENGTH_BYTES;
pub const DEFAULT_COMPRESSION_LEVEL: u32 = crate::codestream::DEFAULT_COMPRESSION_LEVEL;
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

pub const DEFAULT_COLLECTOR_ADDRESS: &str = "127.0.0.1:7878";

pub const DEFAULT_LOG_DIRECTORY: &str = "logs";
