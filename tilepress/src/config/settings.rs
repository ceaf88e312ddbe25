//! Settings structs, one per `[section]` of the config file.

use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use crate::resample::ResampleMethod;
use crate::stats::{HistogramMode, ScanMode};

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub overview: OverviewSettings,
    pub codestream: CodestreamSettings,
    pub transport: TransportSettings,
    pub logging: LoggingSettings,
}

/// `[overview]`
#[derive(Debug, Clone, PartialEq)]
pub struct OverviewSettings {
    /// Output tile edge in pixels
    pub tile_size: u32,
    pub decimation: u32,
    pub resample: ResampleMethod,
    /// Source resolution level to read from
    pub source_level: u32,
    pub histogram: HistogramMode,
    pub scan: ScanMode,
}

impl Default for OverviewSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            decimation: DEFAULT_DECIMATION,
            resample: ResampleMethod::default(),
            source_level: DEFAULT_SOURCE_LEVEL,
            histogram: HistogramMode::default(),
            scan: ScanMode::default(),
        }
    }
}

/// `[codestream]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodestreamSettings {
    pub max_tile_parts: u8,
    /// TLM tile index field: 0, 1 or 2 bytes
    pub tile_index_bytes: u8,
    /// TLM length field: 2 or 4 bytes
    pub length_bytes: u8,
    /// DEFLATE level, 0 to 9
    pub compression_level: u32,
}

impl Default for CodestreamSettings {
    fn default() -> Self {
        Self {
            max_tile_parts: DEFAULT_MAX_TILE_PARTS,
            tile_index_bytes: DEFAULT_TILE_INDEX_BYTES,
            length_bytes: DEFAULT_LENGTH_BYTES,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// `[transport]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub collector_address: String,
    /// Unset means block forever
    pub read_timeout_secs: Option<u64>,
}

impl TransportSettings {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            collector_address: DEFAULT_COLLECTOR_ADDRESS.to_string(),
            read_timeout_secs: None,
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIRECTORY),
        }
    }
}
