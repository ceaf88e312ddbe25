//! Argument types and config resolution shared across CLI commands.

use std::path::PathBuf;

use clap::ValueEnum;
use tilepress::config::{ConfigFile, MAX_COMPRESSION_LEVEL};
use tilepress::resample::ResampleMethod;
use tilepress::stats::{HistogramMode, ScanMode};

use crate::error::CliError;

/// Resampling method selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ResampleArg {
    /// 2x2 null-aware mean (decimation 2 only)
    Box,
    /// Top-left sample of each block
    Nearest,
}

impl From<ResampleArg> for ResampleMethod {
    fn from(arg: ResampleArg) -> Self {
        match arg {
            ResampleArg::Box => ResampleMethod::Box,
            ResampleArg::Nearest => ResampleMethod::NearestNeighbor,
        }
    }
}

/// Histogram collection selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum HistogramArg {
    None,
    /// Every tile
    Normal,
    /// A sample of tiles
    Fast,
}

impl From<HistogramArg> for HistogramMode {
    fn from(arg: HistogramArg) -> Self {
        match arg {
            HistogramArg::None => HistogramMode::None,
            HistogramArg::Normal => HistogramMode::Normal,
            HistogramArg::Fast => HistogramMode::Fast,
        }
    }
}

/// Statistics scan selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ScanArg {
    None,
    /// Min and max, excluding null
    MinMax,
    /// Min and max, smallest value taken as null
    MinMaxNull,
}

impl From<ScanArg> for ScanMode {
    fn from(arg: ScanArg) -> Self {
        match arg {
            ScanArg::None => ScanMode::None,
            ScanArg::MinMax => ScanMode::MinMax,
            ScanArg::MinMaxNull => ScanMode::MinMaxNull,
        }
    }
}

/// Command-line values that override the config file.
///
/// `None` keeps whatever the file (or the default) says.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub tile_size: Option<u32>,
    pub decimation: Option<u32>,
    pub resample: Option<ResampleArg>,
    pub source_level: Option<u32>,
    pub histogram: Option<HistogramArg>,
    pub scan: Option<ScanArg>,
    pub max_tile_parts: Option<u8>,
    pub tile_index_bytes: Option<u8>,
    pub length_bytes: Option<u8>,
    pub compression_level: Option<u32>,
    pub collector_address: Option<String>,
    pub read_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
}

/// Load the config file, `--config` first, then the default path.
pub fn load_config(path: Option<&PathBuf>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::Config(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            ConfigFile::load_from(path)?
        }
        None => ConfigFile::load()?,
    };
    Ok(config)
}

/// Apply CLI overrides on top of `config`. CLI takes precedence.
pub fn resolve_config(mut config: ConfigFile, cli: Overrides) -> Result<ConfigFile, CliError> {
    if let Some(v) = cli.tile_size {
        if v == 0 {
            return Err(CliError::Config("--tile-size must be positive".to_string()));
        }
        config.overview.tile_size = v;
    }
    if let Some(v) = cli.decimation {
        if v == 0 {
            return Err(CliError::Config("--decimation must be positive".to_string()));
        }
        config.overview.decimation = v;
    }
    if let Some(v) = cli.resample {
        config.overview.resample = v.into();
    }
    if let Some(v) = cli.source_level {
        config.overview.source_level = v;
    }
    if let Some(v) = cli.histogram {
        config.overview.histogram = v.into();
    }
    if let Some(v) = cli.scan {
        config.overview.scan = v.into();
    }

    if let Some(v) = cli.max_tile_parts {
        if v == 0 {
            return Err(CliError::Config("--max-tile-parts must be at least 1".to_string()));
        }
        config.codestream.max_tile_parts = v;
    }
    if let Some(v) = cli.tile_index_bytes {
        if v > 2 {
            return Err(CliError::Config("--tile-index-bytes must be 0, 1 or 2".to_string()));
        }
        config.codestream.tile_index_bytes = v;
    }
    if let Some(v) = cli.length_bytes {
        if v != 2 && v != 4 {
            return Err(CliError::Config("--length-bytes must be 2 or 4".to_string()));
        }
        config.codestream.length_bytes = v;
    }
    if let Some(v) = cli.compression_level {
        if v > MAX_COMPRESSION_LEVEL {
            return Err(CliError::Config(format!(
                "--compression-level must be 0 to {}",
                MAX_COMPRESSION_LEVEL
            )));
        }
        config.codestream.compression_level = v;
    }

    if let Some(v) = cli.collector_address {
        config.transport.collector_address = v;
    }
    if cli.read_timeout_secs.is_some() {
        config.transport.read_timeout_secs = cli.read_timeout_secs;
    }
    if let Some(v) = cli.log_dir {
        config.logging.directory = v;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file_values() {
        let mut file = ConfigFile::default();
        file.overview.tile_size = 512;
        file.codestream.compression_level = 3;

        let resolved = resolve_config(
            file,
            Overrides {
                tile_size: Some(256),
                scan: Some(ScanArg::MinMaxNull),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(resolved.overview.tile_size, 256);
        assert_eq!(resolved.overview.scan, ScanMode::MinMaxNull);
        // Untouched by the CLI
        assert_eq!(resolved.codestream.compression_level, 3);
    }

    #[test]
    fn test_no_overrides_keeps_file() {
        let mut file = ConfigFile::default();
        file.transport.read_timeout_secs = Some(90);
        let resolved = resolve_config(file.clone(), Overrides::default()).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn test_rejects_invalid_overrides() {
        let bad = [
            Overrides {
                length_bytes: Some(3),
                ..Default::default()
            },
            Overrides {
                tile_index_bytes: Some(4),
                ..Default::default()
            },
            Overrides {
                max_tile_parts: Some(0),
                ..Default::default()
            },
            Overrides {
                compression_level: Some(10),
                ..Default::default()
            },
        ];
        for overrides in bad {
            assert!(matches!(
                resolve_config(ConfigFile::default(), overrides),
                Err(CliError::Config(_))
            ));
        }
    }

    #[test]
    fn test_value_enums_map_to_library_types() {
        assert_eq!(ResampleMethod::from(ResampleArg::Nearest), ResampleMethod::NearestNeighbor);
        assert_eq!(HistogramMode::from(HistogramArg::Fast), HistogramMode::Fast);
        assert_eq!(ScanMode::from(ScanArg::MinMax), ScanMode::MinMax);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.ini");
        assert!(matches!(
            load_config(Some(&missing)),
            Err(CliError::Config(_))
        ));
    }
}
