//! INI parsing: the one place key names map to struct fields.

use std::path::PathBuf;
use std::str::FromStr;

use ini::{Ini, Properties};

use super::defaults::MAX_COMPRESSION_LEVEL;
use super::file::ConfigFileError;
use super::settings::ConfigFile;

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `key` when present, with `reason` as the error text.
fn parse_key<T: FromStr>(
    props: &Properties,
    section: &str,
    key: &str,
    reason: &str,
) -> Result<Option<T>, ConfigFileError> {
    match props.get(key).map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| invalid(section, key, v, reason)),
    }
}

/// Start from defaults and overlay every value found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [overview]
    if let Some(props) = ini.section(Some("overview")) {
        let s = "overview";
        if let Some(v) = parse_key::<u32>(props, s, "tile_size", "must be a positive integer")? {
            if v == 0 {
                return Err(invalid(s, "tile_size", "0", "must be a positive integer"));
            }
            config.overview.tile_size = v;
        }
        if let Some(v) = parse_key::<u32>(props, s, "decimation", "must be a positive integer")? {
            if v == 0 {
                return Err(invalid(s, "decimation", "0", "must be a positive integer"));
            }
            config.overview.decimation = v;
        }
        if let Some(v) = parse_key(props, s, "resample", "must be 'box' or 'nearest'")? {
            config.overview.resample = v;
        }
        if let Some(v) = parse_key(props, s, "source_level", "must be a non-negative integer")? {
            config.overview.source_level = v;
        }
        if let Some(v) = parse_key(props, s, "histogram", "must be 'none', 'normal' or 'fast'")? {
            config.overview.histogram = v;
        }
        if let Some(v) = parse_key(
            props,
            s,
            "scan",
            "must be 'none', 'min_max' or 'min_max_null'",
        )? {
            config.overview.scan = v;
        }
    }

    // [codestream]
    if let Some(props) = ini.section(Some("codestream")) {
        let s = "codestream";
        if let Some(v) =
            parse_key::<u8>(props, s, "max_tile_parts", "must be an integer from 1 to 255")?
        {
            if v == 0 {
                return Err(invalid(s, "max_tile_parts", "0", "must be an integer from 1 to 255"));
            }
            config.codestream.max_tile_parts = v;
        }
        if let Some(v) = parse_key::<u8>(props, s, "tile_index_bytes", "must be 0, 1 or 2")? {
            if v > 2 {
                return Err(invalid(s, "tile_index_bytes", &v.to_string(), "must be 0, 1 or 2"));
            }
            config.codestream.tile_index_bytes = v;
        }
        if let Some(v) = parse_key::<u8>(props, s, "length_bytes", "must be 2 or 4")? {
            if v != 2 && v != 4 {
                return Err(invalid(s, "length_bytes", &v.to_string(), "must be 2 or 4"));
            }
            config.codestream.length_bytes = v;
        }
        if let Some(v) =
            parse_key::<u32>(props, s, "compression_level", "must be an integer from 0 to 9")?
        {
            if v > MAX_COMPRESSION_LEVEL {
                return Err(invalid(
                    s,
                    "compression_level",
                    &v.to_string(),
                    "must be an integer from 0 to 9",
                ));
            }
            config.codestream.compression_level = v;
        }
    }

    // [transport]
    if let Some(props) = ini.section(Some("transport")) {
        let s = "transport";
        if let Some(v) = props.get("collector_address").map(str::trim) {
            if !v.is_empty() {
                if v.parse::<std::net::SocketAddr>().is_err() {
                    return Err(invalid(s, "collector_address", v, "must be host:port"));
                }
                config.transport.collector_address = v.to_string();
            }
        }
        config.transport.read_timeout_secs =
            parse_key(props, s, "read_timeout_secs", "must be a positive integer (seconds)")?;
    }

    // [logging]
    if let Some(props) = ini.section(Some("logging")) {
        if let Some(v) = props.get("directory").map(str::trim) {
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

/// Expand a leading `~` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::ResampleMethod;
    use crate::stats::{HistogramMode, ScanMode};

    fn parse(text: &str) -> Result<ConfigFile, ConfigFileError> {
        parse_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse("").unwrap(), ConfigFile::default());
    }

    #[test]
    fn test_overview_section() {
        let config = parse(
            "[overview]\ntile_size = 256\ndecimation = 4\nresample = nearest\n\
             histogram = fast\nscan = min_max_null\nsource_level = 2\n",
        )
        .unwrap();
        assert_eq!(config.overview.tile_size, 256);
        assert_eq!(config.overview.decimation, 4);
        assert_eq!(config.overview.resample, ResampleMethod::NearestNeighbor);
        assert_eq!(config.overview.histogram, HistogramMode::Fast);
        assert_eq!(config.overview.scan, ScanMode::MinMaxNull);
        assert_eq!(config.overview.source_level, 2);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = parse("[overview]\ntile_size =\n[transport]\nread_timeout_secs =\n").unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_invalid_values() {
        for text in [
            "[overview]\ntile_size = 0\n",
            "[overview]\ndecimation = two\n",
            "[overview]\nresample = bicubic\n",
            "[codestream]\nlength_bytes = 3\n",
            "[codestream]\ntile_index_bytes = 4\n",
            "[codestream]\ncompression_level = 10\n",
            "[codestream]\nmax_tile_parts = 0\n",
            "[transport]\ncollector_address = nowhere\n",
        ] {
            assert!(
                matches!(parse(text), Err(ConfigFileError::InvalidValue { .. })),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn test_invalid_value_names_the_key() {
        match parse("[codestream]\nlength_bytes = 3\n") {
            Err(ConfigFileError::InvalidValue { section, key, .. }) => {
                assert_eq!(section, "codestream");
                assert_eq!(key, "length_bytes");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_transport_and_logging() {
        let config = parse(
            "[transport]\ncollector_address = 10.0.0.5:9000\nread_timeout_secs = 30\n\
             [logging]\ndirectory = /var/log/tilepress\n",
        )
        .unwrap();
        assert_eq!(config.transport.collector_address, "10.0.0.5:9000");
        assert_eq!(
            config.transport.read_timeout(),
            Some(std::time::Duration::from_secs(30))
        );
        assert_eq!(config.logging.directory, PathBuf::from("/var/log/tilepress"));
    }
}
