//! Serialise a `ConfigFile` as a commented INI string.

use super::settings::ConfigFile;

pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let read_timeout = config
        .transport
        .read_timeout_secs
        .map(|s| s.to_string())
        .unwrap_or_default();

    format!(
        r#"[overview]
; Output tile edge in pixels
tile_size = {}
; Source pixels per output pixel along each axis
decimation = {}
; Resampling: box (2x2 mean, decimation 2 only) or nearest
resample = {}
; Source resolution level to read
source_level = {}
; Histogram: none, normal (every tile) or fast (sampled)
histogram = {}
; Statistics scan: none, min_max or min_max_null
scan = {}

[codestream]
; Tile-parts per tile; extra parts are empty fillers
max_tile_parts = {}
; TLM tile index field size: 0, 1 or 2 bytes
tile_index_bytes = {}
; TLM length field size: 2 or 4 bytes
length_bytes = {}
; DEFLATE level, 0 to 9
compression_level = {}

[transport]
; Address the collector listens on and producers connect to
collector_address = {}
; Seconds to wait for a peer before failing; empty blocks forever
read_timeout_secs = {}

[logging]
; One log file per rank is written here
directory = {}
"#,
        config.overview.tile_size,
        config.overview.decimation,
        config.overview.resample,
        config.overview.source_level,
        config.overview.histogram,
        config.overview.scan,
        config.codestream.max_tile_parts,
        config.codestream.tile_index_bytes,
        config.codestream.length_bytes,
        config.codestream.compression_level,
        config.transport.collector_address,
        read_timeout,
        config.logging.directory.display(),
    )
}
