//! `tilepress build`: run one rank of an overview build.
//!
//! Every rank is started with the same input, `--size` and settings. Rank 0
//! listens on the collector address and writes the container; ranks
//! `1..size` connect to it and send their share of the tiles. With
//! `--size 1` (the default) a single process does everything.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use clap::Args;
use tilepress::codestream::CodestreamCompressor;
use tilepress::config::ConfigFile;
use tilepress::container::OverviewWriter;
use tilepress::logging::{init_logging, log_file_for_rank};
use tilepress::partition::{RankAssignment, Role};
use tilepress::producer::Producer;
use tilepress::raster::open_image;
use tilepress::sequencer::TileSequencer;
use tilepress::stats::{HistogramMode, ScanMode};
use tilepress::transport::{TcpTransport, DEFAULT_CONNECT_TIMEOUT};
use tracing::{info, warn};

use super::common::{
    load_config, resolve_config, HistogramArg, Overrides, ResampleArg, ScanArg,
};
use crate::error::CliError;

/// Arguments for `tilepress build`.
#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Input image (PNG, TIFF or JPEG)
    pub input: PathBuf,

    /// Output container (required on rank 0)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// This process's rank; 0 is the collector
    #[arg(long, default_value = "0")]
    pub rank: u32,

    /// Total number of ranks in the run
    #[arg(long, default_value = "1")]
    pub size: u32,

    /// Config file (default: ~/.tilepress/config.ini)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output tile edge in pixels
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Source pixels per output pixel along each axis
    #[arg(long)]
    pub decimation: Option<u32>,

    #[arg(long, value_enum)]
    pub resample: Option<ResampleArg>,

    /// Source resolution level to read
    #[arg(long)]
    pub source_level: Option<u32>,

    #[arg(long, value_enum)]
    pub histogram: Option<HistogramArg>,

    #[arg(long, value_enum)]
    pub scan: Option<ScanArg>,

    /// Tile-parts per tile; extra parts are empty fillers
    #[arg(long)]
    pub max_tile_parts: Option<u8>,

    /// TLM tile index field size (0, 1 or 2)
    #[arg(long)]
    pub tile_index_bytes: Option<u8>,

    /// TLM length field size (2 or 4)
    #[arg(long)]
    pub length_bytes: Option<u8>,

    /// DEFLATE level, 0 to 9
    #[arg(long)]
    pub compression_level: Option<u32>,

    /// Address the collector listens on (host:port)
    #[arg(long)]
    pub collector_address: Option<String>,

    /// Seconds to wait for a peer before failing
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Write min/max/null statistics to this file (standalone runs)
    #[arg(long)]
    pub omd: Option<PathBuf>,

    /// Write the histogram to this file (standalone runs)
    #[arg(long)]
    pub his: Option<PathBuf>,

    /// Directory for per-rank log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl BuildArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            tile_size: self.tile_size,
            decimation: self.decimation,
            resample: self.resample,
            source_level: self.source_level,
            histogram: self.histogram,
            scan: self.scan,
            max_tile_parts: self.max_tile_parts,
            tile_index_bytes: self.tile_index_bytes,
            length_bytes: self.length_bytes,
            compression_level: self.compression_level,
            collector_address: self.collector_address.clone(),
            read_timeout_secs: self.read_timeout,
            log_dir: self.log_dir.clone(),
        }
    }
}

/// Run the build command.
pub fn run(args: BuildArgs) -> Result<(), CliError> {
    let config = resolve_config(load_config(args.config.as_ref())?, args.overrides())?;
    let assignment = RankAssignment::new(args.rank, args.size)?;

    let output = match (assignment.role(), &args.output) {
        (Role::Collector, Some(path)) => Some(path.clone()),
        (Role::Collector, None) => {
            return Err(CliError::Config(
                "rank 0 writes the overview and needs --output".to_string(),
            ))
        }
        (Role::Producer, _) => None,
    };

    let _logging_guard = init_logging(&config.logging.directory, &log_file_for_rank(args.rank))
        .map_err(CliError::LoggingInit)?;
    info!(
        input = %args.input.display(),
        rank = assignment.rank(),
        size = assignment.total(),
        role = %assignment.role(),
        "starting overview build"
    );

    let mut sequencer = build_sequencer(&args.input, assignment, &config)?;

    match output {
        Some(path) => run_collector(&mut sequencer, &config, &path, &args),
        None => run_producer(sequencer, &config),
    }
}

/// Open the input and set up an initialised sequencer for this rank.
fn build_sequencer(
    input: &Path,
    assignment: RankAssignment,
    config: &ConfigFile,
) -> Result<TileSequencer, CliError> {
    let image = open_image(input).map_err(|error| CliError::Source {
        path: input.display().to_string(),
        error,
    })?;
    let compressor =
        CodestreamCompressor::new().with_compression_level(config.codestream.compression_level);

    let overview = &config.overview;
    let codestream = &config.codestream;
    let (scan, histogram) = statistics_modes(assignment.role(), config);
    let mut sequencer = TileSequencer::new(Box::new(image), Box::new(compressor))
        .with_assignment(assignment)
        .with_span(tracing::info_span!("sequencer", rank = assignment.rank()))
        .with_tile_size(overview.tile_size, overview.tile_size)
        .with_decimation(overview.decimation)
        .with_source_level(overview.source_level)
        .with_resample_method(overview.resample)
        .with_scan_mode(scan)
        .with_histogram_mode(histogram)
        .with_tile_parts(
            codestream.max_tile_parts,
            codestream.tile_index_bytes,
            codestream.length_bytes,
        );
    sequencer.initialize()?;
    Ok(sequencer)
}

/// Scan and histogram modes for a rank.
///
/// Only rank 0 writes side files, so producers skip both.
fn statistics_modes(role: Role, config: &ConfigFile) -> (ScanMode, HistogramMode) {
    match role {
        Role::Collector => (config.overview.scan, config.overview.histogram),
        Role::Producer => (ScanMode::None, HistogramMode::None),
    }
}

fn run_collector(
    sequencer: &mut TileSequencer,
    config: &ConfigFile,
    output: &Path,
    args: &BuildArgs,
) -> Result<(), CliError> {
    let file_error = |error: std::io::Error| CliError::FileWrite {
        path: output.display().to_string(),
        error,
    };
    let mut stream = BufWriter::new(File::create(output).map_err(file_error)?);

    let writer = OverviewWriter::new();
    let summary = if sequencer.assignment().is_standalone() {
        writer.write(sequencer, None, &mut stream)?
    } else {
        let mut transport = TcpTransport::listen(
            config.transport.collector_address.as_str(),
            args.size,
            config.transport.read_timeout(),
        )?;
        writer.write(sequencer, Some(&mut transport), &mut stream)?
    };
    stream.into_inner().map_err(|e| file_error(e.into_error()))?;

    if !sequencer.assignment().is_standalone() && (args.omd.is_some() || args.his.is_some()) {
        warn!("rank 0 produces no tiles in a distributed run, side files hold source values");
    }
    if let Some(path) = &args.omd {
        sequencer.write_omd_file(path)?;
        info!(path = %path.display(), "wrote statistics");
    }
    if let Some(path) = &args.his {
        sequencer.write_histogram(path)?;
        info!(path = %path.display(), "wrote histogram");
    }

    println!(
        "Wrote {} ({}x{}, {} tiles, {} bytes)",
        output.display(),
        summary.header.output_width,
        summary.header.output_height,
        summary.assembly.tiles,
        summary.header.file_length
    );
    Ok(())
}

fn run_producer(sequencer: TileSequencer, config: &ConfigFile) -> Result<(), CliError> {
    let assignment = sequencer.assignment();
    let transport = TcpTransport::connect(
        config.transport.collector_address.as_str(),
        assignment.rank(),
        assignment.total(),
        config.transport.read_timeout(),
        DEFAULT_CONNECT_TIMEOUT,
    )?;

    let mut producer = Producer::new(sequencer, transport)?;
    let summary = producer.run()?;
    println!(
        "Rank {} sent {} tiles ({} bytes)",
        assignment.rank(),
        summary.tiles,
        summary.bytes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        build: BuildArgs,
    }

    fn parse(args: &[&str]) -> BuildArgs {
        Harness::parse_from(std::iter::once("build").chain(args.iter().copied())).build
    }

    #[test]
    fn test_defaults_to_single_process() {
        let args = parse(&["in.png", "-o", "out.tpo"]);
        assert_eq!((args.rank, args.size), (0, 1));
        assert_eq!(args.output, Some(PathBuf::from("out.tpo")));
        assert!(args.overrides().tile_size.is_none());
    }

    #[test]
    fn test_flags_become_overrides() {
        let args = parse(&[
            "in.png",
            "--rank",
            "2",
            "--size",
            "4",
            "--tile-size",
            "512",
            "--scan",
            "min-max-null",
            "--read-timeout",
            "60",
        ]);
        let overrides = args.overrides();
        assert_eq!(overrides.tile_size, Some(512));
        assert_eq!(overrides.scan, Some(ScanArg::MinMaxNull));
        assert_eq!(overrides.read_timeout_secs, Some(60));
    }

    #[test]
    fn test_producers_skip_statistics() {
        let mut config = ConfigFile::default();
        config.overview.scan = ScanMode::MinMaxNull;
        config.overview.histogram = HistogramMode::Fast;

        assert_eq!(
            statistics_modes(Role::Collector, &config),
            (ScanMode::MinMaxNull, HistogramMode::Fast)
        );
        assert_eq!(
            statistics_modes(Role::Producer, &config),
            (ScanMode::None, HistogramMode::None)
        );
    }

    #[test]
    fn test_producer_sequencer_collects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        image::GrayImage::from_pixel(64, 64, image::Luma([9u8]))
            .save(&input)
            .unwrap();
        let mut config = ConfigFile::default();
        config.overview.tile_size = 16;
        config.overview.scan = ScanMode::MinMax;
        config.overview.histogram = HistogramMode::Normal;

        let producer = build_sequencer(&input, RankAssignment::new(1, 3).unwrap(), &config).unwrap();
        assert_eq!(producer.scan_mode(), ScanMode::None);
        assert!(producer.histogram().is_none());

        let collector = build_sequencer(&input, RankAssignment::new(0, 3).unwrap(), &config).unwrap();
        assert_eq!(collector.scan_mode(), ScanMode::MinMax);
        assert!(collector.histogram().is_some());
    }

    #[test]
    fn test_collector_requires_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = parse(&["in.png"]);
        args.log_dir = Some(dir.path().to_path_buf());
        assert!(matches!(run(args), Err(CliError::Config(_))));
    }

    #[test]
    fn test_standalone_build_writes_container() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        image::GrayImage::from_pixel(96, 64, image::Luma([40u8]))
            .save(&input)
            .unwrap();
        let output = dir.path().join("out.tpo");

        let image = open_image(&input).unwrap();
        let compressor = CodestreamCompressor::new();
        let mut sequencer = TileSequencer::new(Box::new(image), Box::new(compressor))
            .with_tile_size(16, 16);
        sequencer.initialize().unwrap();

        let args = parse(&["in.png", "-o", "out.tpo"]);
        run_collector(&mut sequencer, &ConfigFile::default(), &output, &args).unwrap();

        let inspection = tilepress::container::inspect(&output).unwrap();
        assert_eq!(inspection.header.output_width, 48);
        assert_eq!(inspection.tile_parts.len(), 3 * 2);
        assert!(inspection.tlm_matches_tile_parts());
    }
}
