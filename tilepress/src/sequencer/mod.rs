//! Tile sequencer: fetch, resample, scan and compress one tile per call.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──► Ready ──get_next_tile()──► Sequencing
//!       ▲                           ▲                             │
//!       └──── any set_* (dirty) ────┴── set_to_start_of_sequence ─┤
//!                                                                 ▼
//!                                                            Exhausted
//! ```
//!
//! Changing the area of interest, tile size, decimation, source level,
//! histogram mode or tile-part layout marks the sequencer dirty; sequencing
//! then fails with [`SequencerError::NotInitialized`] until
//! [`TileSequencer::initialize`] runs again.
//!
//! # Failure policy
//!
//! A failed source read, a resample configuration error, or a compressor
//! error other than I/O is logged and the tile goes out blank. I/O errors on
//! the output stream are returned.

use std::io::{self, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, trace, warn, Span};

use crate::codestream::{CompressError, CompressParams, TileCompressor};
use crate::geometry::{GeometryError, Rect, TileGeometry};
use crate::partition::RankAssignment;
use crate::raster::{ImageSource, TileBuffer, TileStatus};
use crate::resample::{ResampleMethod, Resampler};
use crate::stats::{
    resolve_omd_values, sampling_interval, write_histogram, write_omd_file, BandStatistics,
    Histogram, HistogramMode, OmdValues, ScanMode, StatsError,
};
use crate::tlm::{TlmError, TlmLayout};

/// Default decimation between source and overview.
pub const DEFAULT_DECIMATION: u32 = 2;

/// Default TLM parameters: one tile-part, 16-bit tile index, 32-bit length.
pub const DEFAULT_MAX_TILE_PARTS: u8 = 1;
pub const DEFAULT_TILE_INDEX_BYTES: u8 = 2;
pub const DEFAULT_LENGTH_BYTES: u8 = 4;

/// Errors surfaced by the sequencer.
#[derive(Debug, Error)]
pub enum SequencerError {
    /// Geometry changed since the last `initialize`.
    #[error("Sequencer not initialized")]
    NotInitialized,

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Tlm(#[from] TlmError),

    #[error(transparent)]
    Stats(#[from] StatsError),

    /// Writing the output stream failed.
    #[error("Output stream error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of [`TileSequencer::get_next_tile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTile {
    /// Tile `index` was written as `bytes` bytes.
    Produced { index: u32, bytes: usize },
    /// Every tile has been produced.
    Exhausted,
}

/// Where the sequencer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Uninitialized,
    Ready,
    Sequencing,
    Exhausted,
}

/// Counts bytes passing through to the wrapped stream.
struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    count: usize,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Log and swallow compressor errors other than I/O.
fn absorb(tile: u32, stage: &str, result: Result<(), CompressError>) -> Result<(), io::Error> {
    match result {
        Ok(()) => Ok(()),
        Err(CompressError::Io(e)) => Err(e),
        Err(CompressError::NotCreated) => {
            debug!(tile, stage, "compressor was not created");
            Ok(())
        }
        Err(e) => {
            warn!(tile, stage, error = %e, "compressor error, tile degraded");
            Ok(())
        }
    }
}

/// Drives one overview build for one rank.
pub struct TileSequencer {
    source: Box<dyn ImageSource>,
    compressor: Box<dyn TileCompressor>,
    assignment: RankAssignment,

    area_of_interest: Option<Rect>,
    tile_size: Option<(u32, u32)>,
    decimation: u32,
    source_level: u32,
    resample_method: ResampleMethod,
    scan_mode: ScanMode,
    histogram_mode: HistogramMode,
    max_tile_parts: u8,
    tile_index_bytes: u8,
    length_bytes: u8,

    geometry: Option<TileGeometry>,
    tlm_layout: Option<TlmLayout>,
    tile: Option<TileBuffer>,
    current: u32,
    dirty: bool,

    statistics: BandStatistics,
    histogram: Option<Histogram>,
    histogram_interval: u32,

    span: Span,
}

impl TileSequencer {
    /// Create a sequencer for a standalone run.
    ///
    /// # Arguments
    ///
    /// * `source` - Image to read input tiles from
    /// * `compressor` - Encodes each output tile
    ///
    /// # Example
    ///
    /// ```
    /// use tilepress::codestream::CodestreamCompressor;
    /// use tilepress::geometry::Rect;
    /// use tilepress::raster::{MemoryImage, ScalarType};
    /// use tilepress::sequencer::{NextTile, TileSequencer};
    ///
    /// let image = MemoryImage::uniform(64, 64, ScalarType::U8, 1, 10.0);
    /// let mut sequencer = TileSequencer::new(Box::new(image), Box::new(CodestreamCompressor::new()))
    ///     .with_tile_size(16, 16);
    /// sequencer.initialize().unwrap();
    ///
    /// let mut stream = Vec::new();
    /// let mut tiles = 0;
    /// while let NextTile::Produced { .. } = sequencer.get_next_tile(&mut stream).unwrap() {
    ///     tiles += 1;
    /// }
    /// assert_eq!(tiles, 4);
    /// ```
    pub fn new(source: Box<dyn ImageSource>, compressor: Box<dyn TileCompressor>) -> Self {
        let assignment = RankAssignment::standalone();
        Self {
            source,
            compressor,
            assignment,
            area_of_interest: None,
            tile_size: None,
            decimation: DEFAULT_DECIMATION,
            source_level: 0,
            resample_method: ResampleMethod::default(),
            scan_mode: ScanMode::default(),
            histogram_mode: HistogramMode::default(),
            max_tile_parts: DEFAULT_MAX_TILE_PARTS,
            tile_index_bytes: DEFAULT_TILE_INDEX_BYTES,
            length_bytes: DEFAULT_LENGTH_BYTES,
            geometry: None,
            tlm_layout: None,
            tile: None,
            current: 0,
            dirty: true,
            statistics: BandStatistics::new(),
            histogram: None,
            histogram_interval: 1,
            span: tracing::info_span!("sequencer", rank = assignment.rank()),
        }
    }

    pub fn with_assignment(mut self, assignment: RankAssignment) -> Self {
        self.assignment = assignment;
        self.span = tracing::info_span!("sequencer", rank = assignment.rank());
        self
    }

    /// Emit this sequencer's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_area_of_interest(mut self, rect: Rect) -> Self {
        self.set_area_of_interest(rect);
        self
    }

    pub fn with_tile_size(mut self, width: u32, height: u32) -> Self {
        self.set_tile_size(width, height);
        self
    }

    pub fn with_decimation(mut self, decimation: u32) -> Self {
        self.set_decimation_factor(decimation);
        self
    }

    pub fn with_source_level(mut self, level: u32) -> Self {
        self.set_source_level(level);
        self
    }

    pub fn with_resample_method(mut self, method: ResampleMethod) -> Self {
        self.set_resample_method(method);
        self
    }

    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.set_scan_mode(mode);
        self
    }

    pub fn with_histogram_mode(mut self, mode: HistogramMode) -> Self {
        self.set_histogram_mode(mode);
        self
    }

    /// Tile-part layout handed to the TLM builder and the compressor.
    pub fn with_tile_parts(mut self, max_tile_parts: u8, tile_index_bytes: u8, length_bytes: u8) -> Self {
        self.set_tile_parts(max_tile_parts, tile_index_bytes, length_bytes);
        self
    }

    pub fn set_area_of_interest(&mut self, rect: Rect) {
        self.area_of_interest = Some(rect);
        self.dirty = true;
    }

    pub fn set_tile_size(&mut self, width: u32, height: u32) {
        self.tile_size = Some((width, height));
        self.dirty = true;
    }

    pub fn set_decimation_factor(&mut self, decimation: u32) {
        self.decimation = decimation;
        self.dirty = true;
    }

    /// Read from reduced resolution `level`; the area of interest becomes
    /// that level's full image.
    pub fn set_source_level(&mut self, level: u32) {
        self.source_level = level;
        self.area_of_interest = Some(self.source.image_rect(level));
        self.dirty = true;
    }

    pub fn set_resample_method(&mut self, method: ResampleMethod) {
        self.resample_method = method;
    }

    pub fn set_scan_mode(&mut self, mode: ScanMode) {
        self.scan_mode = mode;
    }

    pub fn set_scan_for_min_max(&mut self, enabled: bool) {
        self.scan_mode = if enabled { ScanMode::MinMax } else { ScanMode::None };
    }

    pub fn set_scan_for_min_max_null(&mut self, enabled: bool) {
        self.scan_mode = if enabled {
            ScanMode::MinMaxNull
        } else {
            ScanMode::None
        };
    }

    pub fn set_histogram_mode(&mut self, mode: HistogramMode) {
        self.histogram_mode = mode;
        self.dirty = true;
    }

    pub fn set_tile_parts(&mut self, max_tile_parts: u8, tile_index_bytes: u8, length_bytes: u8) {
        self.max_tile_parts = max_tile_parts;
        self.tile_index_bytes = tile_index_bytes;
        self.length_bytes = length_bytes;
        self.dirty = true;
    }

    /// Resolve geometry and allocate the output tile.
    ///
    /// The area of interest and tile size default to the source's image at
    /// the source level and its native tile size. The tile index goes back
    /// to 0.
    pub fn initialize(&mut self) -> Result<(), SequencerError> {
        let _enter = self.span.enter();

        let aoi = self
            .area_of_interest
            .unwrap_or_else(|| self.source.image_rect(self.source_level));
        let tile_size = self.tile_size.unwrap_or_else(|| self.source.tile_size());
        let geometry = TileGeometry::new(aoi, tile_size, self.decimation)?;
        let layout = TlmLayout::new(
            geometry.num_tiles(),
            self.max_tile_parts,
            self.tile_index_bytes,
            self.length_bytes,
        )?;

        let scalar = self.source.output_scalar_type();
        let bands = self.source.number_of_output_bands();
        let nulls = (0..bands).map(|b| self.source.null_pixel_value(b)).collect();
        let mins: Vec<f64> = (0..bands).map(|b| self.source.min_pixel_value(b)).collect();
        let maxs: Vec<f64> = (0..bands).map(|b| self.source.max_pixel_value(b)).collect();

        self.histogram = if self.histogram_mode.is_enabled() {
            let ranges: Vec<(f64, f64)> = mins.iter().copied().zip(maxs.iter().copied()).collect();
            Some(Histogram::new(scalar, &ranges))
        } else {
            None
        };
        let total_pixels =
            u64::from(tile_size.0) * u64::from(tile_size.1) * u64::from(geometry.num_tiles());
        self.histogram_interval = sampling_interval(self.histogram_mode, total_pixels);

        self.tile = Some(TileBuffer::new(
            Rect::from_size(tile_size.0, tile_size.1),
            scalar,
            bands,
            nulls,
            mins,
            maxs,
        ));
        if self.scan_mode != ScanMode::None {
            self.statistics.clear();
        }

        debug!(
            aoi = %aoi,
            tile_width = tile_size.0,
            tile_height = tile_size.1,
            tiles_wide = geometry.tiles_wide(),
            tiles_high = geometry.tiles_high(),
            source_level = self.source_level,
            decimation = self.decimation,
            resample = %self.resample_method,
            scan = %self.scan_mode,
            histogram = %self.histogram_mode,
            histogram_interval = self.histogram_interval,
            "sequencer initialised"
        );

        self.geometry = Some(geometry);
        self.tlm_layout = Some(layout);
        self.current = 0;
        self.dirty = false;
        Ok(())
    }

    /// Move to this rank's first tile. Does not touch geometry.
    pub fn set_to_start_of_sequence(&mut self) {
        self.current = if self.assignment.produces_tiles() {
            self.assignment.start_index()
        } else {
            0
        };
    }

    /// Skip `count` tiles without producing them.
    pub fn skip_tiles(&mut self, count: u32) {
        self.current = self.current.saturating_add(count);
    }

    pub fn current_tile_index(&self) -> u32 {
        self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn state(&self) -> SequencerState {
        match &self.geometry {
            _ if self.dirty => SequencerState::Uninitialized,
            None => SequencerState::Uninitialized,
            Some(g) if self.current >= g.num_tiles() => SequencerState::Exhausted,
            Some(_) if self.current == self.assignment.start_index() => SequencerState::Ready,
            Some(_) => SequencerState::Sequencing,
        }
    }

    pub fn assignment(&self) -> RankAssignment {
        self.assignment
    }

    pub fn geometry(&self) -> Result<&TileGeometry, SequencerError> {
        match &self.geometry {
            Some(g) if !self.dirty => Ok(g),
            _ => Err(SequencerError::NotInitialized),
        }
    }

    pub fn tlm_layout(&self) -> Result<TlmLayout, SequencerError> {
        match self.tlm_layout {
            Some(layout) if !self.dirty => Ok(layout),
            _ => Err(SequencerError::NotInitialized),
        }
    }

    pub fn num_tiles(&self) -> Result<u32, SequencerError> {
        Ok(self.geometry()?.num_tiles())
    }

    pub fn source(&self) -> &dyn ImageSource {
        self.source.as_ref()
    }

    pub fn decimation(&self) -> u32 {
        self.decimation
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.scan_mode
    }

    pub fn histogram_mode(&self) -> HistogramMode {
        self.histogram_mode
    }

    pub fn histogram_interval(&self) -> u32 {
        self.histogram_interval
    }

    pub fn statistics(&self) -> &BandStatistics {
        &self.statistics
    }

    pub fn histogram(&self) -> Option<&Histogram> {
        self.histogram.as_ref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Produce the current tile into `stream` and advance by one.
    ///
    /// Not reentrant: statistics, histogram and the output tile buffer are
    /// shared across calls.
    pub fn get_next_tile(&mut self, stream: &mut dyn Write) -> Result<NextTile, SequencerError> {
        if self.dirty {
            return Err(SequencerError::NotInitialized);
        }
        let (Some(geometry), Some(layout), Some(tile)) =
            (self.geometry.as_ref(), self.tlm_layout, self.tile.as_mut())
        else {
            return Err(SequencerError::NotInitialized);
        };
        let _enter = self.span.enter();

        let index = self.current;
        if index >= geometry.num_tiles() {
            return Ok(NextTile::Exhausted);
        }

        let input_rect = geometry.input_tile_rect(index);
        let output_rect = geometry.output_tile_rect(index);
        tile.set_image_rect(output_rect);
        tile.make_blank();

        match self.source.get_tile(input_rect, self.source_level) {
            Ok(input) => {
                self.statistics.scan(&input, self.scan_mode);
                if let Some(histogram) = self.histogram.as_mut() {
                    if index % self.histogram_interval == 0 {
                        trace!(tile = index, "populating histogram");
                        histogram.populate(&input);
                    }
                }

                if matches!(input.status(), TileStatus::Partial | TileStatus::Full) {
                    let resampler = Resampler::new(self.resample_method, self.decimation);
                    match resampler.resample(&input, tile) {
                        Ok(()) => {
                            tile.validate();
                        }
                        Err(e) => {
                            warn!(tile = index, error = %e, "resample failed, tile left blank");
                            tile.make_blank();
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    tile = index,
                    rect = %input_rect,
                    level = self.source_level,
                    error = %e,
                    "source read failed, tile left blank"
                );
            }
        }

        let params = CompressParams {
            scalar: self.source.output_scalar_type(),
            bands: self.source.number_of_output_bands(),
            image_rect: geometry.output_image_rect(),
            tile_size: geometry.tile_size(),
            num_tiles: geometry.num_tiles(),
            alpha: false,
            fragment: output_rect,
            tile_index: index,
            tlm: layout,
        };

        let mut counter = CountingWriter {
            inner: stream,
            count: 0,
        };
        absorb(index, "create", self.compressor.create(&mut counter, &params))?;
        if tile.status() != TileStatus::Null {
            let written = self.compressor.write_tile(&mut counter, tile).map(|encoded| {
                if !encoded {
                    warn!(tile = index, "compressor declined tile");
                }
            });
            absorb(index, "write", written)?;
        }
        absorb(index, "finish", self.compressor.finish(&mut counter))?;

        let bytes = counter.count;
        trace!(tile = index, bytes, status = ?tile.status(), "tile produced");
        self.current += 1;
        Ok(NextTile::Produced { index, bytes })
    }

    /// Per-band values from the source itself.
    fn source_values(&self) -> OmdValues {
        let bands = self.source.number_of_output_bands();
        OmdValues {
            min_values: (0..bands).map(|b| self.source.min_pixel_value(b)).collect(),
            max_values: (0..bands).map(|b| self.source.max_pixel_value(b)).collect(),
            null_values: (0..bands).map(|b| self.source.null_pixel_value(b)).collect(),
        }
    }

    /// Write the min/max/null side file from the scanned statistics.
    pub fn write_omd_file(&self, path: &Path) -> Result<(), SequencerError> {
        let scalar = self.source.output_scalar_type();
        let values = resolve_omd_values(
            self.scan_mode,
            scalar,
            &self.statistics,
            &self.source_values(),
        );
        write_omd_file(path, scalar, &values)?;
        Ok(())
    }

    /// Write the histogram side file.
    pub fn write_histogram(&self, path: &Path) -> Result<(), SequencerError> {
        let histogram = self
            .histogram
            .as_ref()
            .ok_or_else(|| StatsError::Empty("histogram mode is none".to_string()))?;
        write_histogram(path, histogram)?;
        Ok(())
    }
}
