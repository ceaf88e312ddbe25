//! Collector driver and container inspection.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, Span};

use super::header::{ContainerHeader, HEADER_BYTES};
use super::ContainerError;
use crate::assembler::{AssemblySummary, StreamAssembler, TileFeed};
use crate::codestream::{
    parse_main_header, parse_tlm_segments, read_tile_parts, MainHeader, TilePart, TlmRecord,
};
use crate::partition::Role;
use crate::sequencer::TileSequencer;
use crate::transport::Transport;

/// Result of a finished overview write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverviewSummary {
    pub header: ContainerHeader,
    pub assembly: AssemblySummary,
}

/// Writes one overview container on the collector rank.
#[derive(Debug, Clone)]
pub struct OverviewWriter {
    span: Span,
}

impl Default for OverviewWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl OverviewWriter {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("writer", rank = 0),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Write the container to `stream`.
    ///
    /// `sequencer` must be initialised; it supplies the geometry and, when
    /// `transport` is `None`, produces every tile itself. With a transport,
    /// tiles come from the producer ranks.
    pub fn write<W: Write + Seek>(
        &self,
        sequencer: &mut TileSequencer,
        transport: Option<&mut dyn Transport>,
        stream: &mut W,
    ) -> Result<OverviewSummary, ContainerError> {
        let _enter = self.span.enter();
        let assignment = sequencer.assignment();
        if assignment.role() != Role::Collector {
            return Err(ContainerError::NotCollector(assignment.rank()));
        }

        let geometry = *sequencer.geometry()?;
        let layout = sequencer.tlm_layout()?;
        let mut header = ContainerHeader::for_geometry(
            &geometry,
            sequencer.source().output_scalar_type(),
            sequencer.source().number_of_output_bands(),
        )?;

        let start = stream.stream_position()?;
        stream.write_all(&header.encode())?;

        let tiles_wide = geometry.tiles_wide();
        let tiles_high = geometry.tiles_high();
        let progress = |tile: u32| {
            if (tile + 1) % tiles_wide == 0 {
                let row = tile / tiles_wide + 1;
                let percent = f64::from(row) * 100.0 / f64::from(tiles_high);
                info!(row, rows = tiles_high, "{percent:.0}% complete");
            }
        };

        let mut assembler = StreamAssembler::new(layout).with_span(self.span.clone());
        let feed = match transport {
            Some(transport) => TileFeed::Remote(transport),
            None => TileFeed::Local(sequencer),
        };
        let assembly = assembler.run_with_progress(feed, stream, progress)?;

        let end = stream.stream_position()?;
        header.file_length = end - start;
        header.codestream_offset = HEADER_BYTES as u32;
        header.codestream_length = assembly.stream_bytes;

        stream.seek(SeekFrom::Start(start))?;
        stream.write_all(&header.encode())?;
        stream.seek(SeekFrom::Start(end))?;
        stream.flush()?;

        info!(
            bytes = header.file_length,
            width = header.output_width,
            height = header.output_height,
            tiles = assembly.tiles,
            "overview written"
        );
        Ok(OverviewSummary { header, assembly })
    }
}

/// Everything `inspect` learns from a container file.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub header: ContainerHeader,
    pub main_header: MainHeader,
    pub tlm_records: Vec<TlmRecord>,
    pub tile_parts: Vec<TilePart>,
}

impl Inspection {
    /// Do the TLM lengths agree with the tile-parts actually present?
    ///
    /// Zero-length records stand for tiles the compressor dropped and have
    /// no tile-part in the codestream.
    pub fn tlm_matches_tile_parts(&self) -> bool {
        let present: Vec<&TlmRecord> =
            self.tlm_records.iter().filter(|r| r.length > 0).collect();
        present.len() == self.tile_parts.len()
            && present
                .iter()
                .zip(&self.tile_parts)
                .all(|(r, p)| r.tile == p.tile && r.length == p.length)
    }

    /// Tiles whose every TLM record has zero length.
    pub fn dropped_tiles(&self) -> Vec<u32> {
        let mut tiles: Vec<u32> = self
            .tlm_records
            .iter()
            .filter(|r| r.length == 0)
            .map(|r| r.tile)
            .collect();
        tiles.dedup();
        tiles
    }
}

/// Read a container file and walk its codestream.
pub fn inspect(path: &Path) -> Result<Inspection, ContainerError> {
    let bytes = fs::read(path)?;
    let header = ContainerHeader::decode(&bytes)?;
    if header.file_length != bytes.len() as u64 {
        return Err(ContainerError::Corrupt(format!(
            "header records {} bytes, file has {}",
            header.file_length,
            bytes.len()
        )));
    }

    let start = header.codestream_offset as usize;
    let end = start as u64 + header.codestream_length;
    if end > bytes.len() as u64 || start > bytes.len() {
        return Err(ContainerError::Corrupt(format!(
            "codestream {}..{} outside file",
            start, end
        )));
    }
    let codestream = &bytes[start..end as usize];

    let main_header = parse_main_header(codestream)?;
    let tlm_records = parse_tlm_segments(codestream)?;
    let tile_parts = read_tile_parts(codestream, main_header.header_end)?;

    Ok(Inspection {
        header,
        main_header,
        tlm_records,
        tile_parts,
    })
}
