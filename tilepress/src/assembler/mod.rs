//! Collector-side stream assembly.
//!
//! The assembler takes tile codestreams in tile-index order, writes them
//! back to back and records each tile's length in a [`TlmBuilder`]. Tile 0
//! carries the main header and a zero-filled TLM placeholder; the
//! assembler remembers where the placeholder landed and overwrites it with
//! the real table once the last tile is in.
//!
//! ```text
//!  tile 0 bytes:  [main header | TLM placeholder | tile-part 0 | fillers]
//!                  ^            ^
//!                  0            idx (found by marker walk)
//!
//!  recorded length(0) = len - idx - tlm_bytes - 14·(mtp-1)
//!  recorded length(t) = len - 14·(mtp-1)
//! ```
//!
//! # Tile feeds
//!
//! - [`TileFeed::Local`] - a standalone run; the sequencer produces each
//!   tile in place
//! - [`TileFeed::Remote`] - tiles arrive over a [`Transport`]; the rank
//!   owning tile `t` is probed for it

use std::io::{self, Seek, SeekFrom, Write};

use thiserror::Error;
use tracing::{debug, info, trace, warn, Span};

use crate::codestream::{locate_tlm, BLANK_TILE_PART_BYTES};
use crate::partition::owner_of;
use crate::sequencer::{NextTile, SequencerError, TileSequencer};
use crate::tlm::{TlmBuilder, TlmError, TlmLayout};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum AssemblerError {
    /// Tile 0 had no TLM marker in its main header.
    #[error("Tile 0 has no TLM placeholder")]
    PlaceholderMissing,

    #[error("Tile {tile} is {length} bytes, shorter than its {overhead} bytes of overhead")]
    ShortTile { tile: u32, length: u64, overhead: u64 },

    #[error("Expected tile {expected}, got tile {actual}")]
    OutOfOrder { expected: u32, actual: u32 },

    #[error("Sequence ended after {produced} of {expected} tiles")]
    Truncated { produced: u32, expected: u32 },

    #[error("Local feed needs a standalone sequencer, got rank {rank} of {total}")]
    NotStandalone { rank: u32, total: u32 },

    #[error("All {0} tiles already assembled")]
    Complete(u32),

    #[error(transparent)]
    Tlm(#[from] TlmError),

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Output stream error: {0}")]
    Io(#[from] io::Error),
}

/// Where the collector gets its tiles from.
pub enum TileFeed<'a> {
    Local(&'a mut TileSequencer),
    Remote(&'a mut dyn Transport),
}

/// Totals for a finished assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblySummary {
    pub tiles: u32,
    /// Bytes written for all tiles, header and placeholder included.
    pub stream_bytes: u64,
    /// Sum of the lengths recorded in the TLM.
    pub recorded_bytes: u64,
    /// Absolute stream offset of the TLM region.
    pub tlm_offset: u64,
    pub tlm_bytes: usize,
}

/// Writes tiles in order and back-patches the TLM.
pub struct StreamAssembler {
    tlm: TlmBuilder,
    num_tiles: u32,
    next_tile: u32,
    tlm_offset: Option<u64>,
    stream_bytes: u64,
    span: Span,
}

impl StreamAssembler {
    pub fn new(layout: TlmLayout) -> Self {
        Self {
            tlm: TlmBuilder::from_layout(layout),
            num_tiles: layout.num_tiles(),
            next_tile: 0,
            tlm_offset: None,
            stream_bytes: 0,
            span: tracing::info_span!("assembler", rank = 0),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn num_tiles(&self) -> u32 {
        self.num_tiles
    }

    /// Next tile index the assembler expects.
    pub fn next_tile(&self) -> u32 {
        self.next_tile
    }

    pub fn is_complete(&self) -> bool {
        self.next_tile >= self.num_tiles
    }

    pub fn tlm(&self) -> &TlmBuilder {
        &self.tlm
    }

    /// Write one tile and record its length.
    pub fn absorb_tile<W: Write + Seek>(
        &mut self,
        stream: &mut W,
        tile: u32,
        bytes: &[u8],
    ) -> Result<(), AssemblerError> {
        if self.is_complete() {
            return Err(AssemblerError::Complete(self.num_tiles));
        }
        if tile != self.next_tile {
            return Err(AssemblerError::OutOfOrder {
                expected: self.next_tile,
                actual: tile,
            });
        }

        let layout = *self.tlm.layout();
        if tile > 0 && bytes.is_empty() {
            // The compressor failed before writing anything: no tile-parts
            // exist, so every part is recorded with zero length.
            warn!(tile, "tile arrived empty, recording zero-length tile-parts");
            for _ in 0..layout.max_tile_parts() {
                self.tlm.add_tpart_length(tile, 0)?;
            }
            self.next_tile += 1;
            return Ok(());
        }

        let mut overhead = 0u64;
        let mut placeholder = None;
        if tile == 0 {
            let idx = locate_tlm(bytes).ok_or(AssemblerError::PlaceholderMissing)?;
            overhead += (idx + layout.tlm_bytes()) as u64;
            placeholder = Some(idx as u64);
        }
        let fillers = u64::from(layout.max_tile_parts()) - 1;
        overhead += BLANK_TILE_PART_BYTES as u64 * fillers;

        let length = (bytes.len() as u64)
            .checked_sub(overhead)
            .ok_or(AssemblerError::ShortTile {
                tile,
                length: bytes.len() as u64,
                overhead,
            })?;

        let position = stream.stream_position()?;
        stream.write_all(bytes)?;
        if let Some(idx) = placeholder {
            self.tlm_offset = Some(position + idx);
            debug!(offset = position + idx, "TLM placeholder located");
        }

        self.tlm.add_tpart_length(tile, length)?;
        for _ in 0..fillers {
            self.tlm
                .add_tpart_length(tile, BLANK_TILE_PART_BYTES as u64)?;
        }

        trace!(tile, bytes = bytes.len(), recorded = length, "tile absorbed");
        self.stream_bytes += bytes.len() as u64;
        self.next_tile += 1;
        Ok(())
    }

    /// Render the TLM over the placeholder and leave the stream at its end.
    pub fn finalize<W: Write + Seek>(
        &mut self,
        stream: &mut W,
    ) -> Result<AssemblySummary, AssemblerError> {
        if !self.is_complete() {
            return Err(AssemblerError::Truncated {
                produced: self.next_tile,
                expected: self.num_tiles,
            });
        }
        let offset = self.tlm_offset.ok_or(AssemblerError::PlaceholderMissing)?;

        let mut table = Vec::with_capacity(self.tlm.tlm_bytes());
        self.tlm.write_tlms(&mut table)?;

        let end = stream.stream_position()?;
        stream.seek(SeekFrom::Start(offset))?;
        stream.write_all(&table)?;
        stream.seek(SeekFrom::Start(end))?;

        let summary = AssemblySummary {
            tiles: self.num_tiles,
            stream_bytes: self.stream_bytes,
            recorded_bytes: self.tlm.total_length(),
            tlm_offset: offset,
            tlm_bytes: table.len(),
        };
        debug!(
            offset,
            tlm_bytes = summary.tlm_bytes,
            recorded = summary.recorded_bytes,
            "TLM written"
        );
        Ok(summary)
    }

    /// Assemble every tile from `feed` into `stream`.
    pub fn run<W: Write + Seek>(
        &mut self,
        feed: TileFeed<'_>,
        stream: &mut W,
    ) -> Result<AssemblySummary, AssemblerError> {
        self.run_with_progress(feed, stream, |_| {})
    }

    /// Same as [`run`](Self::run), calling `progress` with each tile index
    /// once the tile is written.
    pub fn run_with_progress<W, F>(
        &mut self,
        feed: TileFeed<'_>,
        stream: &mut W,
        mut progress: F,
    ) -> Result<AssemblySummary, AssemblerError>
    where
        W: Write + Seek,
        F: FnMut(u32),
    {
        let span = self.span.clone();
        let _enter = span.enter();
        info!(tiles = self.num_tiles, "assembly started");

        match feed {
            TileFeed::Local(sequencer) => {
                let assignment = sequencer.assignment();
                if !assignment.is_standalone() {
                    return Err(AssemblerError::NotStandalone {
                        rank: assignment.rank(),
                        total: assignment.total(),
                    });
                }
                sequencer.set_to_start_of_sequence();
                while !self.is_complete() {
                    let mut buf = Vec::new();
                    match sequencer.get_next_tile(&mut buf)? {
                        NextTile::Produced { index, .. } => {
                            self.absorb_tile(stream, index, &buf)?;
                            progress(index);
                        }
                        NextTile::Exhausted => {
                            return Err(AssemblerError::Truncated {
                                produced: self.next_tile,
                                expected: self.num_tiles,
                            });
                        }
                    }
                }
            }
            TileFeed::Remote(transport) => {
                let total = transport.size();
                while !self.is_complete() {
                    let tile = self.next_tile;
                    let source = owner_of(tile, total);
                    let status = transport.probe(source)?;
                    let count = transport.get_count(&status);
                    let bytes = transport.receive(source, count)?;
                    trace!(tile, source, bytes = count, "tile received");
                    self.absorb_tile(stream, tile, &bytes)?;
                    progress(tile);
                }
            }
        }

        let summary = self.finalize(stream)?;
        info!(
            tiles = summary.tiles,
            bytes = summary.stream_bytes,
            "assembly finished"
        );
        Ok(summary)
    }
}
