//! Producer send loop.
//!
//! A producer walks its owned tiles in increasing order, compresses each one
//! into a fresh buffer and sends it to the collector. The send for tile `n`
//! stays in flight while tile `n + stride` is being produced; it is waited on
//! before the next send starts, so at most one buffer per producer is ever
//! outstanding.

use thiserror::Error;
use tracing::{debug, info, Span};

use crate::partition::{RankAssignment, Role};
use crate::sequencer::{NextTile, SequencerError, TileSequencer};
use crate::transport::{SendRequest, Transport, TransportError};

/// Rank every producer sends to.
pub const COLLECTOR_RANK: u32 = 0;

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Rank {0} is not a producer")]
    NotProducer(u32),

    #[error("Transport is rank {transport} but the sequencer was assigned rank {assigned}")]
    RankMismatch { transport: u32, assigned: u32 },

    #[error(transparent)]
    Sequencer(#[from] SequencerError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What a producer sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerSummary {
    pub tiles: u32,
    pub bytes: u64,
}

/// Runs one producer rank to completion.
pub struct Producer<T: Transport> {
    sequencer: TileSequencer,
    transport: T,
    span: Span,
}

impl<T: Transport> Producer<T> {
    /// The sequencer must already be initialised with a producer assignment.
    pub fn new(sequencer: TileSequencer, transport: T) -> Result<Self, ProducerError> {
        let assignment = sequencer.assignment();
        check_assignment(assignment, transport.rank())?;
        let span = tracing::info_span!("producer", rank = assignment.rank());
        Ok(Self {
            sequencer,
            transport,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn sequencer(&self) -> &TileSequencer {
        &self.sequencer
    }

    /// Give back the sequencer, e.g. to write side files from its statistics.
    pub fn into_sequencer(self) -> TileSequencer {
        self.sequencer
    }

    /// Produce and send every owned tile.
    pub fn run(&mut self) -> Result<ProducerSummary, ProducerError> {
        let _enter = self.span.enter();
        let assignment = self.sequencer.assignment();
        let skip = assignment.stride() - 1;

        self.sequencer.set_to_start_of_sequence();
        debug!(
            start = self.sequencer.current_tile_index(),
            stride = assignment.stride(),
            "producer starting"
        );

        let mut summary = ProducerSummary::default();
        let mut in_flight: Option<SendRequest> = None;
        loop {
            let mut buf = Vec::new();
            let (index, bytes) = match self.sequencer.get_next_tile(&mut buf)? {
                NextTile::Produced { index, bytes } => (index, bytes),
                NextTile::Exhausted => break,
            };

            if let Some(request) = in_flight.take() {
                self.transport.wait(request)?;
            }
            debug!(tile = index, bytes, "sending tile");
            in_flight = Some(self.transport.isend(buf, COLLECTOR_RANK)?);

            summary.tiles += 1;
            summary.bytes += bytes as u64;
            self.sequencer.skip_tiles(skip);
        }
        if let Some(request) = in_flight.take() {
            self.transport.wait(request)?;
        }

        info!(tiles = summary.tiles, bytes = summary.bytes, "producer finished");
        Ok(summary)
    }
}

fn check_assignment(assignment: RankAssignment, transport_rank: u32) -> Result<(), ProducerError> {
    if assignment.role() != Role::Producer {
        return Err(ProducerError::NotProducer(assignment.rank()));
    }
    if assignment.rank() != transport_rank {
        return Err(ProducerError::RankMismatch {
            transport: transport_rank,
            assigned: assignment.rank(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codestream::CodestreamCompressor;
    use crate::raster::{MemoryImage, ScalarType};
    use crate::transport::LocalHub;

    fn sequencer(rank: u32, total: u32) -> TileSequencer {
        let image = MemoryImage::uniform(96, 96, ScalarType::U8, 1, 5.0);
        let mut seq = TileSequencer::new(Box::new(image), Box::new(CodestreamCompressor::new()))
            .with_tile_size(16, 16)
            .with_assignment(RankAssignment::new(rank, total).unwrap());
        seq.initialize().unwrap();
        seq
    }

    #[test]
    fn test_collector_cannot_produce() {
        let mut ranks = LocalHub::new(2);
        let collector = ranks.remove(0);
        assert!(matches!(
            Producer::new(sequencer(0, 2), collector),
            Err(ProducerError::NotProducer(0))
        ));
    }

    #[test]
    fn test_rank_mismatch() {
        let mut ranks = LocalHub::new(3);
        let two = ranks.pop().unwrap();
        assert!(matches!(
            Producer::new(sequencer(1, 3), two),
            Err(ProducerError::RankMismatch {
                transport: 2,
                assigned: 1
            })
        ));
    }

    #[test]
    fn test_producer_sends_owned_tiles_in_order() {
        let mut ranks = LocalHub::new(3);
        let two = ranks.pop().unwrap();
        let one = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();
        drop(one);

        // 96 / 2 = 48 → 3×3 tiles; rank 2 owns 1, 3, 5, 7.
        let handle = std::thread::spawn(move || {
            let mut producer = Producer::new(sequencer(2, 3), two).unwrap();
            producer.run().unwrap()
        });

        let mut received = 0;
        for _ in [1, 3, 5, 7] {
            let status = collector.probe(2).unwrap();
            let count = collector.get_count(&status);
            let bytes = collector.receive(2, count).unwrap();
            assert!(!bytes.is_empty());
            received += 1;
        }
        let summary = handle.join().unwrap();
        assert_eq!(summary.tiles, 4);
        assert_eq!(received, 4);
    }

    #[test]
    fn test_lost_collector_fails_the_producer() {
        let mut ranks = LocalHub::new(2);
        let one = ranks.pop().unwrap();
        drop(ranks);
        let mut producer = Producer::new(sequencer(1, 2), one).unwrap();
        assert!(matches!(
            producer.run(),
            Err(ProducerError::Transport(TransportError::Disconnected { peer: 0 }))
        ));
    }
}
