//! Integration tests for distributed overview builds.
//!
//! Every rank runs on its own thread. Producers compress their round-robin
//! share of the tiles and the collector pulls them back in index order.
//!
//! Run with: `cargo test --test multi_rank`

use std::io::Cursor;
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use tilepress::assembler::AssemblerError;
use tilepress::codestream::{
    inflate_payload, parse_main_header, read_tile_parts, CodestreamCompressor,
};
use tilepress::container::{ContainerError, OverviewWriter, HEADER_BYTES};
use tilepress::geometry::Rect;
use tilepress::partition::RankAssignment;
use tilepress::producer::{Producer, ProducerSummary};
use tilepress::raster::{MemoryImage, ScalarType, TileBuffer};
use tilepress::sequencer::TileSequencer;
use tilepress::transport::{
    LocalHub, ProbeStatus, SendRequest, TcpTransport, Transport, TransportError,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// 96×96 source; with 16×16 output tiles at decimation 2 this is a 3×3 grid
/// where every input block holds `10 + tile index`.
fn labelled_source() -> MemoryImage {
    let mut raster = TileBuffer::with_defaults(Rect::from_size(96, 96), ScalarType::U8, 1);
    for y in 0..96 {
        for x in 0..96 {
            raster.set_sample(0, x, y, f64::from(10 + (y / 32) * 3 + x / 32));
        }
    }
    raster.validate();
    MemoryImage::new(raster)
}

fn sequencer(rank: u32, total: u32) -> TileSequencer {
    let mut seq = TileSequencer::new(
        Box::new(labelled_source()),
        Box::new(CodestreamCompressor::new()),
    )
    .with_tile_size(16, 16)
    .with_assignment(RankAssignment::new(rank, total).unwrap());
    seq.initialize().unwrap();
    seq
}

fn standalone_bytes() -> Vec<u8> {
    let mut seq = sequencer(0, 1);
    let mut stream = Cursor::new(Vec::new());
    OverviewWriter::new().write(&mut seq, None, &mut stream).unwrap();
    stream.into_inner()
}

/// Records which rank the collector probes, in order.
struct Recording<T> {
    inner: T,
    probes: Vec<u32>,
}

impl<T: Transport> Transport for Recording<T> {
    fn rank(&self) -> u32 {
        self.inner.rank()
    }

    fn size(&self) -> u32 {
        self.inner.size()
    }

    fn probe(&mut self, source: u32) -> Result<ProbeStatus, TransportError> {
        self.probes.push(source);
        self.inner.probe(source)
    }

    fn receive(&mut self, source: u32, count: usize) -> Result<Vec<u8>, TransportError> {
        self.inner.receive(source, count)
    }

    fn isend(&mut self, buf: Vec<u8>, dest: u32) -> Result<SendRequest, TransportError> {
        self.inner.isend(buf, dest)
    }

    fn wait(&mut self, request: SendRequest) -> Result<(), TransportError> {
        self.inner.wait(request)
    }
}

/// Spawn one producer thread per endpoint.
fn spawn_producers<T>(endpoints: Vec<T>, total: u32) -> Vec<thread::JoinHandle<ProducerSummary>>
where
    T: Transport + 'static,
{
    endpoints
        .into_iter()
        .map(|transport| {
            thread::spawn(move || {
                let rank = transport.rank();
                let mut producer = Producer::new(sequencer(rank, total), transport).unwrap();
                producer.run().unwrap()
            })
        })
        .collect()
}

// ============================================================================
// Three producers, one collector, nine tiles
// ============================================================================

#[test]
fn test_collector_probes_owner_of_each_tile_in_order() {
    let mut endpoints = LocalHub::new(4);
    let collector = endpoints.remove(0);
    let producers = spawn_producers(endpoints, 4);

    let mut recording = Recording {
        inner: collector,
        probes: Vec::new(),
    };
    let mut seq = sequencer(0, 4);
    let mut stream = Cursor::new(Vec::new());
    let summary = OverviewWriter::new()
        .write(&mut seq, Some(&mut recording), &mut stream)
        .unwrap();

    let sent: Vec<u32> = producers
        .into_iter()
        .map(|h| h.join().unwrap().tiles)
        .collect();
    assert_eq!(sent, vec![3, 3, 3]);
    assert_eq!(summary.assembly.tiles, 9);
    assert_eq!(recording.probes, vec![1, 2, 3, 1, 2, 3, 1, 2, 3]);

    // Tile t carries label 10 + t, so payload order proves arrival order.
    let bytes = stream.into_inner();
    let codestream = &bytes[HEADER_BYTES..];
    let main = parse_main_header(codestream).unwrap();
    let parts = read_tile_parts(codestream, main.header_end).unwrap();
    for (t, part) in parts.iter().enumerate() {
        assert_eq!(part.tile as usize, t);
        let samples = inflate_payload(part.payload(codestream)).unwrap();
        assert!(samples.iter().all(|&s| usize::from(s) == 10 + t));
    }
}

#[test]
fn test_distributed_output_matches_standalone() {
    let expected = standalone_bytes();

    for total in [2u32, 3, 5, 10, 12] {
        let mut endpoints = LocalHub::new(total);
        let mut collector = endpoints.remove(0);
        let producers = spawn_producers(endpoints, total);

        let mut seq = sequencer(0, total);
        let mut stream = Cursor::new(Vec::new());
        OverviewWriter::new()
            .write(&mut seq, Some(&mut collector), &mut stream)
            .unwrap();
        for handle in producers {
            handle.join().unwrap();
        }

        assert_eq!(stream.into_inner(), expected, "{} ranks", total);
    }
}

#[test]
fn test_lost_producer_fails_the_run() {
    let mut endpoints = LocalHub::new(3);
    let two = endpoints.pop().unwrap();
    let mut collector = endpoints.remove(0);
    let producers = spawn_producers(endpoints, 3);
    drop(two);

    let mut seq = sequencer(0, 3);
    let result = OverviewWriter::new().write(
        &mut seq,
        Some(&mut collector),
        &mut Cursor::new(Vec::new()),
    );
    assert!(matches!(
        result,
        Err(ContainerError::Assembler(AssemblerError::Transport(
            TransportError::Disconnected { peer: 2 }
        )))
    ));

    // Rank 1 loses its collector once the run is abandoned.
    drop(collector);
    for handle in producers {
        assert!(handle.join().is_err());
    }
}

// ============================================================================
// TCP transport
// ============================================================================

#[test]
fn test_tcp_run_matches_standalone() {
    let expected = standalone_bytes();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let total = 4;

    let producers: Vec<_> = (1..total)
        .map(|rank| {
            thread::spawn(move || {
                let transport =
                    TcpTransport::connect(addr, rank, total, None, Duration::from_secs(10))
                        .unwrap();
                let mut producer = Producer::new(sequencer(rank, total), transport).unwrap();
                producer.run().unwrap()
            })
        })
        .collect();

    let mut collector =
        TcpTransport::accept(listener, total, Some(Duration::from_secs(30))).unwrap();
    let mut seq = sequencer(0, total);
    let mut stream = Cursor::new(Vec::new());
    OverviewWriter::new()
        .write(&mut seq, Some(&mut collector), &mut stream)
        .unwrap();

    let tiles: u32 = producers
        .into_iter()
        .map(|h| h.join().unwrap().tiles)
        .sum();
    assert_eq!(tiles, 9);
    assert_eq!(stream.into_inner(), expected);
}
