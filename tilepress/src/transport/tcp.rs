//! TCP transport for ranks running as separate processes.
//!
//! Rank 0 listens and accepts one connection per producer; producers only
//! ever talk to rank 0. Each connection opens with a bincode-encoded
//! [`Hello`] frame. Every message is a frame: a big-endian `u32` length
//! followed by the bytes.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, Span};

use super::{ProbeStatus, RequestState, SendRequest, Transport, TransportError};

/// How long a producer keeps retrying to reach the collector.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Largest frame accepted from a peer.
const MAX_FRAME_BYTES: usize = 1 << 30;

/// First frame on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Hello {
    rank: u32,
    size: u32,
}

fn map_io(peer: u32, err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => TransportError::Disconnected { peer },
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout { peer },
        _ => TransportError::Io(err),
    }
}

fn write_frame(stream: &mut TcpStream, peer: u32, bytes: &[u8]) -> Result<(), TransportError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| TransportError::Handshake(format!("frame of {} bytes too large", bytes.len())))?;
    stream
        .write_all(&len.to_be_bytes())
        .and_then(|_| stream.write_all(bytes))
        .and_then(|_| stream.flush())
        .map_err(|e| map_io(peer, e))
}

fn read_frame(stream: &mut TcpStream, peer: u32) -> Result<Vec<u8>, TransportError> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).map_err(|e| map_io(peer, e))?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(TransportError::Handshake(format!(
            "rank {} sent a {} byte frame",
            peer, len
        )));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).map_err(|e| map_io(peer, e))?;
    Ok(buf)
}

/// Star-topology TCP transport.
pub struct TcpTransport {
    rank: u32,
    size: u32,
    /// Indexed by rank; only the collector holds more than one.
    peers: Vec<Option<TcpStream>>,
    /// Frames read by `probe` and not yet received.
    staged: Vec<Option<Vec<u8>>>,
    span: Span,
}

impl TcpTransport {
    /// Bind `addr` and accept every producer of a `size`-rank run.
    pub fn listen<A: ToSocketAddrs>(
        addr: A,
        size: u32,
        read_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        Self::accept(listener, size, read_timeout)
    }

    /// Accept every producer on an already bound listener (rank 0).
    ///
    /// Each producer must introduce itself with a distinct rank in
    /// `1..size` and the same `size`.
    pub fn accept(
        listener: TcpListener,
        size: u32,
        read_timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let n = size as usize;
        let mut peers: Vec<Option<TcpStream>> = (0..n).map(|_| None).collect();
        let span = tracing::debug_span!("transport", rank = 0u32);
        let _enter = span.enter();
        info!(
            address = %listener.local_addr()?,
            producers = size.saturating_sub(1),
            "waiting for producers"
        );

        for _ in 1..size {
            let (mut stream, peer_addr) = listener.accept()?;
            stream.set_nodelay(true)?;
            stream.set_read_timeout(read_timeout)?;

            let hello: Hello = bincode::deserialize(&read_frame(&mut stream, 0)?)?;
            if hello.size != size {
                return Err(TransportError::Handshake(format!(
                    "{} reports {} ranks, expected {}",
                    peer_addr, hello.size, size
                )));
            }
            if hello.rank == 0 || hello.rank >= size {
                return Err(TransportError::InvalidRank {
                    rank: hello.rank,
                    size,
                });
            }
            let slot = &mut peers[hello.rank as usize];
            if slot.is_some() {
                return Err(TransportError::Handshake(format!(
                    "rank {} connected twice",
                    hello.rank
                )));
            }
            debug!(peer = hello.rank, address = %peer_addr, "producer connected");
            *slot = Some(stream);
        }
        drop(_enter);

        Ok(Self {
            rank: 0,
            size,
            peers,
            staged: (0..n).map(|_| None).collect(),
            span,
        })
    }

    /// Connect producer `rank` to the collector at `addr`, retrying until
    /// `connect_timeout` has passed.
    pub fn connect<A: ToSocketAddrs>(
        addr: A,
        rank: u32,
        size: u32,
        read_timeout: Option<Duration>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        if rank == 0 || rank >= size {
            return Err(TransportError::InvalidRank { rank, size });
        }
        let span = tracing::debug_span!("transport", rank);
        let _enter = span.enter();

        let deadline = Instant::now() + connect_timeout;
        let mut stream = loop {
            match TcpStream::connect(&addr) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    trace!(error = %e, "collector not reachable yet");
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => {
                    debug!(error = %e, "giving up on collector");
                    return Err(TransportError::Timeout { peer: 0 });
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(read_timeout)?;

        let hello = bincode::serialize(&Hello { rank, size })?;
        write_frame(&mut stream, 0, &hello)?;
        let collector: Option<SocketAddr> = stream.peer_addr().ok();
        info!(collector = ?collector, "connected to collector");
        drop(_enter);

        let n = size as usize;
        let mut peers: Vec<Option<TcpStream>> = (0..n).map(|_| None).collect();
        peers[0] = Some(stream);
        Ok(Self {
            rank,
            size,
            peers,
            staged: (0..n).map(|_| None).collect(),
            span,
        })
    }

    /// Emit this endpoint's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn peer(&mut self, rank: u32) -> Result<&mut TcpStream, TransportError> {
        let size = self.size;
        self.peers
            .get_mut(rank as usize)
            .and_then(Option::as_mut)
            .ok_or(TransportError::InvalidRank { rank, size })
    }

    fn next_frame(&mut self, source: u32) -> Result<Vec<u8>, TransportError> {
        if let Some(frame) = self.staged.get_mut(source as usize).and_then(Option::take) {
            return Ok(frame);
        }
        let stream = self.peer(source)?;
        read_frame(stream, source)
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn probe(&mut self, source: u32) -> Result<ProbeStatus, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();
        let frame = self.next_frame(source)?;
        let count = frame.len();
        self.staged[source as usize] = Some(frame);
        trace!(source, bytes = count, "probe matched");
        Ok(ProbeStatus::new(source, count))
    }

    fn receive(&mut self, source: u32, count: usize) -> Result<Vec<u8>, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();
        let frame = self.next_frame(source)?;
        if frame.len() != count {
            return Err(TransportError::CountMismatch {
                source_rank: source,
                expected: count,
                actual: frame.len(),
            });
        }
        trace!(source, bytes = count, "received");
        Ok(frame)
    }

    fn isend(&mut self, buf: Vec<u8>, dest: u32) -> Result<SendRequest, TransportError> {
        let span = self.span.clone();
        let _enter = span.enter();
        let bytes = buf.len();
        let stream = self.peer(dest)?;
        write_frame(stream, dest, &buf)?;
        trace!(dest, bytes, "sent");
        Ok(SendRequest::new(dest, bytes, RequestState::Complete))
    }

    fn wait(&mut self, _request: SendRequest) -> Result<(), TransportError> {
        // Frames are fully written by `isend`.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[test]
    fn test_frames_round_trip_between_processes() {
        let (listener, addr) = bound();
        let producer = thread::spawn(move || {
            let mut t = TcpTransport::connect(addr, 1, 2, None, Duration::from_secs(5)).unwrap();
            for i in 0..3u8 {
                let request = t.isend(vec![i; 10 * usize::from(i)], 0).unwrap();
                t.wait(request).unwrap();
            }
        });

        let mut collector = TcpTransport::accept(listener, 2, None).unwrap();
        for i in 0..3u8 {
            let status = collector.probe(1).unwrap();
            let count = collector.get_count(&status);
            assert_eq!(count, 10 * usize::from(i));
            assert_eq!(collector.receive(1, count).unwrap(), vec![i; count]);
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_producer_disconnect_is_reported() {
        let (listener, addr) = bound();
        let producer = thread::spawn(move || {
            TcpTransport::connect(addr, 1, 2, None, Duration::from_secs(5)).unwrap();
        });
        let mut collector = TcpTransport::accept(listener, 2, None).unwrap();
        producer.join().unwrap();
        assert!(matches!(
            collector.probe(1),
            Err(TransportError::Disconnected { peer: 1 })
        ));
    }

    #[test]
    fn test_read_timeout() {
        let (listener, addr) = bound();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let producer = thread::spawn(move || {
            let _t = TcpTransport::connect(addr, 1, 2, None, Duration::from_secs(5)).unwrap();
            done_rx.recv().ok();
        });
        let mut collector =
            TcpTransport::accept(listener, 2, Some(Duration::from_millis(50))).unwrap();
        assert!(matches!(
            collector.probe(1),
            Err(TransportError::Timeout { peer: 1 })
        ));
        done_tx.send(()).unwrap();
        producer.join().unwrap();
    }

    #[test]
    fn test_handshake_rejects_wrong_size() {
        let (listener, addr) = bound();
        let producer = thread::spawn(move || {
            TcpTransport::connect(addr, 1, 3, None, Duration::from_secs(5)).ok();
        });
        let result = TcpTransport::accept(listener, 2, None);
        assert!(matches!(result, Err(TransportError::Handshake(_))));
        producer.join().unwrap();
    }

    #[test]
    fn test_connect_rejects_collector_rank() {
        let result = TcpTransport::connect("127.0.0.1:1", 0, 2, None, Duration::ZERO);
        assert!(matches!(result, Err(TransportError::InvalidRank { .. })));
    }

    #[test]
    fn test_producer_only_talks_to_collector() {
        let (listener, addr) = bound();
        let producer = thread::spawn(move || {
            let mut t = TcpTransport::connect(addr, 1, 3, None, Duration::from_secs(5)).unwrap();
            assert!(matches!(
                t.isend(vec![1], 2),
                Err(TransportError::InvalidRank { rank: 2, .. })
            ));
        });
        // Accept just the one connection by hand.
        let (mut stream, _) = listener.accept().unwrap();
        let hello: Hello = bincode::deserialize(&read_frame(&mut stream, 1).unwrap()).unwrap();
        assert_eq!(hello, Hello { rank: 1, size: 3 });
        producer.join().unwrap();
    }
}
