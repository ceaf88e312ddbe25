//! Message passing between ranks.
//!
//! The collector needs three blocking operations from a transport: probe a
//! specific source rank, read the size of the pending message, and receive
//! it. Producers need a non-blocking send paired with an explicit wait so
//! they never reuse a buffer that is still in flight.
//!
//! ```text
//!  producer r                         collector (rank 0)
//!  ──────────                         ──────────────────
//!  req = isend(tile t, 0)  ───────►   status = probe(owner(t))
//!                                     n = get_count(status)
//!  wait(req)  ◄── delivered ───────   bytes = receive(owner(t), n)
//! ```
//!
//! Ordering comes from the partition: each producer sends its tiles in
//! increasing order and the collector probes the one rank owning the next
//! tile, so no sequence numbers are carried.
//!
//! Every failure is a [`TransportError`] and ends the run.
//!
//! # Implementations
//!
//! - [`LocalHub`] / [`LocalTransport`] - ranks as threads in one process
//! - [`TcpTransport`] - ranks as processes, star topology around rank 0

mod local;
mod tcp;

use thiserror::Error;

pub use local::{LocalHub, LocalTransport};
pub use tcp::{TcpTransport, DEFAULT_CONNECT_TIMEOUT};

/// Transport failures. None of them are retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Rank {rank} is not valid here (size {size})")]
    InvalidRank { rank: u32, size: u32 },

    #[error("Peer rank {peer} disconnected")]
    Disconnected { peer: u32 },

    #[error("Timed out waiting for rank {peer}")]
    Timeout { peer: u32 },

    #[error("Message from rank {source_rank} has {actual} bytes, expected {expected}")]
    CountMismatch {
        source_rank: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Failed to encode handshake: {0}")]
    Encode(#[from] bincode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStatus {
    source: u32,
    count: usize,
}

impl ProbeStatus {
    pub(crate) fn new(source: u32, count: usize) -> Self {
        Self { source, count }
    }

    pub fn source(&self) -> u32 {
        self.source
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[derive(Debug)]
pub(crate) enum RequestState {
    /// The bytes have left the sender.
    Complete,
    /// Waiting for the receiver to take message `id`.
    Pending(u64),
}

/// Handle for an in-flight send, consumed by [`Transport::wait`].
#[derive(Debug)]
#[must_use = "a send request must be waited on"]
pub struct SendRequest {
    dest: u32,
    bytes: usize,
    state: RequestState,
}

impl SendRequest {
    pub(crate) fn new(dest: u32, bytes: usize, state: RequestState) -> Self {
        Self { dest, bytes, state }
    }

    pub fn dest(&self) -> u32 {
        self.dest
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub(crate) fn state(&self) -> &RequestState {
        &self.state
    }
}

/// Rank-addressed message passing.
pub trait Transport: Send {
    fn rank(&self) -> u32;

    /// Number of ranks in the run.
    fn size(&self) -> u32;

    /// Block until a message from `source` is pending.
    fn probe(&mut self, source: u32) -> Result<ProbeStatus, TransportError>;

    /// Size in bytes of the message a probe found.
    fn get_count(&self, status: &ProbeStatus) -> usize {
        status.count()
    }

    /// Receive the pending message from `source`, which must be `count`
    /// bytes long.
    fn receive(&mut self, source: u32, count: usize) -> Result<Vec<u8>, TransportError>;

    /// Start sending `buf` to `dest`.
    fn isend(&mut self, buf: Vec<u8>, dest: u32) -> Result<SendRequest, TransportError>;

    /// Block until `request` has completed.
    fn wait(&mut self, request: SendRequest) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn rank(&self) -> u32 {
        (**self).rank()
    }

    fn size(&self) -> u32 {
        (**self).size()
    }

    fn probe(&mut self, source: u32) -> Result<ProbeStatus, TransportError> {
        (**self).probe(source)
    }

    fn get_count(&self, status: &ProbeStatus) -> usize {
        (**self).get_count(status)
    }

    fn receive(&mut self, source: u32, count: usize) -> Result<Vec<u8>, TransportError> {
        (**self).receive(source, count)
    }

    fn isend(&mut self, buf: Vec<u8>, dest: u32) -> Result<SendRequest, TransportError> {
        (**self).isend(buf, dest)
    }

    fn wait(&mut self, request: SendRequest) -> Result<(), TransportError> {
        (**self).wait(request)
    }
}
