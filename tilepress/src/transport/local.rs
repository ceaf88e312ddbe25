//! In-process transport: every rank is a thread sharing one hub.
//!
//! Messages queue per (destination, source) pair. A send completes when the
//! receiver takes the message, which bounds each producer to one tile in
//! flight. Dropping an endpoint closes its rank so peers blocked on it fail
//! with [`TransportError::Disconnected`] instead of hanging.
//!
//! Message ids grow monotonically and each queue is FIFO, so a send is
//! delivered once its queue's last delivered id reaches it. Requests that
//! are never waited on leave nothing behind.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{trace, Span};

use super::{ProbeStatus, RequestState, SendRequest, Transport, TransportError};

struct Envelope {
    id: u64,
    bytes: Vec<u8>,
}

struct HubState {
    /// `queues[dest][source]`
    queues: Vec<Vec<VecDeque<Envelope>>>,
    /// `delivered[dest][source]`: id of the last message taken.
    delivered: Vec<Vec<Option<u64>>>,
    closed: Vec<bool>,
    next_id: u64,
}

struct Hub {
    size: u32,
    state: Mutex<HubState>,
    changed: Condvar,
}

/// Builds connected in-process endpoints.
pub struct LocalHub;

impl LocalHub {
    /// One endpoint per rank, indexed by rank.
    ///
    /// # Example
    ///
    /// ```
    /// use tilepress::transport::{LocalHub, Transport};
    ///
    /// let mut ranks = LocalHub::new(2);
    /// let mut producer = ranks.pop().unwrap();
    /// let mut collector = ranks.pop().unwrap();
    ///
    /// let request = producer.isend(vec![1, 2, 3], 0).unwrap();
    /// let status = collector.probe(1).unwrap();
    /// let count = collector.get_count(&status);
    /// assert_eq!(collector.receive(1, count).unwrap(), vec![1, 2, 3]);
    /// producer.wait(request).unwrap();
    /// ```
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: u32) -> Vec<LocalTransport> {
        let n = size as usize;
        let hub = Arc::new(Hub {
            size,
            state: Mutex::new(HubState {
                queues: (0..n)
                    .map(|_| (0..n).map(|_| VecDeque::new()).collect())
                    .collect(),
                delivered: vec![vec![None; n]; n],
                closed: vec![false; n],
                next_id: 0,
            }),
            changed: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalTransport {
                rank,
                hub: Arc::clone(&hub),
                span: tracing::debug_span!("transport", rank),
            })
            .collect()
    }
}

/// One rank's endpoint on a [`LocalHub`].
pub struct LocalTransport {
    rank: u32,
    hub: Arc<Hub>,
    span: Span,
}

impl LocalTransport {
    /// Emit this endpoint's events inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    fn check_rank(&self, rank: u32) -> Result<(), TransportError> {
        if rank >= self.hub.size || rank == self.rank {
            return Err(TransportError::InvalidRank {
                rank,
                size: self.hub.size,
            });
        }
        Ok(())
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.hub.size
    }

    fn probe(&mut self, source: u32) -> Result<ProbeStatus, TransportError> {
        self.check_rank(source)?;
        let _enter = self.span.enter();
        let (dest, src) = (self.rank as usize, source as usize);

        let mut state = self.hub.state.lock();
        loop {
            if let Some(envelope) = state.queues[dest][src].front() {
                trace!(source, bytes = envelope.bytes.len(), "probe matched");
                return Ok(ProbeStatus::new(source, envelope.bytes.len()));
            }
            if state.closed[src] {
                return Err(TransportError::Disconnected { peer: source });
            }
            self.hub.changed.wait(&mut state);
        }
    }

    fn receive(&mut self, source: u32, count: usize) -> Result<Vec<u8>, TransportError> {
        self.check_rank(source)?;
        let _enter = self.span.enter();
        let (dest, src) = (self.rank as usize, source as usize);

        let mut state = self.hub.state.lock();
        loop {
            let pending = state.queues[dest][src].front().map(|e| e.bytes.len());
            if let Some(actual) = pending {
                if actual != count {
                    return Err(TransportError::CountMismatch {
                        source_rank: source,
                        expected: count,
                        actual,
                    });
                }
                if let Some(envelope) = state.queues[dest][src].pop_front() {
                    state.delivered[dest][src] = Some(envelope.id);
                    self.hub.changed.notify_all();
                    trace!(source, bytes = count, "received");
                    return Ok(envelope.bytes);
                }
            }
            if state.closed[src] {
                return Err(TransportError::Disconnected { peer: source });
            }
            self.hub.changed.wait(&mut state);
        }
    }

    fn isend(&mut self, buf: Vec<u8>, dest: u32) -> Result<SendRequest, TransportError> {
        self.check_rank(dest)?;
        let _enter = self.span.enter();

        let mut state = self.hub.state.lock();
        if state.closed[dest as usize] {
            return Err(TransportError::Disconnected { peer: dest });
        }
        let id = state.next_id;
        state.next_id += 1;
        let bytes = buf.len();
        state.queues[dest as usize][self.rank as usize].push_back(Envelope { id, bytes: buf });
        self.hub.changed.notify_all();
        trace!(dest, bytes, "queued");
        Ok(SendRequest::new(dest, bytes, RequestState::Pending(id)))
    }

    fn wait(&mut self, request: SendRequest) -> Result<(), TransportError> {
        let id = match request.state() {
            RequestState::Complete => return Ok(()),
            RequestState::Pending(id) => *id,
        };
        let dest = request.dest();
        let (d, src) = (dest as usize, self.rank as usize);

        let mut state = self.hub.state.lock();
        loop {
            if state.delivered[d][src].is_some_and(|last| last >= id) {
                return Ok(());
            }
            if state.closed[dest as usize] {
                return Err(TransportError::Disconnected { peer: dest });
            }
            self.hub.changed.wait(&mut state);
        }
    }
}

impl Drop for LocalTransport {
    fn drop(&mut self) {
        let mut state = self.hub.state.lock();
        state.closed[self.rank as usize] = true;
        self.hub.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_messages_from_one_source_are_fifo() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();

        let handle = thread::spawn(move || {
            for i in 0..5u8 {
                let request = producer.isend(vec![i; usize::from(i) + 1], 0).unwrap();
                producer.wait(request).unwrap();
            }
        });

        for i in 0..5u8 {
            let status = collector.probe(1).unwrap();
            assert_eq!(status.source(), 1);
            let count = collector.get_count(&status);
            assert_eq!(count, usize::from(i) + 1);
            assert_eq!(collector.receive(1, count).unwrap(), vec![i; count]);
        }
        handle.join().unwrap();
    }

    #[test]
    fn test_probe_selects_source() {
        let mut ranks = LocalHub::new(3);
        let mut two = ranks.pop().unwrap();
        let mut one = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();

        let _r2 = two.isend(vec![2], 0).unwrap();
        let _r1 = one.isend(vec![1, 1], 0).unwrap();

        assert_eq!(collector.probe(1).unwrap().count(), 2);
        assert_eq!(collector.receive(1, 2).unwrap(), vec![1, 1]);
        assert_eq!(collector.receive(2, 1).unwrap(), vec![2]);
    }

    #[test]
    fn test_count_mismatch() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();
        let _request = producer.isend(vec![0; 4], 0).unwrap();
        assert!(matches!(
            collector.receive(1, 3),
            Err(TransportError::CountMismatch { expected: 3, actual: 4, .. })
        ));
    }

    #[test]
    fn test_dropped_peer_is_reported() {
        let mut ranks = LocalHub::new(2);
        let producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();
        drop(producer);
        assert!(matches!(
            collector.probe(1),
            Err(TransportError::Disconnected { peer: 1 })
        ));
    }

    #[test]
    fn test_pending_message_survives_sender_drop() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();
        let _request = producer.isend(vec![9], 0).unwrap();
        drop(producer);
        assert_eq!(collector.probe(1).unwrap().count(), 1);
        assert_eq!(collector.receive(1, 1).unwrap(), vec![9]);
    }

    #[test]
    fn test_wait_fails_when_receiver_is_gone() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        drop(ranks);
        assert!(matches!(
            producer.isend(vec![1], 0),
            Err(TransportError::Disconnected { peer: 0 })
        ));
    }

    #[test]
    fn test_unwaited_sends_leave_no_state() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();

        let requests: Vec<SendRequest> = (0..50u8)
            .map(|i| producer.isend(vec![i], 0).unwrap())
            .collect();
        for i in 0..50u8 {
            assert_eq!(collector.receive(1, 1).unwrap(), vec![i]);
        }
        {
            let state = producer.hub.state.lock();
            assert_eq!(state.delivered[0][1], Some(49));
            assert!(state.queues[0][1].is_empty());
        }

        // Waiting out of order, or not at all, still completes.
        let mut requests = requests.into_iter();
        let last = requests.next_back().unwrap();
        producer.wait(last).unwrap();
        producer.wait(requests.next().unwrap()).unwrap();
    }

    #[test]
    fn test_wait_blocks_until_received() {
        let mut ranks = LocalHub::new(2);
        let mut producer = ranks.pop().unwrap();
        let mut collector = ranks.pop().unwrap();

        let first = producer.isend(vec![1], 0).unwrap();
        let second = producer.isend(vec![2], 0).unwrap();
        assert_eq!(collector.receive(1, 1).unwrap(), vec![1]);
        producer.wait(first).unwrap();

        drop(collector);
        assert!(matches!(
            producer.wait(second),
            Err(TransportError::Disconnected { peer: 0 })
        ));
    }

    #[test]
    fn test_invalid_ranks() {
        let mut ranks = LocalHub::new(2);
        let mut collector = ranks.remove(0);
        assert!(matches!(
            collector.probe(0),
            Err(TransportError::InvalidRank { rank: 0, size: 2 })
        ));
        assert!(matches!(
            collector.isend(vec![], 7),
            Err(TransportError::InvalidRank { rank: 7, .. })
        ));
    }
}
