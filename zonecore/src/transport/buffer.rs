//! Per-connection datagram buffering: an outbound FIFO and the big-packet
//! reassembly buffer. Adapted from the read/write accounting style of
//! `neutronium::net::buffer::Buffer`, which tracks free capacity and
//! advances head/tail offsets on a byte stream; here the unit is a whole
//! datagram (outbound) or a fragment offset (reassembly) rather than a
//! byte range, since UDP framing is packet- not stream-oriented.

use crate::transport::limiter::Priority;
use crate::transport::wire::{ErrorType, NetworkError, NetworkResult, MAX_BIG_PACKET};
use std::collections::VecDeque;

/// A simple outbound datagram FIFO, tagged per-entry with the priority its
/// limiter admission check should use. `mio`-driven senders drain it with
/// `pop` whenever the socket is writable.
#[derive(Default)]
pub struct OutboundQueue {
    queue: VecDeque<(Vec<u8>, Priority)>,
}

impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        OutboundQueue { queue: VecDeque::new() }
    }

    pub fn push(&mut self, datagram: Vec<u8>, priority: Priority) {
        self.queue.push_back((datagram, priority));
    }

    pub fn pop(&mut self) -> Option<(Vec<u8>, Priority)> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Assembles big-packet fragments (spec.md §4.3 "Big packets") assuming
/// fragments arrive in ascending, contiguous offset order, which is how the
/// sender emits them; a fragment that doesn't land at the expected offset
/// is treated as a protocol error rather than buffered out of order.
pub struct ReassemblyBuffer {
    total_len: u32,
    data: Vec<u8>,
    written: usize,
}

impl ReassemblyBuffer {
    pub fn new(total_len: u32) -> NetworkResult<ReassemblyBuffer> {
        if total_len > MAX_BIG_PACKET {
            return Err(NetworkError::Fatal(ErrorType::OversizedPacket));
        }
        Ok(ReassemblyBuffer {
            total_len,
            data: vec![0u8; total_len as usize],
            written: 0,
        })
    }

    /// Feeds one fragment. Returns `Some(payload)` once every byte has
    /// arrived, `None` if more fragments are still expected.
    pub fn feed(&mut self, offset: u32, payload: &[u8]) -> NetworkResult<Option<&[u8]>> {
        if offset as usize != self.written {
            return Err(NetworkError::Fatal(ErrorType::SequenceMismatch));
        }
        let end = self.written + payload.len();
        if end > self.data.len() {
            return Err(NetworkError::Fatal(ErrorType::OversizedPacket));
        }
        self.data[self.written..end].copy_from_slice(payload);
        self.written = end;

        if self.written == self.total_len as usize {
            Ok(Some(&self.data[..]))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_queue_is_fifo() {
        let mut q = OutboundQueue::new();
        q.push(vec![1], Priority::UnrelNormal);
        q.push(vec![2], Priority::Reliable);
        assert_eq!(q.pop(), Some((vec![1], Priority::UnrelNormal)));
        assert_eq!(q.pop(), Some((vec![2], Priority::Reliable)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn reassembly_completes_after_all_fragments() {
        let mut buf = ReassemblyBuffer::new(5).unwrap();
        assert_eq!(buf.feed(0, b"ab").unwrap(), None);
        assert_eq!(buf.feed(2, b"cde").unwrap(), Some(&b"abcde"[..]));
    }

    #[test]
    fn out_of_order_fragment_is_sequence_mismatch() {
        let mut buf = ReassemblyBuffer::new(5).unwrap();
        assert_eq!(buf.feed(2, b"cde").unwrap_err(), NetworkError::Fatal(ErrorType::SequenceMismatch));
    }

    #[test]
    fn oversized_declared_length_rejected_upfront() {
        assert_eq!(
            ReassemblyBuffer::new(MAX_BIG_PACKET + 1).unwrap_err(),
            NetworkError::Fatal(ErrorType::OversizedPacket)
        );
    }
}
