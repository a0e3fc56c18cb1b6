//! Per-direction receive window.
//!
//! Buffers segments for one direction of a connection until the peer
//! acknowledges them, then releases them to the consumer in sequence order
//! with duplicates suppressed and overlapping retransmits trimmed. The
//! buffer is a ring of segments sorted by wrap-aware sequence number;
//! reordering windows are shallow in practice, so inserts use a linear scan
//! from the newest entry.

use std::cmp::Ordering;

use crossbeam_channel::Sender;

use super::seq::seq_compare;
use super::Segment;

/// Initial ring capacity, doubled on overflow.
pub const INITIAL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct ReceiveWindow {
    buffer: Vec<Option<Segment>>,
    start: usize,
    len: usize,
    /// Next sequence number the consumer expects; 0 until first release.
    expect_begin: u32,
    /// Highest ACK observed; 0 until first ACK.
    last_ack: u32,
}

impl Default for ReceiveWindow {
    fn default() -> Self {
        ReceiveWindow::new(INITIAL_CAPACITY)
    }
}

impl ReceiveWindow {
    pub fn new(capacity: usize) -> Self {
        ReceiveWindow {
            buffer: (0..capacity).map(|_| None).collect(),
            start: 0,
            len: 0,
            expect_begin: 0,
            last_ack: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn expect_begin(&self) -> u32 {
        self.expect_begin
    }

    pub fn last_ack(&self) -> u32 {
        self.last_ack
    }

    /// Buffer a segment, keeping the ring sorted by sequence number.
    ///
    /// Segments entirely behind the release boundary, empty segments, and
    /// duplicates of an already-buffered sequence number are discarded.
    pub fn insert(&mut self, segment: Segment) {
        let end = segment.seq.wrapping_add(segment.payload.len() as u32);
        if self.expect_begin != 0 && seq_compare(self.expect_begin, end) != Ordering::Less {
            return;
        }
        if segment.payload.is_empty() {
            return;
        }

        // Scan newest-to-oldest for the slot whose predecessor has a
        // strictly smaller sequence number.
        let mut idx = self.len;
        while idx > 0 {
            let slot = (idx - 1 + self.start) % self.buffer.len();
            let Some(prev) = self.buffer[slot].as_ref() else {
                break;
            };
            match seq_compare(prev.seq, segment.seq) {
                Ordering::Equal => return,
                Ordering::Less => break,
                Ordering::Greater => idx -= 1,
            }
        }

        if self.len == self.buffer.len() {
            self.expand();
        }
        let cap = self.buffer.len();

        let mut i = self.len;
        while i > idx {
            let from = (i - 1 + self.start) % cap;
            let to = (i + self.start) % cap;
            self.buffer[to] = self.buffer[from].take();
            i -= 1;
        }
        self.buffer[(idx + self.start) % cap] = Some(segment);
        self.len += 1;
    }

    /// Release every buffered segment below `ack` to the sink, in order.
    ///
    /// Leading bytes already delivered are trimmed off; a segment the
    /// consumer has seen in full is skipped. A segment starting past the
    /// release boundary means bytes were lost on the tap; the stream
    /// continues from the new boundary. A send to a disconnected sink is
    /// ignored, the consumer is gone.
    pub fn confirm(&mut self, ack: u32, sink: &Sender<Segment>) {
        let cap = self.buffer.len();
        let mut released = 0;
        while released < self.len {
            let slot = (released + self.start) % cap;
            let below_ack = match self.buffer[slot].as_ref() {
                Some(segment) => seq_compare(segment.seq, ack) == Ordering::Less,
                None => false,
            };
            if !below_ack {
                break;
            }
            let Some(mut segment) = self.buffer[slot].take() else {
                break;
            };
            released += 1;

            let next_expect = segment.seq.wrapping_add(segment.payload.len() as u32);
            if self.expect_begin != 0 {
                match seq_compare(self.expect_begin, segment.seq) {
                    Ordering::Greater => {
                        let overlap = self.expect_begin.wrapping_sub(segment.seq) as usize;
                        if overlap >= segment.payload.len() {
                            // already delivered in full
                            continue;
                        }
                        segment.payload.drain(..overlap);
                    }
                    Ordering::Less => {
                        tracing::warn!(
                            expected = self.expect_begin,
                            seq = segment.seq,
                            "sequence gap, continuing past lost bytes"
                        );
                    }
                    Ordering::Equal => {}
                }
            }
            let _ = sink.send(segment);
            self.expect_begin = next_expect;
        }

        self.start = (self.start + released) % cap;
        self.len -= released;
        if self.last_ack == 0 || seq_compare(self.last_ack, ack) == Ordering::Less {
            self.last_ack = ack;
        }
    }

    /// Double the ring, linearizing entries to the front.
    fn expand(&mut self) {
        let cap = self.buffer.len();
        let mut next: Vec<Option<Segment>> = (0..cap * 2).map(|_| None).collect();
        for (i, slot) in next.iter_mut().take(self.len).enumerate() {
            *slot = self.buffer[(self.start + i) % cap].take();
        }
        self.buffer = next;
        self.start = 0;
    }
}
