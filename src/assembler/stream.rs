//! One direction of a connection as a byte stream.
//!
//! The capture side owns a [`NetworkStream`]: it buffers segments in a
//! receive window and, on acknowledgement, hands released segments to a
//! bounded channel. The consumer side owns the matching [`StreamReader`],
//! a blocking `std::io::Read` over that channel. Backpressure is the
//! channel bound; a consumer that loses interest drops its reader, which
//! flips a shared flag so the capture side stops buffering for it.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};

use super::window::ReceiveWindow;
use super::Segment;

/// Capacity of the handoff channel between capture and consumer.
pub const HANDOFF_CAPACITY: usize = 1024;

/// Capture-side half: receive window plus the sending end of the handoff.
#[derive(Debug)]
pub struct NetworkStream {
    window: ReceiveWindow,
    handoff: Option<Sender<Segment>>,
    ignored: Arc<AtomicBool>,
    /// Set when FIN or RST was seen in this direction, or on idle eviction.
    pub closed: bool,
}

impl NetworkStream {
    /// Create the two halves of one direction.
    pub fn new() -> (NetworkStream, StreamReader) {
        let (tx, rx) = bounded(HANDOFF_CAPACITY);
        let ignored = Arc::new(AtomicBool::new(false));
        (
            NetworkStream {
                window: ReceiveWindow::default(),
                handoff: Some(tx),
                ignored: ignored.clone(),
                closed: false,
            },
            StreamReader {
                handoff: rx,
                remain: Vec::new(),
                ignored,
            },
        )
    }

    /// Buffer a segment in the receive window.
    pub fn append(&mut self, segment: Segment) {
        if self.ignored.load(Ordering::Relaxed) {
            return;
        }
        self.window.insert(segment);
    }

    /// Release acknowledged segments to the consumer.
    pub fn confirm(&mut self, ack: u32) {
        if self.ignored.load(Ordering::Relaxed) {
            return;
        }
        if let Some(handoff) = &self.handoff {
            self.window.confirm(ack, handoff);
        }
    }

    /// Close the handoff channel. Idempotent; the reader observes
    /// end-of-stream once the queue drains.
    pub fn finish(&mut self) {
        self.handoff.take();
    }
}

/// Consumer-side half: a blocking byte reader over the handoff channel.
#[derive(Debug)]
pub struct StreamReader {
    handoff: Receiver<Segment>,
    /// Unconsumed tail of the segment currently being drained.
    remain: Vec<u8>,
    ignored: Arc<AtomicBool>,
}

impl StreamReader {
    /// Stop receiving: the capture side silently drops further segments
    /// for this direction. Dropping the reader has the same effect.
    pub fn close(&self) {
        self.ignored.store(true, Ordering::Relaxed);
    }
}

impl Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.remain.is_empty() {
            match self.handoff.recv() {
                Ok(segment) => self.remain = segment.payload,
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.remain.len());
        buf[..n].copy_from_slice(&self.remain[..n]);
        self.remain.drain(..n);
        Ok(n)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.ignored.store(true, Ordering::Relaxed);
    }
}
