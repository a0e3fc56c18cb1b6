//! One observed TCP connection: two directions, HTTP-driven lifecycle.

use std::sync::Arc;

use super::http::{is_http_reply, is_http_request};
use super::stream::{NetworkStream, StreamReader};
use super::timing::{TimingRecord, TimingSink};
use super::{Endpoint, Segment};

/// Payloads at or below this size are treated as bare ACK traffic and do
/// not extend the timing record.
const ACK_PAYLOAD_THRESHOLD: usize = 100;

/// The two consumer-side readers of a connection, handed to the
/// registered [`super::ConnectionHandler`] when the connection appears.
pub struct StreamPair {
    /// Client-to-server bytes.
    pub upstream: StreamReader,
    /// Server-to-client bytes.
    pub downstream: StreamReader,
}

/// Capture-side state of one connection.
///
/// Direction is inferred, not configured: the endpoint that sends the
/// first recognized HTTP request line becomes the client, and every later
/// segment is charged to upstream or downstream by comparing its source
/// against that endpoint. Until a request is recognized, segments update
/// the idle clock but are not buffered.
pub struct TcpConnection {
    upstream: NetworkStream,
    downstream: NetworkStream,
    /// Latched by the first recognized HTTP request; `Some` means the
    /// connection carries HTTP.
    client: Option<Endpoint>,
    /// Timestamp of the most recent segment, drives idle eviction.
    pub last_timestamp: f64,
    key: String,
    timing: Option<TimingRecord>,
    sink: Arc<TimingSink>,
}

impl TcpConnection {
    pub fn new(key: String, sink: Arc<TimingSink>) -> (TcpConnection, StreamPair) {
        let (upstream, up_reader) = NetworkStream::new();
        let (downstream, down_reader) = NetworkStream::new();
        (
            TcpConnection {
                upstream,
                downstream,
                client: None,
                last_timestamp: 0.0,
                key,
                timing: None,
                sink,
            },
            StreamPair {
                upstream: up_reader,
                downstream: down_reader,
            },
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_http(&self) -> bool {
        self.client.is_some()
    }

    /// Feed one observed segment through the connection.
    pub fn on_receive(&mut self, src: Endpoint, dst: Endpoint, segment: Segment, timestamp: f64) {
        self.last_timestamp = timestamp;

        if self.client.is_none() {
            if !is_http_request(&segment.payload) {
                return;
            }
            tracing::debug!(key = %self.key, client = %src, "first http request on connection");
            self.client = Some(src);
        }
        let up = self.client == Some(src);

        if is_http_request(&segment.payload) {
            // A new request overwrites any prior exchange; pipelining is
            // not modeled.
            self.timing = Some(TimingRecord::request(
                timestamp,
                up,
                segment.payload.len(),
                format!("{src}-{dst}"),
            ));
        }
        if segment.payload.len() > ACK_PAYLOAD_THRESHOLD {
            if let Some(record) = &mut self.timing {
                if record.up == up {
                    record.extend_request(timestamp, segment.payload.len());
                } else {
                    record.extend_reply(timestamp, segment.payload.len());
                }
            }
        }
        if is_http_reply(&segment.payload) {
            self.emit_timing();
            if let Some(record) = &mut self.timing {
                record.reset_reply(timestamp, segment.payload.len());
            }
        }

        let (send, confirm) = if up {
            (&mut self.upstream, &mut self.downstream)
        } else {
            (&mut self.downstream, &mut self.upstream)
        };

        let ack = segment.ack;
        let has_ack = segment.ack_flag;
        let terminates = segment.fin || segment.rst;

        send.append(segment);
        if has_ack {
            confirm.confirm(ack);
        }
        if terminates {
            send.closed = true;
        }
    }

    /// Both directions saw FIN or RST.
    pub fn closed(&self) -> bool {
        self.upstream.closed && self.downstream.closed
    }

    /// Emit the current timing record, if any. The sink applies the
    /// consistency suppression rule.
    pub fn emit_timing(&self) {
        if let Some(record) = &self.timing {
            self.sink.emit(record);
        }
    }

    /// Close both handoff channels; readers observe end-of-stream.
    pub fn finish(&mut self) {
        self.upstream.finish();
        self.downstream.finish();
    }

    /// Idle-eviction path: mark both directions closed and finish.
    pub fn expire(&mut self) {
        self.upstream.closed = true;
        self.downstream.closed = true;
        self.finish();
    }
}
