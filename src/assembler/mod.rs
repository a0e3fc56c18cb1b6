//! Passive TCP reassembly keyed by endpoint pair.
//!
//! The assembler owns the process-wide connection table. Capture workers
//! feed it observed segments; it looks up or creates the connection for
//! each segment's endpoint pair, dispatches the segment into the right
//! direction, and retires connections on close or idle timeout. The table
//! mutex guards only lookup/insert/delete; handler callbacks and segment
//! dispatch run outside it.

pub mod connection;
pub mod http;
pub mod seq;
pub mod stream;
pub mod timing;
pub mod window;

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;

use crate::protocol::tcp::TcpHeader;
use connection::{StreamPair, TcpConnection};
use timing::TimingSink;

/// One side of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// An observed TCP segment: the header fields reassembly cares about,
/// plus an owned copy of the payload.
#[derive(Debug, Clone)]
pub struct Segment {
    pub seq: u32,
    pub ack: u32,
    pub syn: bool,
    pub ack_flag: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn from_header(tcp: &TcpHeader<'_>) -> Self {
        Segment {
            seq: tcp.sequence_number(),
            ack: tcp.ack_number(),
            syn: tcp.syn(),
            ack_flag: tcp.ack(),
            fin: tcp.fin(),
            rst: tcp.rst(),
            payload: tcp.payload().to_vec(),
        }
    }
}

/// Direction-independent connection key: both endpoints rendered as
/// `ip:port`, sorted, joined by `-`.
pub fn canonical_key(src: &Endpoint, dst: &Endpoint) -> String {
    let (src, dst) = (src.to_string(), dst.to_string());
    if src < dst {
        format!("{src}-{dst}")
    } else {
        format!("{dst}-{src}")
    }
}

/// Caller-supplied hook for new connections.
pub trait ConnectionHandler: Send + Sync {
    /// Invoked once per new connection, outside the table mutex.
    /// Implementations typically spawn a reader task per direction.
    fn handle(&self, src: Endpoint, dst: Endpoint, streams: StreamPair);

    /// Invoked once at assembler shutdown.
    fn finish(&self);
}

/// Coarse endpoint filters: when set, at least one endpoint must match.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentFilter {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
}

impl SegmentFilter {
    fn admits(&self, src: &Endpoint, dst: &Endpoint) -> bool {
        if let Some(ip) = self.ip {
            if src.ip != ip && dst.ip != ip {
                return false;
            }
        }
        if let Some(port) = self.port {
            if src.port != port && dst.port != port {
                return false;
            }
        }
        true
    }
}

type ConnectionTable = AHashMap<String, Arc<Mutex<TcpConnection>>>;

pub struct Assembler {
    table: Mutex<ConnectionTable>,
    handler: Arc<dyn ConnectionHandler>,
    filter: SegmentFilter,
    sink: Arc<TimingSink>,
}

impl Assembler {
    pub fn new(
        handler: Arc<dyn ConnectionHandler>,
        filter: SegmentFilter,
        sink: Arc<TimingSink>,
    ) -> Self {
        Assembler {
            table: Mutex::new(ConnectionTable::new()),
            handler,
            filter,
            sink,
        }
    }

    /// Live connections currently in the table.
    pub fn connection_count(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    /// Feed one decoded TCP packet.
    pub fn assemble(&self, src_ip: IpAddr, dst_ip: IpAddr, tcp: &TcpHeader<'_>, timestamp: f64) {
        let src = Endpoint {
            ip: src_ip,
            port: tcp.src_port(),
        };
        let dst = Endpoint {
            ip: dst_ip,
            port: tcp.dst_port(),
        };
        self.assemble_segment(src, dst, Segment::from_header(tcp), timestamp);
    }

    /// Feed one observed segment.
    ///
    /// Segments of a single connection must arrive in capture order; the
    /// pipeline guarantees that by pinning each endpoint pair to one
    /// worker. Segments that match no filter, or that arrive for an
    /// unknown connection without a SYN or HTTP request line, are dropped
    /// silently.
    pub fn assemble_segment(&self, src: Endpoint, dst: Endpoint, segment: Segment, timestamp: f64) {
        if !self.filter.admits(&src, &dst) {
            return;
        }

        let key = canonical_key(&src, &dst);
        let may_create = (segment.syn && !segment.ack_flag) || http::is_http_request(&segment.payload);

        let Some(connection) = self.retrieve(src, dst, &key, may_create) else {
            return;
        };

        let closed = {
            let mut conn = connection.lock().unwrap();
            conn.on_receive(src, dst, segment, timestamp);
            if conn.closed() {
                conn.emit_timing();
                true
            } else {
                false
            }
        };

        if closed {
            self.table.lock().unwrap().remove(&key);
            connection.lock().unwrap().finish();
            tracing::debug!(key = %key, "connection closed");
        }
    }

    /// Look up the connection for `key`, creating it when permitted. The
    /// handler runs after the table mutex is released.
    fn retrieve(
        &self,
        src: Endpoint,
        dst: Endpoint,
        key: &str,
        may_create: bool,
    ) -> Option<Arc<Mutex<TcpConnection>>> {
        let (connection, streams) = {
            let mut table = self.table.lock().unwrap();
            match table.get(key) {
                Some(existing) => (existing.clone(), None),
                None if may_create => {
                    let (conn, streams) = TcpConnection::new(key.to_string(), self.sink.clone());
                    let conn = Arc::new(Mutex::new(conn));
                    table.insert(key.to_string(), conn.clone());
                    (conn, Some(streams))
                }
                None => return None,
            }
        };
        if let Some(streams) = streams {
            tracing::debug!(%src, %dst, "new connection");
            self.handler.handle(src, dst, streams);
        }
        Some(connection)
    }

    /// Evict connections whose last segment predates `cutoff`. Call
    /// periodically from a driver loop.
    pub fn flush_older_than(&self, cutoff: f64) {
        let expired: Vec<(String, Arc<Mutex<TcpConnection>>)> = {
            let mut table = self.table.lock().unwrap();
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, conn)| conn.lock().unwrap().last_timestamp < cutoff)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| table.remove(&key).map(|conn| (key, conn)))
                .collect()
        };
        for (key, connection) in expired {
            tracing::debug!(key = %key, "idle connection evicted");
            connection.lock().unwrap().expire();
        }
    }

    /// Finish every live connection, drain the table, and notify the
    /// handler of shutdown. Blocked readers observe end-of-stream.
    pub fn finish_all(&self) {
        let drained: Vec<(String, Arc<Mutex<TcpConnection>>)> = {
            self.table.lock().unwrap().drain().collect()
        };
        for (_, connection) in drained {
            connection.lock().unwrap().finish();
        }
        self.handler.finish();
        tracing::info!("assembler finished");
    }
}
