//! Per-connection request/response timing records and their emission.
//!
//! One record tracks the first request/response pair seen on a connection:
//! when the request started and ended, when the reply started and ended,
//! accumulated payload sizes, and whether either side exceeded a single
//! on-wire frame. Records are emitted as one tab-separated line when a
//! reply cue arrives mid-stream or when the connection closes.

use std::io::{self, Write};
use std::sync::Mutex;

/// Payloads larger than this cannot fit one on-wire frame.
pub const FRAGMENT_THRESHOLD: usize = 1400;

/// Timing and size snapshot of one request/response exchange.
#[derive(Debug, Clone)]
pub struct TimingRecord {
    /// True when the request travelled client-to-server as inferred from
    /// the first recognized HTTP request.
    pub up: bool,
    /// First and last request-bearing segment timestamps.
    pub req1: f64,
    pub req2: f64,
    /// First and last response-bearing segment timestamps.
    pub rep1: f64,
    pub rep2: f64,
    pub req_len: usize,
    pub rep_len: usize,
    pub req_fragment: bool,
    pub rep_fragment: bool,
    /// Endpoint pair, `src-dst` of the request sender.
    pub id: String,
}

impl TimingRecord {
    /// Fresh record for a newly recognized request segment.
    pub fn request(ts: f64, up: bool, len: usize, id: String) -> Self {
        TimingRecord {
            up,
            req1: ts,
            req2: ts,
            rep1: 0.0,
            rep2: 0.0,
            req_len: len,
            rep_len: 0,
            req_fragment: len > FRAGMENT_THRESHOLD,
            rep_fragment: false,
            id,
        }
    }

    pub fn extend_request(&mut self, ts: f64, len: usize) {
        self.req2 = ts;
        self.req_len += len;
    }

    pub fn extend_reply(&mut self, ts: f64, len: usize) {
        self.rep2 = ts;
        self.rep_len += len;
    }

    /// Restart the reply side at a reply cue.
    pub fn reset_reply(&mut self, ts: f64, len: usize) {
        self.rep1 = ts;
        self.rep2 = ts;
        self.rep_len = len;
        self.rep_fragment = len > FRAGMENT_THRESHOLD;
    }
}

/// Shared destination for timing lines, stdout unless redirected.
pub struct TimingSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl TimingSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        TimingSink { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        TimingSink::new(Box::new(io::stdout()))
    }

    /// Emit one record as a tab-separated line.
    ///
    /// A record whose reply started before its request ended is
    /// inconsistent (this also covers records that never saw a reply) and
    /// is discarded.
    pub fn emit(&self, record: &TimingRecord) {
        if record.rep1 < record.req2 {
            return;
        }
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            format_clock(record.req1),
            format_clock(record.req2),
            format_clock(record.rep1),
            format_clock(record.rep2),
            format_duration(record.req2 - record.req1),
            format_duration(record.rep1 - record.req2),
            format_duration(record.rep2 - record.rep1),
            record.req_len,
            record.rep_len,
            record.req_fragment,
            record.rep_fragment,
            record.up,
            record.id,
        );
    }
}

/// Seconds within the minute, microsecond resolution: `SS.ffffff`.
fn format_clock(ts: f64) -> String {
    format!("{:09.6}", ts.rem_euclid(60.0))
}

/// Human-readable duration at microsecond precision.
fn format_duration(secs: f64) -> String {
    let micros = (secs * 1e6).round() as i64;
    if micros == 0 {
        "0s".into()
    } else if micros.abs() < 1_000 {
        format!("{}\u{b5}s", micros)
    } else if micros.abs() < 1_000_000 {
        format!("{:.3}ms", micros as f64 / 1_000.0)
    } else {
        format!("{:.6}s", micros as f64 / 1_000_000.0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn capture_sink() -> (TimingSink, SharedBuf) {
        let buf = SharedBuf::default();
        (TimingSink::new(Box::new(buf.clone())), buf)
    }

    fn record() -> TimingRecord {
        TimingRecord {
            up: true,
            req1: 1.0,
            req2: 1.0,
            rep1: 1.5,
            rep2: 1.5,
            req_len: 18,
            rep_len: 24,
            req_fragment: false,
            rep_fragment: false,
            id: "10.0.0.1:5000-10.0.0.2:80".into(),
        }
    }

    #[test]
    fn emits_tab_separated_line() {
        let (sink, buf) = capture_sink();
        sink.emit(&record());
        let line = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(
            line,
            "01.000000\t01.000000\t01.500000\t01.500000\t0s\t500.000ms\t0s\t18\t24\tfalse\tfalse\ttrue\t10.0.0.1:5000-10.0.0.2:80\n"
        );
    }

    #[test]
    fn suppresses_reply_before_request_end() {
        let (sink, buf) = capture_sink();
        let mut rec = record();
        rec.rep1 = 0.5;
        sink.emit(&rec);
        assert!(buf.0.lock().unwrap().is_empty());
    }

    #[test]
    fn suppresses_record_without_reply() {
        let (sink, buf) = capture_sink();
        sink.emit(&TimingRecord::request(2.0, true, 18, "a-b".into()));
        assert!(buf.0.lock().unwrap().is_empty());
    }

    #[test]
    fn clock_wraps_at_the_minute() {
        assert_eq!(format_clock(65.25), "05.250000");
        assert_eq!(format_clock(5.0), "05.000000");
    }

    #[test]
    fn durations_pick_a_readable_unit() {
        assert_eq!(format_duration(0.0), "0s");
        assert_eq!(format_duration(0.000002), "2\u{b5}s");
        assert_eq!(format_duration(0.0015), "1.500ms");
        assert_eq!(format_duration(2.0), "2.000000s");
    }

    #[test]
    fn request_reset_reply_lifecycle() {
        let mut rec = TimingRecord::request(1.0, true, 2000, "a-b".into());
        assert!(rec.req_fragment);
        rec.extend_request(1.2, 500);
        assert_eq!(rec.req_len, 2500);
        assert_eq!(rec.req2, 1.2);
        rec.reset_reply(1.5, 300);
        assert_eq!((rec.rep1, rec.rep2, rec.rep_len), (1.5, 1.5, 300));
        assert!(!rec.rep_fragment);
        rec.extend_reply(1.8, 200);
        assert_eq!(rec.rep_len, 500);
    }
}
