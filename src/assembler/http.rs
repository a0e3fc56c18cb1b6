//! First-byte HTTP cues.
//!
//! These classifiers decide, from the leading bytes of a TCP payload,
//! whether a segment starts an HTTP request or an `HTTP/1.1 200` response.
//! They are deliberately narrow: a downstream consumer does the real HTTP
//! parsing on the reassembled byte stream.

const METHODS: [&[u8]; 8] = [
    b"GET", b"POST", b"PUT", b"DELETE", b"HEAD", b"TRACE", b"OPTIONS", b"PATCH",
];

/// True when the payload begins with a known HTTP method followed by a
/// space within the first 8 bytes.
pub fn is_http_request(payload: &[u8]) -> bool {
    if payload.len() < 8 {
        return false;
    }
    let head = &payload[..8];
    match head.iter().position(|&b| b == b' ') {
        Some(idx) => METHODS.contains(&&head[..idx]),
        None => false,
    }
}

/// True when the first 12 bytes match `HTTP/1.1 200`, case-insensitively.
/// Other status codes and HTTP/1.0 are not treated as reply cues.
pub fn is_http_reply(payload: &[u8]) -> bool {
    payload.len() >= 12 && payload[..12].eq_ignore_ascii_case(b"HTTP/1.1 200")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_all_methods() {
        for method in ["GET", "POST", "PUT", "DELETE", "HEAD", "TRACE", "OPTIONS", "PATCH"] {
            let line = format!("{} / HTTP/1.1\r\n", method);
            assert!(is_http_request(line.as_bytes()), "{method}");
        }
    }

    #[test]
    fn rejects_non_requests() {
        assert!(!is_http_request(b"GET/x HTTP/1.1\r\n"));
        assert!(!is_http_request(b"FETCH / HTTP/1.1\r\n"));
        assert!(!is_http_request(b"GET "));
        assert!(!is_http_request(b""));
        assert!(!is_http_request(&[0x16, 0x03, 0x01, 0x02, 0x00, 0x01, 0x00, 0x01]));
    }

    #[test]
    fn recognizes_200_reply() {
        assert!(is_http_reply(b"HTTP/1.1 200 OK\r\n"));
        assert!(is_http_reply(b"http/1.1 200 ok\r\n"));
    }

    #[test]
    fn rejects_other_replies() {
        assert!(!is_http_reply(b"HTTP/1.1 404 Not Found\r\n"));
        assert!(!is_http_reply(b"HTTP/1.0 200 OK\r\n"));
        assert!(!is_http_reply(b"HTTP/1.1 2"));
    }
}
