//! Incremental parser for the response head
//!
//! The head accumulates in the connection's input buffer until the
//! terminating empty line arrives, however the reads happen to be
//! segmented.  Parsed headers are exposed as a lowercase-keyed map.

use std::cmp::min;
use std::collections::HashMap;
#[allow(unused_imports)]
use std::ascii::AsciiExt;

use httparse;
use tk_bufstream::Buf;

use headers;
use serializer::Version;
use client::errors::Error;

/// Cap for the accumulated response head
pub const MAX_HEADER_SIZE: usize = 8 << 20;
/// Larger declared bodies are demoted to streaming
pub const MAX_CONTENT_LENGTH: i64 = 10 * 1024 * 1024 * 1024;

/// Number of headers to allocate on the stack
const MIN_HEADERS: usize = 16;
/// A hard limit on the number of headers
const MAX_HEADERS: usize = 1024;

/// Parsed response head
#[derive(Debug)]
pub struct Head {
    pub status: u16,
    pub version: Version,
    /// Field names lowercased, values trimmed
    pub args: HashMap<String, String>,
    /// −1 means streaming (unknown length or chunked)
    pub content_length: i64,
    pub chunked: bool,
    /// Connection cannot be reused afterwards
    pub close: bool,
}

fn scan(status: u16, is_head: bool, raw: bool,
    headers: &[httparse::Header], minor: u8)
    -> Head
{
    let version = Version::from_minor(minor);
    let mut head = Head {
        status: status,
        version: version,
        args: HashMap::new(),
        content_length: -1,
        chunked: false,
        // an HTTP/1.0 peer will not keep the connection open
        close: version == Version::Http10,
    };
    let bodyless = is_head
        || (status > 100 && status < 200)
        || status == 204 || status == 304;
    let mut has_length = false;
    for header in headers.iter() {
        let name = header.name.to_ascii_lowercase();
        let value = String::from_utf8_lossy(header.value)
            .trim().to_string();
        match &name[..] {
            "transfer-encoding" => {
                let chunked = header.value.split(|&x| x == b',')
                    .last().map(headers::is_chunked).unwrap_or(false);
                if chunked && !raw {
                    if has_length {
                        // framing is ambiguous, never reuse the socket
                        warn!("both Content-Length and chunked \
                            transfer encoding present");
                        head.close = true;
                    }
                    head.chunked = true;
                    head.content_length = -1;
                }
            }
            "content-length" => {
                has_length = true;
                if head.chunked {
                    head.close = true;
                } else {
                    head.content_length = match value.parse::<i64>() {
                        Ok(n) if n >= 0 && n <= MAX_CONTENT_LENGTH => n,
                        _ => -1,
                    };
                }
            }
            "connection" => {
                if header.value.split(|&x| x == b',')
                    .any(headers::is_close)
                {
                    head.close = true;
                }
            }
            _ => {}
        }
        head.args.insert(name, value);
    }
    if bodyless {
        head.content_length = 0;
        head.chunked = false;
    }
    head
}

/// Try to parse a complete response head out of the buffer
///
/// Returns `Ok(None)` when more bytes are needed.  The head bytes are
/// consumed from the buffer on success, leaving any body prefix in
/// place.  Accumulating more than 8 MiB without finding the end of the
/// head is a protocol violation.
pub fn parse_head(buf: &mut Buf, is_head: bool, raw: bool)
    -> Result<Option<Head>, Error>
{
    let window = min(buf.len(), MAX_HEADER_SIZE);
    let (head, bytes) = {
        let mut vec;
        let mut headers = [httparse::EMPTY_HEADER; MIN_HEADERS];
        let mut parsed = httparse::Response::new(&mut headers);
        let mut result = parsed.parse(&buf[..window]);
        if matches!(result, Err(httparse::Error::TooManyHeaders)) {
            vec = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
            parsed = httparse::Response::new(&mut vec);
            result = parsed.parse(&buf[..window]);
        }
        match result {
            Ok(httparse::Status::Complete(bytes)) => {
                let version = parsed.version.unwrap();
                let code = parsed.code.unwrap();
                (scan(code, is_head, raw, parsed.headers, version), bytes)
            }
            Ok(httparse::Status::Partial) => {
                if buf.len() > MAX_HEADER_SIZE {
                    return Err(Error::InvalidResponse(
                        "response head exceeds the size cap"));
                }
                return Ok(None);
            }
            Err(httparse::Error::Version) => {
                return Err(Error::InvalidResponse(
                    "response does not start with HTTP/"));
            }
            Err(_) => {
                return Err(Error::InvalidResponse(
                    "malformed response head"));
            }
        }
    };
    buf.consume(bytes);
    Ok(Some(head))
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use tk_bufstream::Buf;

    use serializer::Version;
    use client::errors::Error;
    use super::{parse_head, Head, MAX_HEADER_SIZE};

    fn parse(input: &[u8]) -> Result<Option<Head>, Error> {
        let mut buf = Buf::new();
        buf.write_all(input).unwrap();
        parse_head(&mut buf, false, false)
    }

    #[test]
    fn minimal() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 5\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.version, Version::Http11);
        assert_eq!(head.content_length, 5);
        assert!(!head.chunked);
        assert!(!head.close);
    }

    #[test]
    fn keys_are_lowercased() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            X-Some-HEADER:   value here \r\n\
            Content-Length: 0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.args.get("x-some-header").map(|x| &x[..]),
            Some("value here"));
        assert!(head.args.get("X-Some-HEADER").is_none());
    }

    #[test]
    fn partial_head() {
        assert!(parse(b"HTTP/1.1 200 OK\r\nContent-Le")
            .unwrap().is_none());
    }

    #[test]
    fn body_prefix_is_left_in_buffer() {
        let mut buf = Buf::new();
        buf.write_all(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 5\r\n\r\nhello").unwrap();
        let head = parse_head(&mut buf, false, false).unwrap().unwrap();
        assert_eq!(head.content_length, 5);
        assert_eq!(&buf[..], b"hello");
    }

    #[test]
    fn split_at_every_offset() {
        let wire: &[u8] = b"HTTP/1.1 200 OK\r\n\
            Content-Length: 11\r\n\r\n";
        for cut in 1..wire.len() - 1 {
            let mut buf = Buf::new();
            buf.write_all(&wire[..cut]).unwrap();
            assert!(parse_head(&mut buf, false, false)
                .unwrap().is_none(), "cut at {}", cut);
            buf.write_all(&wire[cut..]).unwrap();
            let head = parse_head(&mut buf, false, false)
                .unwrap().unwrap();
            assert_eq!(head.status, 200, "cut at {}", cut);
            assert_eq!(head.content_length, 11, "cut at {}", cut);
        }
    }

    #[test]
    fn chunked_overrides_length() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 10\r\n\
            Transfer-Encoding: chunked\r\n\r\n").unwrap().unwrap();
        assert!(head.chunked);
        assert_eq!(head.content_length, -1);
        assert!(head.close);
    }

    #[test]
    fn raw_mode_ignores_chunked() {
        let mut buf = Buf::new();
        buf.write_all(b"HTTP/1.1 200 OK\r\n\
            Transfer-Encoding: chunked\r\n\r\n").unwrap();
        let head = parse_head(&mut buf, false, true).unwrap().unwrap();
        assert!(!head.chunked);
        assert_eq!(head.content_length, -1);
    }

    #[test]
    fn oversized_length_is_demoted() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 10737418241\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.content_length, -1);
    }

    #[test]
    fn boundary_length_is_kept() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 10737418240\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.content_length, 10737418240);
    }

    #[test]
    fn negative_length_is_streaming() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Content-Length: -1\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.content_length, -1);
    }

    #[test]
    fn head_response_has_no_body() {
        let mut buf = Buf::new();
        buf.write_all(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 500\r\n\r\n").unwrap();
        let head = parse_head(&mut buf, true, false).unwrap().unwrap();
        assert_eq!(head.content_length, 0);
    }

    #[test]
    fn not_modified_has_no_body() {
        let head = parse(b"HTTP/1.1 304 Not Modified\r\n\
            Content-Length: 500\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.content_length, 0);
    }

    #[test]
    fn connection_close() {
        let head = parse(b"HTTP/1.1 200 OK\r\n\
            Connection: close\r\n\
            Content-Length: 0\r\n\r\n").unwrap().unwrap();
        assert!(head.close);
    }

    #[test]
    fn http10_implies_close() {
        let head = parse(b"HTTP/1.0 200 OK\r\n\
            Content-Length: 0\r\n\r\n").unwrap().unwrap();
        assert_eq!(head.version, Version::Http10);
        assert!(head.close);
    }

    #[test]
    fn garbage_is_rejected() {
        match parse(b"ICY 200 OK\r\n\r\n") {
            Err(Error::InvalidResponse(..)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn head_of_exactly_8_mib_parses() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 0\r\nX-Pad: ");
        // pad the head so the final \n lands exactly on the cap
        let pad = MAX_HEADER_SIZE - wire.len() - 4;
        wire.extend(::std::iter::repeat(b'x').take(pad));
        wire.extend_from_slice(b"\r\n\r\n");
        assert_eq!(wire.len(), MAX_HEADER_SIZE);
        let head = parse(&wire).unwrap().unwrap();
        assert_eq!(head.status, 200);
    }

    #[test]
    fn head_over_8_mib_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(b"HTTP/1.1 200 OK\r\n\
            Content-Length: 0\r\nX-Pad: ");
        let pad = MAX_HEADER_SIZE - wire.len() - 3;
        wire.extend(::std::iter::repeat(b'x').take(pad));
        wire.extend_from_slice(b"\r\n\r\n");
        assert_eq!(wire.len(), MAX_HEADER_SIZE + 1);
        match parse(&wire) {
            Err(Error::InvalidResponse(..)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
