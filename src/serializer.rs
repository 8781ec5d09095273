//! Low-level serializer for the request side of the protocol
//!
//! It tracks the message state so that the body framing (fixed length
//! versus chunked) always matches what the headers promised.

use std::fmt;
use std::fmt::Display;
use std::io::Write;
#[allow(unused_imports)]
use std::ascii::AsciiExt;

use tk_bufstream::Buf;

/// HTTP version token on the request and status lines
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Build from the minor version digit the response parser reports
    pub fn from_minor(minor: u8) -> Version {
        match minor {
            0 => Version::Http10,
            _ => Version::Http11,
        }
    }
}

impl Default for Version {
    /// The version this engine speaks on the wire
    fn default() -> Version {
        Version::Http11
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Version::Http10 => f.write_str("HTTP/1.0"),
            Version::Http11 => f.write_str("HTTP/1.1"),
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum HeaderError {
        DuplicateContentLength {
            description("Content-Length is added twice")
        }
        DuplicateTransferEncoding {
            description("Transfer-Encoding is added twice")
        }
        InvalidHeaderName {
            description("header name contains invalid characters")
        }
        InvalidHeaderValue {
            description("header value contains invalid characters")
        }
        TransferEncodingAfterContentLength {
            description("Transfer-Encoding added when Content-Length is \
                already specified")
        }
        ContentLengthAfterTransferEncoding {
            description("Content-Length added after Transfer-Encoding")
        }
        BodyLengthHeader {
            description("Content-Length and Transfer-Encoding must be set \
                using the specialized methods")
        }
    }
}

/// State of the request being serialized into the output buffer
///
/// Note: while we pass the buffer to each method, we expect that the same
/// buffer is passed each time
#[derive(Debug)]
pub enum MessageState {
    /// Nothing has been written yet.
    RequestStart,
    /// Request line is already in the buffer.
    Headers,
    /// The message contains a fixed size body.
    FixedHeaders { content_length: u64 },
    /// The message contains a chunked body.
    ChunkedHeaders,
    /// The message contains a body with the given number of bytes left.
    FixedBody { content_length: u64 },
    /// The message contains a chunked body.
    ChunkedBody,
    /// A message in the final state.
    Done,
}

fn invalid_header(value: &[u8]) -> bool {
    return value.iter().any(|&x| x == b'\r' || x == b'\n')
}

impl MessageState {
    /// Write the request line.
    ///
    /// This puts the request line into the buffer immediately. If you
    /// don't continue with the request it will be sent to the network
    /// shortly.
    ///
    /// # Panics
    ///
    /// When the request line is already written. It's expected that your
    /// request handler state machine will never call the method twice.
    pub fn request_line(&mut self, buf: &mut Buf,
        method: &str, target: &str, version: Version)
    {
        use self::MessageState::*;
        match *self {
            RequestStart => {
                write!(buf, "{} {} {}\r\n",
                    method, target, version).unwrap();
                *self = Headers;
            }
            ref state => {
                panic!("Called request_line() on request in state {:?}",
                       state)
            }
        }
    }

    fn write_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        buf.write_all(value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    fn write_formatted<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        if invalid_header(name.as_bytes()) {
            return Err(HeaderError::InvalidHeaderName);
        }
        let start = buf.len();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(b": ").unwrap();

        let value_start = buf.len();
        write!(buf, "{}", value).unwrap();
        if invalid_header(&buf[value_start..]) {
            buf.remove_range(start..);
            return Err(HeaderError::InvalidHeaderValue);
        }

        buf.write_all(b"\r\n").unwrap();
        Ok(())
    }

    /// Add a header to the message.
    ///
    /// The header is written into the output buffer immediately and sent
    /// on the next loop iteration.
    ///
    /// `Content-Length` must be set using the `add_length` method and
    /// `Transfer-Encoding: chunked` with the `add_chunked` method. These
    /// two headers are important for the security of HTTP.
    ///
    /// # Panics
    ///
    /// Panics when `add_header` is called in the wrong state.
    pub fn add_header(&mut self, buf: &mut Buf, name: &str, value: &[u8])
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers | FixedHeaders { .. } | ChunkedHeaders => {
                self.write_header(buf, name, value)
            }
            ref state => {
                panic!("Called add_header() on a message in state {:?}",
                       state)
            }
        }
    }

    /// Same as `add_header` but allows the value to be formatted directly
    /// into the buffer
    ///
    /// Useful for numeric headers and strongly typed wrappers
    pub fn format_header<D: Display>(&mut self, buf: &mut Buf,
        name: &str, value: D)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        if name.eq_ignore_ascii_case("Content-Length")
            || name.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(BodyLengthHeader)
        }
        match *self {
            Headers | FixedHeaders { .. } | ChunkedHeaders => {
                self.write_formatted(buf, name, value)
            }
            ref state => {
                panic!("Called format_header() on a message in state {:?}",
                       state)
            }
        }
    }

    /// Add a content length to the message.
    ///
    /// The `Content-Length` header is written to the output buffer
    /// immediately. When the body is written the length is validated.
    ///
    /// # Panics
    ///
    /// Panics when `add_length` is called in the wrong state.
    pub fn add_length(&mut self, buf: &mut Buf, n: u64)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        match *self {
            FixedHeaders { .. } => Err(DuplicateContentLength),
            ChunkedHeaders => Err(ContentLengthAfterTransferEncoding),
            Headers => {
                self.write_formatted(buf, "Content-Length", n)?;
                *self = FixedHeaders { content_length: n };
                Ok(())
            }
            ref state => {
                panic!("Called add_length() on message in state {:?}",
                       state)
            }
        }
    }

    /// Set the transfer encoding to chunked.
    ///
    /// Writes `Transfer-Encoding: chunked` to the output buffer
    /// immediately, and puts the body framing into chunked mode.
    ///
    /// # Panics
    ///
    /// Panics when `add_chunked` is called in the wrong state.
    pub fn add_chunked(&mut self, buf: &mut Buf)
        -> Result<(), HeaderError>
    {
        use self::MessageState::*;
        use self::HeaderError::*;
        match *self {
            FixedHeaders { .. } => Err(TransferEncodingAfterContentLength),
            ChunkedHeaders => Err(DuplicateTransferEncoding),
            Headers => {
                self.write_header(buf, "Transfer-Encoding", b"chunked")?;
                *self = ChunkedHeaders;
                Ok(())
            }
            ref state => {
                panic!("Called add_chunked() on message in state {:?}",
                       state)
            }
        }
    }

    /// Close the request head.
    ///
    /// A request without a `Content-Length` or `Transfer-Encoding` header
    /// contains no body, which is the common case for GET and friends.
    ///
    /// # Panics
    ///
    /// Panics when the request is in a wrong state.
    pub fn done_headers(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        *self = match *self {
            Headers => FixedBody { content_length: 0 },
            FixedHeaders { content_length }
            => FixedBody { content_length: content_length },
            ChunkedHeaders => ChunkedBody,
            ref state => {
                panic!("Called done_headers() on message in state {:?}",
                       state)
            }
        };
        buf.write(b"\r\n").unwrap();
    }

    /// Write a chunk of the message body.
    ///
    /// Works both for fixed-size and chunked bodies.
    ///
    /// For the chunked body each chunk is put into the buffer immediately,
    /// prefixed by its size. Empty chunks are ignored (writing one would
    /// terminate the body prematurely).
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the chunk overflows the
    /// declared content length.
    pub fn write_body(&mut self, buf: &mut Buf, data: &[u8]) {
        use self::MessageState::*;
        match *self {
            FixedBody { ref mut content_length } => {
                if data.len() as u64 > *content_length {
                    panic!("Fixed size request error. \
                        Bytes left {} but got additional {}",
                        content_length, data.len());
                }
                buf.write(data).unwrap();
                *content_length -= data.len() as u64;
            }
            ChunkedBody => if data.len() > 0 {
                write!(buf, "{:x}\r\n", data.len()).unwrap();
                buf.write(data).unwrap();
                buf.write(b"\r\n").unwrap();
            },
            ref state => {
                panic!("Called write_body() on message in state {:?}",
                    state)
            }
        }
    }

    /// Write the needed finalization data into the buffer.
    ///
    /// The method may be called multiple times.
    ///
    /// # Panics
    ///
    /// When the message is in the wrong state or the body is not finished.
    pub fn done(&mut self, buf: &mut Buf) {
        use self::MessageState::*;
        match *self {
            FixedBody { content_length: 0 } => *self = Done,
            FixedBody { content_length } =>
                panic!("Tried to close message with {} bytes remaining.",
                       content_length),
            ChunkedBody => {
                buf.write(b"0\r\n\r\n").unwrap();
                *self = Done;
            }
            Done => {}  // multiple invocations are okay.
            ref state => {
                panic!("Called done() on request in state {:?}",
                       state);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use tk_bufstream::Buf;

    use super::{MessageState, Version};

    #[test]
    fn version_tokens() {
        assert_eq!(format!("{}", Version::Http10), "HTTP/1.0");
        assert_eq!(format!("{}", Version::Http11), "HTTP/1.1");
        assert_eq!(Version::default(), Version::Http11);
        assert_eq!(Version::from_minor(0), Version::Http10);
        assert_eq!(Version::from_minor(1), Version::Http11);
    }

    fn do_request<F>(fun: F) -> Buf
        where F: FnOnce(MessageState, &mut Buf)
    {
        let mut buf = Buf::new();
        fun(MessageState::RequestStart, &mut buf);
        buf
    }

    #[test]
    fn minimal_request() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "GET", "/", Version::Http11);
            msg.done_headers(buf);
            msg.done(buf);
        })[..], "GET / HTTP/1.1\r\n\r\n".as_bytes());
    }

    #[test]
    fn request_with_host() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "GET", "/path", Version::Http11);
            msg.add_header(buf, "Host", b"example.com").unwrap();
            msg.done_headers(buf);
            msg.done(buf);
        })[..], concat!("GET /path HTTP/1.1\r\n",
                        "Host: example.com\r\n\r\n").as_bytes());
    }

    #[test]
    fn fixed_body() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "PUT", "/upload", Version::Http11);
            msg.add_length(buf, 5).unwrap();
            msg.done_headers(buf);
            msg.write_body(buf, b"Hello");
            msg.done(buf);
        })[..], concat!("PUT /upload HTTP/1.1\r\n",
                        "Content-Length: 5\r\n\r\nHello").as_bytes());
    }

    #[test]
    fn chunked_body() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/submit", Version::Http11);
            msg.add_chunked(buf).unwrap();
            msg.done_headers(buf);
            msg.write_body(buf, b"Hello");
            msg.write_body(buf, b"");
            msg.write_body(buf, b" world");
            msg.done(buf);
        })[..], concat!("POST /submit HTTP/1.1\r\n",
                        "Transfer-Encoding: chunked\r\n\r\n",
                        "5\r\nHello\r\n",
                        "6\r\n world\r\n",
                        "0\r\n\r\n").as_bytes());
    }

    #[test]
    fn length_header_rejected() {
        do_request(|mut msg, buf| {
            msg.request_line(buf, "POST", "/", Version::Http11);
            msg.add_header(buf, "Content-Length", b"10").unwrap_err();
            msg.add_length(buf, 0).unwrap();
            msg.done_headers(buf);
            msg.done(buf);
        });
    }

    #[test]
    fn bad_header_value_rolled_back() {
        assert_eq!(&do_request(|mut msg, buf| {
            msg.request_line(buf, "GET", "/", Version::Http11);
            msg.add_header(buf, "X-Bad", b"a\r\nInjected: yes").unwrap_err();
            msg.done_headers(buf);
            msg.done(buf);
        })[..], "GET / HTTP/1.1\r\n\r\n".as_bytes());
    }
}
