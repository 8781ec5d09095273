use std::io;

use serializer::HeaderError;

quick_error! {
    #[derive(Debug)]
    /// Client request error
    pub enum Error {
        /// The connect or data deadline elapsed without traffic
        Timeout {
            description("request timed out")
        }
        /// Connection closed before the transfer was finished
        Disconnected {
            description("connection closed prematurely")
        }
        /// Target host name could not be resolved
        HostNotFound {
            description("host not found")
        }
        /// Remote end refused the connection
        ConnectionRefused {
            description("connection refused")
        }
        /// Response violates the protocol (bad status line, oversized
        /// header block, malformed chunk framing)
        InvalidResponse(detail: &'static str) {
            description("invalid HTTP response")
            display("invalid HTTP response: {}", detail)
        }
        /// The proxy refused to establish a CONNECT tunnel
        ProxyTunnel(status: u16) {
            description("proxy refused the SSL tunnel")
            display("proxy refused the SSL tunnel (status {})", status)
        }
        /// I/O error while writing the request
        Write(err: io::Error) {
            description("write error")
            display("write error: {}", err)
        }
        /// Upload source or download target file could not be used
        File(err: io::Error) {
            description("file error")
            display("file error: {}", err)
        }
        /// The upload source yielded no data
        NoData {
            description("no data available for upload")
        }
        /// A required property was not configured
        FieldNotSet(field: &'static str) {
            description("required field is not set")
            display("required field is not set: {}", field)
        }
        /// A custom header or property has an unusable shape
        Invalid(err: HeaderError) {
            description("invalid request property")
            display("invalid request property: {}", err)
            from()
        }
        /// The server failed the request before any content was read
        Failed(status: u16) {
            description("request failed")
            display("request failed with status {}", status)
        }
        /// A callback asked to abandon the request; not a failure of the
        /// engine itself
        Terminated {
            description("request terminated by callback")
        }
        /// `activate()` was called while a request is already in flight
        Recursion {
            description("request is already active")
        }
        /// Any other socket-level error
        Io(err: io::Error) {
            description("IO error")
            display("IO error: {}", err)
            from()
        }
    }
}

/// Condensed error code, exposed as the client's sticky error property
///
/// `Okay` means no error has been recorded for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Okay = 0,
    Timeout,
    Disconnected,
    HostNotFound,
    ConnectionRefused,
    InvalidResponse,
    ProxyTunnel,
    Write,
    File,
    NoData,
    FieldNotSet,
    InvalidValue,
    Failed,
    Terminated,
    Recursion,
    Io,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match *self {
            Error::Timeout => ErrorCode::Timeout,
            Error::Disconnected => ErrorCode::Disconnected,
            Error::HostNotFound => ErrorCode::HostNotFound,
            Error::ConnectionRefused => ErrorCode::ConnectionRefused,
            Error::InvalidResponse(..) => ErrorCode::InvalidResponse,
            Error::ProxyTunnel(..) => ErrorCode::ProxyTunnel,
            Error::Write(..) => ErrorCode::Write,
            Error::File(..) => ErrorCode::File,
            Error::NoData => ErrorCode::NoData,
            Error::FieldNotSet(..) => ErrorCode::FieldNotSet,
            Error::Invalid(..) => ErrorCode::InvalidValue,
            Error::Failed(..) => ErrorCode::Failed,
            Error::Terminated => ErrorCode::Terminated,
            Error::Recursion => ErrorCode::Recursion,
            Error::Io(..) => ErrorCode::Io,
        }
    }
}

/// Map an error from the read side of the socket
pub fn read_error(err: io::Error) -> Error {
    use std::io::ErrorKind::*;
    match err.kind() {
        ConnectionReset | ConnectionAborted | UnexpectedEof | BrokenPipe
        => Error::Disconnected,
        _ => Error::Io(err),
    }
}

/// Map an error from the write side of the socket
pub fn write_error(err: io::Error) -> Error {
    use std::io::ErrorKind::*;
    match err.kind() {
        ConnectionReset | ConnectionAborted | BrokenPipe
        => Error::Disconnected,
        _ => Error::Write(err),
    }
}

/// Map an error from the connect attempt
pub fn connect_error(err: io::Error) -> Error {
    use std::io::ErrorKind::*;
    match err.kind() {
        ConnectionRefused => Error::ConnectionRefused,
        TimedOut => Error::Timeout,
        _ => Error::Io(err),
    }
}
