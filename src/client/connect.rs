//! Transport abstraction used by the connection layer
//!
//! The engine drives a `Stream`: a boxed non-blocking byte transport.
//! How one is established (name resolution, TCP, TLS) is delegated to a
//! `Connector` so that proxies, TLS stacks and in-memory transports for
//! tests all plug in the same way.

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;

use futures::{future, Future, Poll};
use futures_cpupool::CpuPool;
use tokio_core::net::TcpStream;
use tokio_core::reactor::Handle;
use tokio_io::{AsyncRead, AsyncWrite};

use client::errors::{connect_error, Error};

/// Object-safe bundle of the tokio I/O traits
pub trait Io: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> Io for T {}

/// A boxed byte-oriented transport to the origin or the proxy
pub struct Stream {
    io: Box<Io>,
}

impl Stream {
    pub fn new<T>(io: T) -> Stream
        where T: AsyncRead + AsyncWrite + 'static
    {
        Stream { io: Box::new(io) }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.io.flush()
    }
}

impl AsyncRead for Stream {}

impl AsyncWrite for Stream {
    fn shutdown(&mut self) -> Poll<(), io::Error> {
        self.io.shutdown()
    }
}

/// Establishes and upgrades transports on behalf of the client
pub trait Connector {
    /// Establish a transport to the given host and port
    fn connect(&mut self, host: &str, port: u16, handle: &Handle)
        -> Box<Future<Item=Stream, Error=Error>>;

    /// Upgrade an established transport to TLS
    ///
    /// Called for `https` targets and after a proxy CONNECT tunnel is
    /// up.  `verify` is false when certificate verification has been
    /// switched off by the client flags.
    fn secure(&mut self, stream: Stream, host: &str, verify: bool,
        handle: &Handle)
        -> Box<Future<Item=Stream, Error=Error>>;
}

/// Plain TCP connector with threaded name resolution
///
/// Resolution happens on a worker thread so the loop is never blocked
/// on the system resolver.  TLS is not provided; installs of the engine
/// that need `https` supply their own `Connector`.
pub struct TcpConnector {
    pool: CpuPool,
}

impl TcpConnector {
    pub fn new() -> TcpConnector {
        TcpConnector { pool: CpuPool::new(1) }
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, host: &str, port: u16, handle: &Handle)
        -> Box<Future<Item=Stream, Error=Error>>
    {
        let name = format!("{}:{}", host, port);
        let handle = handle.clone();
        Box::new(self.pool.spawn_fn(move || {
            match name.to_socket_addrs() {
                Ok(mut addrs) => addrs.next().ok_or(Error::HostNotFound),
                Err(_) => Err(Error::HostNotFound),
            }
        }).and_then(move |addr| {
            TcpStream::connect(&addr, &handle)
                .map_err(connect_error)
                .map(Stream::new)
        }))
    }

    fn secure(&mut self, _stream: Stream, _host: &str, _verify: bool,
        _handle: &Handle)
        -> Box<Future<Item=Stream, Error=Error>>
    {
        Box::new(future::err(Error::Io(io::Error::new(
            io::ErrorKind::Other,
            "the plain TCP connector has no TLS support"))))
    }
}
