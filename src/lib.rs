//! An HTTP/1.1 client protocol engine for the `tokio` stack
//!
//! The crate drives a single request at a time over a byte-oriented
//! transport: request head and body upload, incremental response parsing,
//! chunked transfer decoding, proxy CONNECT tunnels and Basic/Digest
//! authentication. Downloaded bytes are routed to any combination of an
//! output file, an in-memory buffer, a callback and an output object.
#![recursion_limit="100"]

extern crate futures;
extern crate url;
extern crate httparse;
extern crate tokio_core;
extern crate tokio_io;
extern crate netbuf;
extern crate tk_bufstream;
extern crate futures_cpupool;
extern crate rand;
extern crate base64;
extern crate md5;
extern crate hex;
#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate matches;
#[macro_use] extern crate log;
#[macro_use] extern crate bitflags;

pub mod client;
mod headers;
mod serializer;
mod chunked;
mod body;

pub use serializer::Version;
pub use client::{Client, Control, Error, ErrorCode, Flags, Method, State};
