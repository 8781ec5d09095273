//! The HTTP/1.x client protocol engine
//!
//! The central type is [`Client`]: configure the target and the body
//! plumbing through its properties, then `activate()` to drive one
//! request on the loop.  Decoded response bytes flow to the configured
//! sinks; progress is reported through the state-change callback.

mod auth;
mod client;
mod connect;
mod errors;
mod flags;
mod method;
mod proto;
mod request;
mod response;
mod secret;
mod sink;
mod source;
mod state;
mod urlenc;

pub use self::client::Client;
pub use self::connect::{Connector, Stream, TcpConnector};
pub use self::errors::{Error, ErrorCode};
pub use self::flags::Flags;
pub use self::method::Method;
pub use self::proto::Activation;
pub use self::state::State;

use std::io;

/// Verdict of a client callback
///
/// The meaning of `Stop` depends on the callback: from the outgoing
/// callback it is the orderly end of the request body, from the
/// state-change callback while sending it stops the upload but keeps
/// waiting for the response.  `Abort` abandons the request everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
    Abort,
}

/// How body bytes are handed to an output object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectMode {
    /// Call `data_feed` with the configured datatype
    DataFeed,
    /// Call the plain `write`
    ReadWrite,
}

/// An object acting as the upload source
pub trait InputObject {
    /// Total number of bytes the object will produce, when known
    fn size(&self) -> Option<u64>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// An object receiving downloaded body bytes
pub trait OutputObject {
    fn data_feed(&mut self, datatype: u32, data: &[u8])
        -> io::Result<()>;
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Process-wide proxy configuration lookup
pub trait ProxyLookup {
    /// Proxy server and port to use for the given target port
    fn find(&self, port: u16) -> Option<(String, u16)>;
}

/// Challenge details handed to the credential prompt
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    pub realm: String,
    /// Digest scheme; plain Basic otherwise
    pub digest: bool,
}

/// Receives each slice of downloaded body bytes
pub type IncomingFn = Box<FnMut(&[u8]) -> Result<Control, Error>>;
/// Produces request-body bytes: append up to the given limit to the
/// buffer, return `Stop` when the body is complete
pub type OutgoingFn =
    Box<FnMut(&mut Vec<u8>, usize) -> Result<Control, Error>>;
/// Observes every state transition
pub type StateFn = Box<FnMut(State) -> Control>;
/// Asked to collect credentials after an unanswerable 401; the prompt
/// sets the username and password and re-activates the client
pub type PromptFn = Box<FnMut(&AuthChallenge)>;
