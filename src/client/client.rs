use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering, ATOMIC_USIZE_INIT};
use std::time::Duration;

use tokio_core::reactor::Handle;

use client::auth::Algorithm;
use client::connect::Connector;
use client::errors::{Error, ErrorCode};
use client::flags::Flags;
use client::method::Method;
use client::proto::{self, Activation, Conn};
use client::secret::Secret;
use client::state::State;
use client::urlenc;
use client::{IncomingFn, OutgoingFn, PromptFn, StateFn};
use client::{InputObject, ObjectMode, OutputObject, ProxyLookup};

/// Dictates how many bytes are written to the socket at a time.  Do not
/// make this greater than 64k
pub const BUFFER_WRITE_SIZE: usize = 16384;

static NEXT_UID: AtomicUsize = ATOMIC_USIZE_INIT;

pub(crate) struct Inner {
    pub(crate) uid: u64,
    // target
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path: String,
    // proxy
    pub(crate) proxy_server: Option<String>,
    pub(crate) proxy_port: u16,
    pub(crate) proxy_defined: bool,
    // request
    pub(crate) method: Method,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) content_type: Option<String>,
    pub(crate) content_length: i64,
    pub(crate) size: Option<u64>,
    pub(crate) flags: Flags,
    pub(crate) buffer_size: usize,
    pub(crate) connect_timeout: Duration,
    pub(crate) data_timeout: Duration,
    pub(crate) user_agent: String,
    // authentication
    pub(crate) username: String,
    pub(crate) password: Secret,
    pub(crate) realm: String,
    pub(crate) auth_nonce: String,
    pub(crate) auth_opaque: String,
    pub(crate) auth_algorithm: Algorithm,
    pub(crate) auth_qop: Option<String>,
    pub(crate) auth_cnonce: String,
    pub(crate) auth_preset: bool,
    pub(crate) auth_digest: bool,
    pub(crate) auth_retries: u32,
    pub(crate) auth_path: String,
    pub(crate) secure_path: bool,
    // parse state
    pub(crate) state: State,
    pub(crate) index: u64,
    pub(crate) total_sent: u64,
    pub(crate) status: u16,
    pub(crate) error: Option<Error>,
    pub(crate) args: HashMap<String, String>,
    pub(crate) chunked: bool,
    // lifecycle
    pub(crate) moved: bool,
    pub(crate) redirected: bool,
    pub(crate) tunneling: bool,
    pub(crate) connecting: bool,
    pub(crate) keep_alive: bool,
    pub(crate) inited: bool,
    pub(crate) active: bool,
    // body plumbing
    pub(crate) input_file: Option<String>,
    pub(crate) input_object: Option<Box<InputObject>>,
    pub(crate) output_file: Option<PathBuf>,
    pub(crate) output_object: Option<Box<OutputObject>>,
    pub(crate) object_mode: ObjectMode,
    pub(crate) datatype: u32,
    pub(crate) recv_buffer: Vec<u8>,
    // callbacks and collaborators
    pub(crate) incoming: Option<IncomingFn>,
    pub(crate) outgoing: Option<OutgoingFn>,
    pub(crate) state_changed: Option<StateFn>,
    pub(crate) auth_prompt: Option<PromptFn>,
    pub(crate) proxy_lookup: Option<Box<ProxyLookup>>,
    pub(crate) connector: Option<Box<Connector>>,
    pub(crate) saved: Option<Conn>,
}

/// The HTTP client object
///
/// A cheap handle; clones share the same underlying request state.  One
/// request is driven at a time: configure the properties, then call
/// `activate()` and run the returned future on the loop.  Completion is
/// signalled through the state-change callback, after which `status()`
/// and `error()` describe the outcome.
#[derive(Clone)]
pub struct Client {
    inner: Rc<RefCell<Inner>>,
}

impl Client {
    pub(crate) fn shared(&self) -> Rc<RefCell<Inner>> {
        self.inner.clone()
    }

    pub fn new() -> Client {
        Client {
            inner: Rc::new(RefCell::new(Inner {
                uid: NEXT_UID.fetch_add(1, Ordering::SeqCst) as u64,
                host: String::new(),
                port: 80,
                path: String::new(),
                proxy_server: None,
                proxy_port: 8080,
                proxy_defined: false,
                method: Method::Get,
                headers: Vec::new(),
                content_type: None,
                content_length: -1,
                size: None,
                flags: Flags::empty(),
                buffer_size: BUFFER_WRITE_SIZE,
                connect_timeout: Duration::from_secs(10),
                data_timeout: Duration::from_secs(5),
                user_agent: concat!(
                    "tk-fetch/", env!("CARGO_PKG_VERSION")).to_string(),
                username: String::new(),
                password: Secret::new(),
                realm: String::new(),
                auth_nonce: String::new(),
                auth_opaque: String::new(),
                auth_algorithm: Algorithm::Md5,
                auth_qop: None,
                auth_cnonce: String::new(),
                auth_preset: false,
                auth_digest: false,
                auth_retries: 0,
                auth_path: String::new(),
                secure_path: false,
                state: State::ReadingHeader,
                index: 0,
                total_sent: 0,
                status: 0,
                error: None,
                args: HashMap::new(),
                chunked: false,
                moved: false,
                redirected: false,
                tunneling: false,
                connecting: false,
                keep_alive: false,
                inited: false,
                active: false,
                input_file: None,
                input_object: None,
                output_file: None,
                output_object: None,
                object_mode: ObjectMode::DataFeed,
                datatype: 0,
                recv_buffer: Vec::new(),
                incoming: None,
                outgoing: None,
                state_changed: None,
                auth_prompt: None,
                proxy_lookup: None,
                connector: None,
                saved: None,
            })),
        }
    }

    /// Stable identifier of this client
    pub fn uid(&self) -> u64 {
        self.inner.borrow().uid
    }

    pub fn set_host(&self, value: &str) -> &Client {
        self.inner.borrow_mut().host = value.to_string();
        self
    }
    pub fn host(&self) -> String {
        self.inner.borrow().host.clone()
    }

    /// Set the target port; port 443 implies SSL
    pub fn set_port(&self, value: u16) -> &Client {
        let mut inner = self.inner.borrow_mut();
        inner.port = value;
        if value == 443 {
            inner.flags.insert(Flags::SSL);
        }
        self
    }
    pub fn port(&self) -> u16 {
        self.inner.borrow().port
    }

    pub fn ssl(&self) -> bool {
        self.inner.borrow().flags.contains(Flags::SSL)
    }

    /// Set the request path
    ///
    /// The value is percent-encoded for the request line.  Changing into
    /// a directory that differs from the last authenticated one arms the
    /// pre-authentication handshake for uploads.
    pub fn set_path(&self, value: &str) -> &Client {
        let mut inner = self.inner.borrow_mut();
        set_path(&mut inner, value);
        self
    }
    pub fn path(&self) -> String {
        self.inner.borrow().path.clone()
    }

    /// Set host, port, SSL mode and path from an absolute URL
    ///
    /// Relative values are routed through the path setter.  Changing the
    /// location drops any kept-alive socket.
    pub fn set_location(&self, value: &str) -> &Client {
        let mut inner = self.inner.borrow_mut();
        inner.saved = None;
        match urlenc::parse_location(value) {
            Some(location) => {
                inner.host = location.host;
                inner.port = location.port;
                if location.ssl {
                    inner.flags.insert(Flags::SSL);
                } else {
                    inner.flags.remove(Flags::SSL);
                }
                set_path(&mut inner, &location.path);
            }
            None => {
                set_path(&mut inner, value);
            }
        }
        self
    }

    pub fn set_proxy(&self, server: &str, port: u16) -> &Client {
        let mut inner = self.inner.borrow_mut();
        inner.proxy_server = Some(server.to_string());
        inner.proxy_port = port;
        inner.proxy_defined = true;
        self
    }
    pub fn proxy_server(&self) -> Option<String> {
        self.inner.borrow().proxy_server.clone()
    }
    pub fn proxy_port(&self) -> u16 {
        self.inner.borrow().proxy_port
    }

    pub fn set_method(&self, value: Method) -> &Client {
        self.inner.borrow_mut().method = value;
        self
    }
    pub fn method(&self) -> Method {
        self.inner.borrow().method
    }

    pub fn set_user_agent(&self, value: &str) -> &Client {
        self.inner.borrow_mut().user_agent = value.to_string();
        self
    }

    pub fn set_content_type(&self, value: &str) -> &Client {
        self.inner.borrow_mut().content_type = Some(value.to_string());
        self
    }

    /// Expected upload length; −1 selects chunked streaming
    pub fn set_content_length(&self, value: i64) -> &Client {
        self.inner.borrow_mut().content_length = value;
        self
    }
    pub fn content_length(&self) -> i64 {
        self.inner.borrow().content_length
    }

    /// Override the upload size computed from the input source
    pub fn set_size(&self, value: u64) -> &Client {
        self.inner.borrow_mut().size =
            if value > 0 { Some(value) } else { None };
        self
    }

    pub fn set_flags(&self, value: Flags) -> &Client {
        self.inner.borrow_mut().flags = value;
        self
    }
    pub fn flags(&self) -> Flags {
        self.inner.borrow().flags
    }

    /// Clamped to the range `[16384, 65535]`
    pub fn set_buffer_size(&self, value: usize) -> &Client {
        let clamped = if value < BUFFER_WRITE_SIZE {
            BUFFER_WRITE_SIZE
        } else if value > 65535 {
            65535
        } else {
            value
        };
        self.inner.borrow_mut().buffer_size = clamped;
        self
    }
    pub fn buffer_size(&self) -> usize {
        self.inner.borrow().buffer_size
    }

    pub fn set_connect_timeout(&self, value: Duration) -> &Client {
        self.inner.borrow_mut().connect_timeout = value;
        self
    }
    pub fn set_data_timeout(&self, value: Duration) -> &Client {
        self.inner.borrow_mut().data_timeout = value;
        self
    }

    pub fn set_username(&self, value: &str) -> &Client {
        self.inner.borrow_mut().username = value.to_string();
        self
    }

    /// Store the password, scrubbing any previous value
    ///
    /// A password supplied this way counts as preset: it gets one full
    /// authentication attempt before being discarded.
    pub fn set_password(&self, value: &str) -> &Client {
        let mut inner = self.inner.borrow_mut();
        inner.password.set(value);
        inner.auth_preset = true;
        self
    }

    /// Realm of the last authentication challenge
    pub fn realm(&self) -> String {
        self.inner.borrow().realm.clone()
    }

    pub fn status(&self) -> u16 {
        self.inner.borrow().status
    }

    /// Bytes transferred in the current phase
    pub fn index(&self) -> u64 {
        self.inner.borrow().index
    }

    pub fn total_sent(&self) -> u64 {
        self.inner.borrow().total_sent
    }

    /// Sticky error code of the last cycle; `Okay` when none
    pub fn error(&self) -> ErrorCode {
        self.inner.borrow().error.as_ref()
            .map(|e| e.code()).unwrap_or(ErrorCode::Okay)
    }

    /// Human-readable form of the sticky error
    pub fn error_message(&self) -> Option<String> {
        self.inner.borrow().error.as_ref().map(|e| e.to_string())
    }

    pub fn state(&self) -> State {
        self.inner.borrow().state
    }

    /// Force a state transition from outside the engine
    ///
    /// Forcing `Completed` or `Terminated` cancels the request in
    /// flight; the driver performs the same teardown as for an internal
    /// transition.
    pub fn set_state(&self, value: State) -> &Client {
        proto::set_state(&self.inner, value);
        self
    }

    /// Upload source: a path, or several separated by `|` which are
    /// concatenated into one body
    pub fn set_input_file(&self, value: &str) -> &Client {
        self.inner.borrow_mut().input_file = Some(value.to_string());
        self
    }

    pub fn set_input_object(&self, value: Box<InputObject>) -> &Client {
        self.inner.borrow_mut().input_object = Some(value);
        self
    }

    pub fn set_output_file(&self, value: &str) -> &Client {
        self.inner.borrow_mut().output_file = Some(PathBuf::from(value));
        self
    }

    pub fn set_output_object(&self, value: Box<OutputObject>,
        mode: ObjectMode, datatype: u32) -> &Client
    {
        let mut inner = self.inner.borrow_mut();
        inner.output_object = Some(value);
        inner.object_mode = mode;
        inner.datatype = datatype;
        self
    }

    /// Contents of the in-memory receive buffer (without the
    /// terminating NUL byte)
    pub fn recv_buffer(&self) -> Vec<u8> {
        let inner = self.inner.borrow();
        let mut data = inner.recv_buffer.clone();
        if data.last() == Some(&0) {
            data.pop();
        }
        data
    }

    /// Append a custom request header
    pub fn set_header(&self, key: &str, value: &str) -> &Client {
        self.inner.borrow_mut().headers.push(
            (key.to_string(), value.to_string()));
        self
    }

    /// A header of the last response, by lowercase field name
    pub fn response_arg(&self, key: &str) -> Option<String> {
        self.inner.borrow().args.get(key).cloned()
    }

    pub fn set_keep_alive(&self, value: bool) -> &Client {
        self.inner.borrow_mut().keep_alive = value;
        self
    }

    pub fn on_incoming<F>(&self, f: F) -> &Client
        where F: FnMut(&[u8]) -> Result<::client::Control, Error> + 'static
    {
        self.inner.borrow_mut().incoming = Some(Box::new(f));
        self
    }

    pub fn on_outgoing<F>(&self, f: F) -> &Client
        where F: FnMut(&mut Vec<u8>, usize)
            -> Result<::client::Control, Error> + 'static
    {
        self.inner.borrow_mut().outgoing = Some(Box::new(f));
        self
    }

    pub fn on_state_change<F>(&self, f: F) -> &Client
        where F: FnMut(State) -> ::client::Control + 'static
    {
        self.inner.borrow_mut().state_changed = Some(Box::new(f));
        self
    }

    pub fn on_auth_prompt<F>(&self, f: F) -> &Client
        where F: FnMut(&::client::AuthChallenge) + 'static
    {
        self.inner.borrow_mut().auth_prompt = Some(Box::new(f));
        self
    }

    pub fn set_proxy_lookup(&self, value: Box<ProxyLookup>) -> &Client {
        self.inner.borrow_mut().proxy_lookup = Some(value);
        self
    }

    pub fn set_connector(&self, value: Box<Connector>) -> &Client {
        self.inner.borrow_mut().connector = Some(value);
        self
    }

    /// Resolve proxy defaults through the lookup collaborator
    ///
    /// Consulted once; an explicitly configured proxy wins.
    pub fn init(&self) -> &Client {
        let mut inner = self.inner.borrow_mut();
        if !inner.inited {
            inner.inited = true;
            if !inner.proxy_defined {
                let found = inner.proxy_lookup.as_ref()
                    .and_then(|lookup| lookup.find(inner.port));
                if let Some((server, port)) = found {
                    debug!("uid={}: proxy lookup: {}:{}",
                        inner.uid, server, port);
                    inner.proxy_server = Some(server);
                    inner.proxy_port = port;
                }
            }
        }
        self
    }

    /// Start one request cycle
    ///
    /// Returns the future driving the request; run or spawn it on the
    /// loop.  The future resolves to the terminal state, with the
    /// details left on the client.  Fails with `Error::Recursion` while
    /// a previous cycle is still active.
    pub fn activate(&self, handle: &Handle) -> Result<Activation, Error> {
        self.init();
        proto::activate(self.inner.clone(), handle)
    }

    /// `activate()` and detach the future onto the loop
    pub fn spawn(&self, handle: &Handle) -> Result<(), Error> {
        use futures::Future;
        let activation = self.activate(handle)?;
        handle.spawn(activation.map(|_| ()));
        Ok(())
    }

    /// Cancel whatever is in flight and release resources
    ///
    /// Never fails and may be called at any time.  The kept-alive
    /// socket survives only a completed cycle.
    pub fn deactivate(&self) -> &Client {
        let drop_saved = {
            let inner = self.inner.borrow();
            !(inner.keep_alive && inner.state == State::Completed)
        };
        if !self.inner.borrow().state.is_terminal() {
            proto::set_state(&self.inner, State::Terminated);
        }
        if drop_saved {
            self.inner.borrow_mut().saved = None;
        }
        self
    }
}

/// Store an encoded path and track the authenticated-directory state
pub(crate) fn set_path(inner: &mut Inner, value: &str) {
    inner.auth_retries = 0;
    let trimmed = value.trim_left_matches('/');
    inner.path = urlenc::encode_path(trimmed);
    // Until the new directory is authenticated against the server,
    // uploads must not send the body with credentials blindly
    let dir = urlenc::directory(&inner.path).to_string();
    inner.secure_path = dir != inner.auth_path;
    inner.auth_path = dir;
}

#[cfg(test)]
mod test {
    use client::state::State;
    use client::flags::Flags;
    use super::Client;

    #[test]
    fn location_round_trip() {
        let client = Client::new();
        client.set_location("https://host:443/foo");
        assert_eq!(client.host(), "host");
        assert_eq!(client.port(), 443);
        assert_eq!(client.path(), "foo");
        assert!(client.ssl());
    }

    #[test]
    fn location_with_port() {
        let client = Client::new();
        client.set_location("http://example.com:8080/a/b c");
        assert_eq!(client.host(), "example.com");
        assert_eq!(client.port(), 8080);
        assert_eq!(client.path(), "a/b%20c");
        assert!(!client.ssl());
    }

    #[test]
    fn relative_location_only_touches_path() {
        let client = Client::new();
        client.set_location("http://example.com/a");
        client.set_location("/other/path");
        assert_eq!(client.host(), "example.com");
        assert_eq!(client.path(), "other/path");
    }

    #[test]
    fn port_443_implies_ssl() {
        let client = Client::new();
        client.set_port(443);
        assert!(client.ssl());
    }

    #[test]
    fn buffer_size_is_clamped() {
        let client = Client::new();
        client.set_buffer_size(1);
        assert_eq!(client.buffer_size(), 16384);
        client.set_buffer_size(1 << 20);
        assert_eq!(client.buffer_size(), 65535);
        client.set_buffer_size(30000);
        assert_eq!(client.buffer_size(), 30000);
    }

    #[test]
    fn path_changes_arm_secure_path() {
        let client = Client::new();
        client.set_path("/dir/index.html");
        assert!(client.inner.borrow().secure_path);
        // same directory again: nothing new to authenticate
        client.set_path("dir/other.html");
        assert!(!client.inner.borrow().secure_path);
        client.set_path("elsewhere/file");
        assert!(client.inner.borrow().secure_path);
    }

    #[test]
    fn uids_are_distinct() {
        assert!(Client::new().uid() != Client::new().uid());
    }

    #[test]
    fn initial_state() {
        let client = Client::new();
        assert_eq!(client.state(), State::ReadingHeader);
        assert_eq!(client.status(), 0);
        assert_eq!(client.flags(), Flags::empty());
    }
}
