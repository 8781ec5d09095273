//! The per-request protocol driver
//!
//! One `Activation` future drives a complete request cycle: connect (or
//! keep-alive reuse), optional CONNECT tunnel and TLS upgrade, head and
//! body upload, response head parsing, the authentication/redirect
//! dispatch loop, body download into the sinks, and teardown.  All
//! client callbacks fire on the loop thread with the shared cell
//! released.

use std::cell::RefCell;
use std::cmp::{max, min};
use std::fs;
use std::io::{Read, Write};
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use futures::{Async, Future, Poll};
use httparse;
use tk_bufstream::{IoBuf, ReadBuf, WriteBuf};
use tokio_core::reactor::{Handle, Timeout};

use body::BodyProgress;
use chunked::ChunkError;
use serializer::MessageState;
use client::auth;
use client::client::{set_path, Inner};
use client::connect::{Stream, TcpConnector};
use client::errors::{read_error, write_error, Error};
use client::flags::Flags;
use client::method::Method;
use client::request::{self, BodyPlan};
use client::response;
use client::sink::SinkSet;
use client::source::{self, Produced, Source};
use client::state::State;
use client::urlenc;
use client::{AuthChallenge, Control};

pub const MAX_AUTH_RETRIES: u32 = 5;
/// Backstop against re-dispatch loops (auth plus redirects plus tunnel)
const MAX_DISPATCHES: u32 = 16;
/// Chunk framing overhead reserved out of each write block
const CHUNK_OVERHEAD: usize = 18;

/// A buffered connection to the origin or the proxy
pub(crate) struct Conn {
    pub(crate) write: WriteBuf<Stream>,
    pub(crate) read: ReadBuf<Stream>,
}

impl Conn {
    fn new(stream: Stream) -> Conn {
        let (write, read) = IoBuf::new(stream).split();
        Conn {
            write: write,
            read: read,
        }
    }
}

/// Update the client state and fire the state-change callback
///
/// A callback returning `Stop` or `Abort` stops the upload while
/// sending (the response is still awaited) and completes the request in
/// any other non-terminal state.
pub(crate) fn set_state(inner: &Rc<RefCell<Inner>>, state: State) {
    let changed = {
        let mut cell = inner.borrow_mut();
        if cell.state == state {
            false
        } else {
            debug!("uid={}: state {} -> {}", cell.uid, cell.state, state);
            cell.state = state;
            true
        }
    };
    if !changed {
        return;
    }
    let callback = inner.borrow_mut().state_changed.take();
    if let Some(mut callback) = callback {
        let control = callback(state);
        {
            let mut cell = inner.borrow_mut();
            if cell.state_changed.is_none() {
                cell.state_changed = Some(callback);
            }
        }
        match control {
            Control::Continue => {}
            Control::Stop | Control::Abort => {
                if state == State::SendingContent {
                    set_state(inner, State::SendComplete);
                } else if !state.is_terminal() {
                    set_state(inner, State::Completed);
                }
            }
        }
    }
}

/// Reset the per-cycle fields and build the driver future
pub(crate) fn activate(inner: Rc<RefCell<Inner>>, handle: &Handle)
    -> Result<Activation, Error>
{
    {
        let mut cell = inner.borrow_mut();
        if cell.active {
            return Err(Error::Recursion);
        }
        if cell.host.is_empty() {
            return Err(Error::FieldNotSet("Host"));
        }
        debug!("uid={}: activating {} {}:{}/{}",
            cell.uid, cell.method, cell.host, cell.port, cell.path);
        cell.active = true;
        cell.error = None;
        cell.status = 0;
        cell.index = 0;
        cell.total_sent = 0;
        cell.tunneling = false;
        cell.connecting = false;
        cell.moved = false;
        cell.redirected = false;
        cell.flags.remove(Flags::MOVED | Flags::REDIRECTED);
        cell.args.clear();
        cell.recv_buffer.clear();
        cell.chunked = false;
        // the reset itself is silent, transitions are reported from here on
        cell.state = State::ReadingHeader;
    }
    Ok(Activation {
        inner: inner,
        handle: handle.clone(),
        phase: Phase::Start,
        timer: None,
        sinks: SinkSet::new(),
        dispatches: 0,
        is_head: false,
    })
}

struct Sending {
    conn: Conn,
    msg: MessageState,
    plan: BodyPlan,
    source: Option<Source>,
    body_done: bool,
}

struct TunnelHandshake {
    stream: Option<Stream>,
    head: Vec<u8>,
    written: usize,
    response: Vec<u8>,
}

enum Phase {
    Start,
    Connecting(Box<Future<Item=Stream, Error=Error>>),
    Tunneling(TunnelHandshake),
    Securing(Box<Future<Item=Stream, Error=Error>>),
    Sending(Sending),
    ReadHead(Conn),
    ReadBody {
        conn: Conn,
        progress: BodyProgress,
        close: bool,
    },
    Finished,
    Void,
}

enum Step {
    Progress(Phase),
    Park(Phase),
    Done(State),
}

/// Future driving one request cycle
///
/// Resolves to the terminal state (or `Authenticating` when parked for
/// the credential prompt); the outcome details stay on the client.
pub struct Activation {
    inner: Rc<RefCell<Inner>>,
    handle: Handle,
    phase: Phase,
    timer: Option<Timeout>,
    sinks: SinkSet,
    dispatches: u32,
    is_head: bool,
}

impl Future for Activation {
    type Item = State;
    type Error = ();

    fn poll(&mut self) -> Poll<State, ()> {
        match self.drive() {
            Ok(Async::Ready(state)) => {
                self.finish();
                Ok(Async::Ready(state))
            }
            Ok(Async::NotReady) => Ok(Async::NotReady),
            Err(error) => Ok(Async::Ready(self.fail(error))),
        }
    }
}

impl Activation {
    fn drive(&mut self) -> Result<Async<State>, Error> {
        loop {
            {
                // a callback or the host may have forced a terminal state
                let state = self.inner.borrow().state;
                if state.is_terminal()
                    && !matches!(self.phase, Phase::Finished)
                {
                    self.phase = Phase::Finished;
                    return Ok(Async::Ready(state));
                }
            }
            let phase = mem::replace(&mut self.phase, Phase::Void);
            match self.step(phase)? {
                Step::Progress(phase) => {
                    self.phase = phase;
                }
                Step::Park(phase) => {
                    self.phase = phase;
                    return self.park();
                }
                Step::Done(state) => {
                    self.phase = Phase::Finished;
                    return Ok(Async::Ready(state));
                }
            }
        }
    }

    fn park(&mut self) -> Result<Async<State>, Error> {
        if let Some(ref mut timer) = self.timer {
            match timer.poll().expect("timeout never fails") {
                Async::Ready(()) => return Err(Error::Timeout),
                Async::NotReady => {}
            }
        }
        Ok(Async::NotReady)
    }

    fn arm(&mut self, duration: Duration) {
        self.timer = Some(Timeout::new(duration, &self.handle)
            .expect("can always add a timeout"));
    }

    fn arm_data(&mut self) {
        let duration = self.inner.borrow().data_timeout;
        self.arm(duration);
    }

    fn put_back_source(&mut self, source: Source) {
        if let Some(object) = source.into_object() {
            self.inner.borrow_mut().input_object = Some(object);
        }
    }

    fn reclaim(&mut self) {
        match mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Sending(sending) => {
                if let Some(source) = sending.source {
                    self.put_back_source(source);
                }
            }
            _ => {}
        }
        self.sinks.release();
        self.timer = None;
    }

    fn finish(&mut self) {
        self.inner.borrow_mut().active = false;
        self.reclaim();
    }

    fn fail(&mut self, error: Error) -> State {
        {
            let mut cell = self.inner.borrow_mut();
            warn!("uid={}: request failed: {}", cell.uid, error);
            if cell.error.is_none() {
                cell.error = Some(error);
            }
            cell.active = false;
            cell.saved = None;
        }
        self.reclaim();
        set_state(&self.inner, State::Terminated);
        State::Terminated
    }

    fn step(&mut self, phase: Phase) -> Result<Step, Error> {
        match phase {
            Phase::Start => self.start(),
            Phase::Connecting(future) => self.connecting(future),
            Phase::Tunneling(handshake) => self.tunneling(handshake),
            Phase::Securing(future) => self.securing(future),
            Phase::Sending(sending) => self.sending(sending),
            Phase::ReadHead(conn) => self.read_head(conn),
            Phase::ReadBody { conn, progress, close }
            => self.read_body(conn, progress, close),
            Phase::Finished => Ok(Step::Done(self.inner.borrow().state)),
            Phase::Void => unreachable!(),
        }
    }

    fn start(&mut self) -> Result<Step, Error> {
        let saved = self.inner.borrow_mut().saved.take();
        if let Some(mut conn) = saved {
            let alive = match conn.read.read() {
                Ok(0) => !conn.read.done(),
                // premature bytes or an error: the socket is unusable
                _ => false,
            };
            if alive {
                debug!("uid={}: reusing the kept-alive connection",
                    self.inner.borrow().uid);
                return self.begin_request(conn);
            }
            // the server is gone, so is our authenticated footing
            self.inner.borrow_mut().secure_path = true;
        }
        let (host, port, timeout) = {
            let mut cell = self.inner.borrow_mut();
            cell.connecting = true;
            cell.tunneling = cell.proxy_server.is_some()
                && cell.flags.contains(Flags::SSL);
            if cell.connector.is_none() {
                cell.connector = Some(Box::new(TcpConnector::new()));
            }
            let target = match cell.proxy_server {
                Some(ref server) => (server.clone(), cell.proxy_port),
                None => (cell.host.clone(), cell.port),
            };
            (target.0, target.1, cell.connect_timeout)
        };
        let mut connector = self.inner.borrow_mut().connector.take()
            .expect("connector is installed above");
        let future = connector.connect(&host, port, &self.handle);
        self.inner.borrow_mut().connector = Some(connector);
        self.arm(timeout);
        Ok(Step::Progress(Phase::Connecting(future)))
    }

    fn secure(&mut self, stream: Stream) -> Result<Step, Error> {
        let (host, verify) = {
            let cell = self.inner.borrow();
            (cell.host.clone(),
             !cell.flags.contains(Flags::DISABLE_SERVER_VERIFY))
        };
        let mut connector = self.inner.borrow_mut().connector.take()
            .expect("connector is installed before securing");
        let future = connector.secure(stream, &host, verify, &self.handle);
        self.inner.borrow_mut().connector = Some(connector);
        Ok(Step::Progress(Phase::Securing(future)))
    }

    fn connecting(&mut self,
        mut future: Box<Future<Item=Stream, Error=Error>>)
        -> Result<Step, Error>
    {
        match future.poll()? {
            Async::NotReady => {
                Ok(Step::Park(Phase::Connecting(future)))
            }
            Async::Ready(stream) => {
                self.inner.borrow_mut().connecting = false;
                let (tunneling, ssl) = {
                    let cell = self.inner.borrow();
                    (cell.tunneling, cell.flags.contains(Flags::SSL))
                };
                if tunneling {
                    let head = request::build_connect_head(
                        &self.inner.borrow());
                    Ok(Step::Progress(Phase::Tunneling(TunnelHandshake {
                        stream: Some(stream),
                        head: head,
                        written: 0,
                        response: Vec::new(),
                    })))
                } else if ssl {
                    self.secure(stream)
                } else {
                    self.begin_request(Conn::new(stream))
                }
            }
        }
    }

    fn tunneling(&mut self, mut handshake: TunnelHandshake)
        -> Result<Step, Error>
    {
        match handshake.poll_handshake()? {
            Async::NotReady => {
                Ok(Step::Park(Phase::Tunneling(handshake)))
            }
            Async::Ready((stream, status)) => {
                if status == 200 {
                    debug!("uid={}: proxy tunnel established",
                        self.inner.borrow().uid);
                    self.secure(stream)
                } else {
                    Err(Error::ProxyTunnel(status))
                }
            }
        }
    }

    fn securing(&mut self,
        mut future: Box<Future<Item=Stream, Error=Error>>)
        -> Result<Step, Error>
    {
        match future.poll()? {
            Async::NotReady => Ok(Step::Park(Phase::Securing(future))),
            Async::Ready(stream) => {
                self.begin_request(Conn::new(stream))
            }
        }
    }

    /// Build the request head and enter the sending phase
    ///
    /// Decides between the configured method, the pre-authentication
    /// HEAD for uploads into unauthenticated directories, and resolves
    /// the body source.
    fn begin_request(&mut self, mut conn: Conn) -> Result<Step, Error> {
        let pre_auth = {
            let cell = self.inner.borrow();
            cell.method.has_body()
                && !cell.flags.contains(Flags::NO_HEAD)
                && (cell.secure_path
                    || cell.state == State::Authenticating)
        };
        if pre_auth {
            debug!("uid={}: pre-authenticating the upload with HEAD",
                self.inner.borrow().uid);
            // entering the state here also keeps the custom headers out
            // of the probe
            set_state(&self.inner, State::Authenticating);
        }
        let mut source = None;
        let (msg, plan) = {
            let mut cell = self.inner.borrow_mut();
            let configured = cell.method;
            let (wire_method, plan) = if pre_auth {
                (Method::Head, BodyPlan::None)
            } else if configured.has_body() {
                let size = cell.size;
                let (src, length) = if cell.outgoing.is_some() {
                    (Source::Callback { finished: false },
                     cell.content_length)
                } else if let Some(list) = cell.input_file.clone() {
                    source::file_source(&list, size)?
                } else if let Some(object) = cell.input_object.take() {
                    source::object_source(object, size)
                } else {
                    return Err(Error::FieldNotSet("InputFile"));
                };
                cell.content_length = length;
                let plan = if length >= 0 {
                    BodyPlan::Fixed(length as u64)
                } else if cell.flags.contains(Flags::RAW) {
                    BodyPlan::Raw
                } else {
                    BodyPlan::Chunked
                };
                cell.chunked = plan == BodyPlan::Chunked;
                source = Some(src);
                (configured, plan)
            } else {
                if configured == Method::Get
                    && cell.flags.contains(Flags::RESUME)
                    && cell.index == 0
                {
                    // resumed downloads range from the output file size
                    let length = cell.output_file.as_ref()
                        .and_then(|path| fs::metadata(path).ok())
                        .map(|meta| meta.len());
                    if let Some(length) = length {
                        cell.index = length;
                    }
                }
                (configured, BodyPlan::None)
            };
            self.is_head = wire_method == Method::Head;
            let msg = request::build_head(
                &mut cell, &mut conn.write.out_buf, wire_method, plan)?;
            (msg, plan)
        };
        if !pre_auth && plan != BodyPlan::None {
            self.inner.borrow_mut().index = 0;
            set_state(&self.inner, State::SendingContent);
        }
        self.arm_data();
        Ok(Step::Progress(Phase::Sending(Sending {
            conn: conn,
            msg: msg,
            plan: plan,
            source: source,
            body_done: plan == BodyPlan::None,
        })))
    }

    fn sending(&mut self, mut sending: Sending) -> Result<Step, Error> {
        if !sending.body_done
            && self.inner.borrow().state == State::SendingContent
        {
            self.pump(&mut sending)?;
        }
        if !sending.body_done
            && self.inner.borrow().state == State::SendComplete
        {
            // a callback stopped the upload; close the framing and wait
            if matches!(sending.plan, BodyPlan::Chunked) {
                sending.msg.done(&mut sending.conn.write.out_buf);
            }
            sending.body_done = true;
        }
        sending.conn.write.flush().map_err(write_error)?;
        if sending.body_done && sending.conn.write.out_buf.len() == 0 {
            if sending.plan != BodyPlan::None {
                set_state(&self.inner, State::SendComplete);
                // servers may take a while before answering an upload
                let quiet = max(self.inner.borrow().data_timeout,
                    Duration::from_secs(30));
                self.arm(quiet);
            }
            if let Some(source) = sending.source.take() {
                self.put_back_source(source);
            }
            return Ok(Step::Progress(Phase::ReadHead(sending.conn)));
        }
        // while uploading, any inbound byte means the server has already
        // made up its mind; switch over to reading the response
        let got = sending.conn.read.read().map_err(read_error)?;
        if got > 0 {
            let state = self.inner.borrow().state;
            if state == State::SendingContent
                || state == State::SendComplete
            {
                self.inner.borrow_mut().index = 0;
                set_state(&self.inner, State::ReadingHeader);
            }
            if let Some(source) = sending.source.take() {
                self.put_back_source(source);
            }
            self.arm_data();
            return Ok(Step::Progress(Phase::ReadHead(sending.conn)));
        }
        if sending.conn.read.done() {
            return Err(Error::Disconnected);
        }
        Ok(Step::Park(Phase::Sending(sending)))
    }

    /// Move body bytes from the source into the output buffer
    fn pump(&mut self, sending: &mut Sending) -> Result<(), Error> {
        let watermark = self.inner.borrow().buffer_size;
        let block_limit = min(watermark, 65535) - CHUNK_OVERHEAD;
        loop {
            if sending.conn.write.out_buf.len() >= watermark {
                return Ok(());
            }
            let mut limit = block_limit;
            if let BodyPlan::Fixed(total) = sending.plan {
                let sent = self.inner.borrow().index;
                let remaining = total.saturating_sub(sent);
                if remaining == 0 {
                    self.finish_body(sending);
                    return Ok(());
                }
                limit = min(limit as u64, remaining) as usize;
            }
            let mut block = Vec::new();
            let produced = match sending.source {
                Some(Source::Callback { ref mut finished }) => {
                    if *finished {
                        Produced::End
                    } else {
                        self.pump_callback(&mut block, limit, finished)?
                    }
                }
                Some(ref mut source) => {
                    source.produce(&mut block, limit)?
                }
                None => Produced::End,
            };
            match produced {
                Produced::End => {
                    self.finish_body(sending);
                    return Ok(());
                }
                Produced::Data(0) => {
                    // nothing available right now, try again later
                    return Ok(());
                }
                Produced::Data(_) => {
                    if matches!(sending.plan, BodyPlan::Fixed(..)) {
                        // an overshooting callback must not break the
                        // declared length
                        block.truncate(limit);
                    }
                    let before = sending.conn.write.out_buf.len();
                    match sending.plan {
                        BodyPlan::Raw => {
                            sending.conn.write.out_buf
                                .write_all(&block).unwrap();
                        }
                        _ => sending.msg.write_body(
                            &mut sending.conn.write.out_buf, &block),
                    }
                    let framed =
                        sending.conn.write.out_buf.len() - before;
                    let mut cell = self.inner.borrow_mut();
                    cell.index += block.len() as u64;
                    cell.total_sent += framed as u64;
                }
            }
        }
    }

    fn pump_callback(&mut self, block: &mut Vec<u8>, limit: usize,
        finished: &mut bool)
        -> Result<Produced, Error>
    {
        let callback = self.inner.borrow_mut().outgoing.take();
        let mut callback = match callback {
            Some(callback) => callback,
            None => return Err(Error::FieldNotSet("Outgoing")),
        };
        let result = callback(block, limit);
        {
            let mut cell = self.inner.borrow_mut();
            if cell.outgoing.is_none() {
                cell.outgoing = Some(callback);
            }
        }
        match result? {
            Control::Continue => Ok(Produced::Data(block.len())),
            Control::Stop => {
                // orderly end of the body, flush what was appended first
                *finished = true;
                if block.is_empty() {
                    Ok(Produced::End)
                } else {
                    Ok(Produced::Data(block.len()))
                }
            }
            Control::Abort => Err(Error::Terminated),
        }
    }

    fn finish_body(&mut self, sending: &mut Sending) {
        if !sending.body_done {
            if matches!(sending.plan, BodyPlan::Chunked) {
                sending.msg.done(&mut sending.conn.write.out_buf);
            }
            sending.body_done = true;
        }
    }

    fn read_head(&mut self, mut conn: Conn) -> Result<Step, Error> {
        let raw = self.inner.borrow().flags.contains(Flags::RAW);
        loop {
            let got = conn.read.read().map_err(read_error)?;
            if got > 0 {
                let state = self.inner.borrow().state;
                if state == State::SendingContent
                    || state == State::SendComplete
                {
                    self.inner.borrow_mut().index = 0;
                    set_state(&self.inner, State::ReadingHeader);
                }
                self.arm_data();
                match response::parse_head(
                    &mut conn.read.in_buf, self.is_head, raw)?
                {
                    Some(head) => return self.on_head(conn, head),
                    None => continue,
                }
            }
            if conn.read.in_buf.len() > 0 {
                if let Some(head) = response::parse_head(
                    &mut conn.read.in_buf, self.is_head, raw)?
                {
                    return self.on_head(conn, head);
                }
            }
            if conn.read.done() {
                let state = self.inner.borrow().state;
                if state == State::SendComplete
                    && conn.read.in_buf.len() == 0
                {
                    // orderly close after the upload was accepted
                    return self.complete(conn, true);
                }
                return Err(Error::Disconnected);
            }
            return Ok(Step::Park(Phase::ReadHead(conn)));
        }
    }

    /// The post-head decision chain, evaluated in a fixed order
    fn on_head(&mut self, conn: Conn, head: response::Head)
        -> Result<Step, Error>
    {
        let response::Head { status, version, args, content_length,
            chunked, close } = head;
        let uid = {
            let mut cell = self.inner.borrow_mut();
            cell.status = status;
            cell.content_length = content_length;
            cell.chunked = chunked;
            cell.args = args;
            if cell.flags.contains(Flags::LOG_ALL) {
                for (key, value) in cell.args.iter() {
                    debug!("uid={}: arg {}: {}", cell.uid, key, value);
                }
            }
            cell.uid
        };
        debug!("uid={}: {} response status {}, length {}, chunked {}",
            uid, version, status, content_length, chunked);

        // a HEAD sent for pre-authentication that was not rejected
        // means the directory accepted our credentials
        if self.inner.borrow().state == State::Authenticating
            && status != 401
        {
            debug!("uid={}: authentication successful, reactivating",
                uid);
            self.inner.borrow_mut().secure_path = false;
            set_state(&self.inner, State::Authenticated);
            let reusable = !close && content_length == 0 && !chunked;
            return self.redo(if reusable { Some(conn) } else { None });
        }

        if status == 301 {
            if self.inner.borrow().moved {
                warn!("uid={}: sequential MovedPermanently responses \
                    are not supported", uid);
            } else {
                let location =
                    self.inner.borrow().args.get("location").cloned();
                {
                    let mut cell = self.inner.borrow_mut();
                    cell.moved = true;
                    cell.flags.insert(Flags::MOVED);
                }
                match location {
                    Some(location) => {
                        info!("uid={}: moved permanently to {}",
                            uid, location);
                        self.apply_location(&location);
                        return self.redo(None);
                    }
                    None => {
                        warn!("uid={}: invalid MovedPermanently \
                            response (no location)", uid);
                    }
                }
            }
        } else if status == 307 {
            if self.inner.borrow().redirected {
                warn!("uid={}: sequential TempRedirect responses \
                    are not supported", uid);
            } else {
                let location =
                    self.inner.borrow().args.get("location").cloned();
                {
                    let mut cell = self.inner.borrow_mut();
                    cell.redirected = true;
                    cell.flags.insert(Flags::REDIRECTED);
                }
                if let Some(location) = location {
                    info!("uid={}: temporary redirect to {}",
                        uid, location);
                    self.apply_location(&location);
                    return self.redo(None);
                }
            }
        }

        if content_length == 0 && !chunked {
            debug!("uid={}: response head received, no content \
                imminent", uid);
            return self.complete(conn, close);
        }

        if status == 401
            && self.inner.borrow().auth_retries < MAX_AUTH_RETRIES
        {
            return self.on_unauthorized(conn);
        }

        if status < 200 || status >= 300 {
            // some services return content with error codes, the body
            // is downloaded all the same
            debug!("uid={}: non-success status {} with content",
                uid, status);
        }
        self.inner.borrow_mut().index = 0;
        set_state(&self.inner, State::ReadingContent);
        self.arm_data();
        Ok(Step::Progress(Phase::ReadBody {
            conn: conn,
            progress: BodyProgress::for_response(chunked, content_length),
            close: close,
        }))
    }

    fn apply_location(&mut self, location: &str) {
        let mut cell = self.inner.borrow_mut();
        cell.saved = None;
        match urlenc::parse_location(location) {
            Some(parsed) => {
                cell.host = parsed.host;
                cell.port = parsed.port;
                if parsed.ssl {
                    cell.flags.insert(Flags::SSL);
                } else {
                    cell.flags.remove(Flags::SSL);
                }
                set_path(&mut cell, &parsed.path);
            }
            None => set_path(&mut cell, location),
        }
    }

    fn on_unauthorized(&mut self, conn: Conn) -> Result<Step, Error> {
        // the retry goes over a fresh connection, so an unread error
        // body can never desynchronise the next response
        drop(conn);
        let digest = {
            let mut cell = self.inner.borrow_mut();
            cell.auth_retries += 1;
            debug!("uid={}: unauthorized, retry {} of {}",
                cell.uid, cell.auth_retries, MAX_AUTH_RETRIES);
            if !cell.password.is_empty() {
                // a preset password needs two rounds: the first 401 is
                // how the challenge arrives at all
                if !cell.auth_preset || cell.auth_retries >= 2 {
                    cell.password.clear();
                }
            }
            let header = cell.args.get("www-authenticate").cloned();
            let challenge = match header {
                Some(value) => auth::parse_challenge(&value),
                None => {
                    debug!("uid={}: authenticate method unknown",
                        cell.uid);
                    auth::parse_challenge("")
                }
            };
            cell.auth_digest = challenge.digest;
            if challenge.digest {
                cell.realm = challenge.realm;
                cell.auth_nonce = challenge.nonce;
                cell.auth_opaque = challenge.opaque;
                cell.auth_algorithm = challenge.algorithm;
                cell.auth_qop = challenge.qop;
            }
            cell.auth_digest
        };
        set_state(&self.inner, State::Authenticating);
        let ready = {
            let cell = self.inner.borrow();
            !cell.password.is_empty() && !cell.username.is_empty()
        };
        if ready {
            return self.redo(None);
        }
        if !self.inner.borrow().flags.contains(Flags::NO_DIALOG) {
            let prompt = self.inner.borrow_mut().auth_prompt.take();
            if let Some(mut prompt) = prompt {
                let challenge = AuthChallenge {
                    realm: self.inner.borrow().realm.clone(),
                    digest: digest,
                };
                prompt(&challenge);
                {
                    let mut cell = self.inner.borrow_mut();
                    if cell.auth_prompt.is_none() {
                        cell.auth_prompt = Some(prompt);
                    }
                }
                // park in Authenticating; the prompt reactivates the
                // client once credentials are in
                return Ok(Step::Done(State::Authenticating));
            }
        }
        Err(Error::Failed(401))
    }

    fn redo(&mut self, conn: Option<Conn>) -> Result<Step, Error> {
        self.dispatches += 1;
        if self.dispatches > MAX_DISPATCHES {
            let status = self.inner.borrow().status;
            return Err(Error::Failed(status));
        }
        // same silent reset a fresh activation does; the upload branch
        // can still recognise the pre-auth round by the secure path
        self.inner.borrow_mut().state = State::ReadingHeader;
        self.is_head = false;
        match conn {
            Some(conn) => self.begin_request(conn),
            None => Ok(Step::Progress(Phase::Start)),
        }
    }

    fn read_body(&mut self, mut conn: Conn, mut progress: BodyProgress,
        close: bool)
        -> Result<Step, Error>
    {
        loop {
            let (bytes, done) = progress.advance(&mut conn.read)
                .map_err(chunk_error)?;
            if bytes > 0 {
                let control = self.sinks.deliver(
                    &self.inner, &conn.read.in_buf[..bytes])?;
                self.inner.borrow_mut().index += bytes as u64;
                progress.consume(&mut conn.read, bytes);
                if let Control::Abort = control {
                    return Err(Error::Terminated);
                }
            }
            if done {
                return self.complete(conn, close);
            }
            let got = conn.read.read().map_err(read_error)?;
            if got == 0 {
                if conn.read.done() {
                    if matches!(progress, BodyProgress::Fixed { .. }) {
                        // the peer hung up with bytes still expected
                        return Err(Error::Disconnected);
                    }
                    let (bytes, _) = progress.advance(&mut conn.read)
                        .map_err(chunk_error)?;
                    if bytes == 0 {
                        return self.complete(conn, true);
                    }
                    continue;
                }
                return Ok(Step::Park(Phase::ReadBody {
                    conn: conn,
                    progress: progress,
                    close: close,
                }));
            }
            self.arm_data();
        }
    }

    fn complete(&mut self, conn: Conn, close: bool)
        -> Result<Step, Error>
    {
        {
            let mut cell = self.inner.borrow_mut();
            cell.active = false;
            if cell.keep_alive && !close {
                cell.saved = Some(conn);
            }
        }
        set_state(&self.inner, State::Completed);
        Ok(Step::Done(State::Completed))
    }
}

impl TunnelHandshake {
    fn poll_handshake(&mut self) -> Poll<(Stream, u16), Error> {
        {
            let stream = self.stream.as_mut()
                .expect("poll after handshake completion");
            while self.written < self.head.len() {
                match stream.write(&self.head[self.written..]) {
                    Ok(0) => return Err(Error::Disconnected),
                    Ok(bytes) => self.written += bytes,
                    Err(ref e)
                        if e.kind() == ::std::io::ErrorKind::WouldBlock
                    => return Ok(Async::NotReady),
                    Err(e) => return Err(write_error(e)),
                }
            }
            loop {
                let mut chunk = [0u8; 4096];
                match stream.read(&mut chunk) {
                    Ok(0) => return Err(Error::Disconnected),
                    Ok(bytes) => {
                        self.response.extend_from_slice(&chunk[..bytes]);
                        if self.response.len()
                            > response::MAX_HEADER_SIZE
                        {
                            return Err(Error::InvalidResponse(
                                "tunnel response head exceeds the \
                                 size cap"));
                        }
                        if head_end(&self.response).is_some() {
                            break;
                        }
                    }
                    Err(ref e)
                        if e.kind() == ::std::io::ErrorKind::WouldBlock
                    => return Ok(Async::NotReady),
                    Err(e) => return Err(read_error(e)),
                }
            }
        }
        let status = tunnel_status(&self.response)?;
        let stream = self.stream.take()
            .expect("stream is still present");
        Ok(Async::Ready((stream, status)))
    }
}

fn head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn chunk_error(err: ChunkError) -> Error {
    match err {
        ChunkError::Size(_) => {
            Error::InvalidResponse("invalid chunk size")
        }
        ChunkError::HeadTooLong => {
            Error::InvalidResponse("chunk header too long")
        }
        ChunkError::TooBig(_) => {
            Error::InvalidResponse("chunk exceeds the size cap")
        }
    }
}

fn tunnel_status(data: &[u8]) -> Result<u16, Error> {
    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut parsed = httparse::Response::new(&mut headers);
    match parsed.parse(data) {
        Ok(httparse::Status::Complete(_)) => {
            Ok(parsed.code.expect("status is set on complete parse"))
        }
        _ => Err(Error::InvalidResponse("malformed tunnel response")),
    }
}
