//! A single framed connection.
//!
//! A [`Session`] owns one non-blocking socket and two byte buffers. Reads and writes are performed in bounded chunks
//! whenever the owning endpoint services it. Each tick of a session runs, in order:
//!
//! 1. the force-close check,
//! 2. the keep-alive check,
//! 3. frame extraction and dispatch of every complete message in the inbound buffer,
//! 4. the [`SessionHandler::on_tick`] hook.
//!
//! Terminal conditions (remote close, malformed frames, keep-alive expiry, ...) are recorded in the session's
//! sticky [`ErrorState`]. The session never closes itself; its owner sweeps errored sessions on its next tick.

use crate::clock::Clock;
use crate::codec::{Message, MessageCodec};
use crate::error_state::{ErrorCode, ErrorState};
use crate::errors::{CodecError, TickMsgError};
use crate::profile::SessionProfile;
use crate::reactor::{ReactorHandle, ReadyEvent};
use bytes::{Buf, BytesMut};
use log::*;
use mio::net::TcpStream;
use mio::Token;
use std::fmt::{Display, Formatter};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// The message id type of the codec used by `H`.
pub type MessageId<H> = <<H as SessionHandler>::Codec as MessageCodec>::Id;

/// Per-session application state, plus the lifecycle hooks that fire for sessions carrying it.
///
/// Every hook has a default, so the smallest implementation only names the codec.
pub trait SessionHandler: Sized + 'static {
    type Codec: MessageCodec;

    /// Decide whether a freshly established connection is admitted. Rejected connections are closed without
    /// `on_opened` or `on_closed` firing and, on a server, without consuming a serial.
    fn check_open(_session: &mut Session<Self>) -> bool {
        true
    }

    fn on_opened(session: &mut Session<Self>) {
        match session.role() {
            Role::Server => info!("open connection from {}", session.remote_address()),
            Role::Client => info!("open connection to {}", session.remote_address()),
        }
    }

    /// Fires while the session is still registered with its owner.
    fn on_closing(session: &mut Session<Self>) {
        match session.role() {
            Role::Server => info!("close connection from {} ({})", session.remote_address(), session.error()),
            Role::Client => info!("close connection to {} ({})", session.remote_address(), session.error()),
        }
    }

    /// Fires after the session has been detached from its owner and its socket released.
    fn on_closed(_session: &mut Session<Self>) {}

    /// Called for messages with no registered handler. The default logs and carries on.
    fn on_unhandled_message(
        session: &mut Session<Self>,
        id: &MessageId<Self>,
        _payload: Option<&[u8]>,
    ) -> Result<bool, TickMsgError> {
        warn!("Unhandled message {id} from {}", session.remote_address());
        Ok(true)
    }

    /// Runs at the end of every successful session tick.
    fn on_tick(_session: &mut Session<Self>) -> Result<(), TickMsgError> {
        Ok(())
    }
}

/// Which side opened the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server.
    Server,
    /// Opened by a client.
    Client,
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server => write!(f, "S"),
            Role::Client => write!(f, "C"),
        }
    }
}

/// Identifies the server or client a session belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EndpointId(u64);

impl EndpointId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        EndpointId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for EndpointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "endpoint#{}", self.0)
    }
}

pub struct Session<H: SessionHandler> {
    stream: TcpStream,
    token: Token,
    remote_address: SocketAddr,
    role: Role,
    serial: Option<u64>,
    owner: Option<EndpointId>,
    profile: Rc<SessionProfile<H>>,
    clock: Rc<dyn Clock>,
    error: ErrorState,
    inbound: BytesMut,
    outbound: BytesMut,
    readable: bool,
    writable: bool,
    ready: bool,
    last_read_time: Instant,
    keep_alive_probes: u32,
    force_close_deadline: Option<Instant>,
    force_wait_full_timeout: bool,
    state: H,
}

impl<H: SessionHandler> Session<H> {
    pub(crate) fn new(
        stream: TcpStream,
        token: Token,
        remote_address: SocketAddr,
        role: Role,
        profile: Rc<SessionProfile<H>>,
        clock: Rc<dyn Clock>,
        state: H,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(!profile.nagle()) {
            warn!("Could not configure Nagle's algorithm for {remote_address}: {e}");
        }
        let now = clock.now();
        Self {
            stream,
            token,
            remote_address,
            role,
            serial: None,
            owner: None,
            profile,
            clock,
            error: ErrorState::new(),
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
            readable: false,
            writable: true,
            ready: true,
            last_read_time: now,
            keep_alive_probes: 0,
            force_close_deadline: None,
            force_wait_full_timeout: false,
            state,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The serial assigned by a server. Client sessions have none.
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    /// The endpoint this session is registered with. `None` once it has been closed.
    pub fn owner(&self) -> Option<EndpointId> {
        self.owner
    }

    pub fn error(&self) -> &ErrorState {
        &self.error
    }

    pub fn profile(&self) -> &Rc<SessionProfile<H>> {
        &self.profile
    }

    pub fn state(&self) -> &H {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut H {
        &mut self.state
    }

    /// Sessions start out ready. Clear the flag to hold broadcasts back, for instance until a login exchange has
    /// completed.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Bytes queued for sending.
    pub fn pending_output(&self) -> usize {
        self.outbound.len()
    }

    /// Bytes received but not yet consumed as complete frames.
    pub fn pending_input(&self) -> usize {
        self.inbound.len()
    }

    /// True once the session has failed or a force close has been requested. Sends are refused from then on.
    pub fn is_closing(&self) -> bool {
        self.error.has_error() || self.force_close_deadline.is_some()
    }

    /// Request that the session be closed.
    ///
    /// The session fails with a force-close error on the first tick after `timeout` has elapsed. Unless
    /// `wait_full_timeout` is set, it fails earlier, as soon as its outbound buffer has drained. Only the first
    /// request counts.
    pub fn force_close(&mut self, timeout: Duration, wait_full_timeout: bool) {
        if self.force_close_deadline.is_some() {
            return;
        }
        debug!("Force close requested for {} (linger {timeout:?})", self.remote_address);
        self.force_close_deadline = Some(self.clock.now() + timeout);
        self.force_wait_full_timeout = wait_full_timeout;
    }

    /// Encode a message and append its frame to the outbound buffer.
    ///
    /// Returns `Ok(false)` without queuing anything if the session has failed or is being force closed. A frame
    /// larger than the configured maximum (or than the length prefix can express) is a fault, and the buffer is
    /// left untouched.
    pub fn send(&mut self, id: &MessageId<H>, payload: Option<&[u8]>) -> Result<bool, TickMsgError> {
        if self.is_closing() {
            return Ok(false);
        }
        let codec = self.profile.codec();
        let body = codec
            .encode(id, payload)
            .map_err(|e| TickMsgError::EncodeMessage { msg_id: id.to_string(), reason: e.to_string() })?;
        let prefix = codec.length_prefix();
        let size = prefix.size() + body.len();
        let max_size = self.profile.limits().max_message_size;
        let mut header = Vec::with_capacity(prefix.size());
        if size > max_size || !prefix.write(size as u64, &mut header) {
            let prefix_max = usize::try_from(prefix.max_value()).unwrap_or(usize::MAX);
            return Err(TickMsgError::MessageSizeOverflow {
                msg_id: id.to_string(),
                size,
                max_size: max_size.min(prefix_max),
            });
        }
        self.outbound.reserve(size);
        self.outbound.extend_from_slice(&header);
        self.outbound.extend_from_slice(&body);
        trace!("Queued message {id} ({size} bytes) for {}", self.remote_address);
        Ok(true)
    }

    /// Advance the session by one step. Returns `Ok(false)` if the session has failed (now or earlier).
    pub fn tick(&mut self) -> Result<bool, TickMsgError> {
        if !self.error.has_error() {
            self.check_force_close();
        }
        if !self.error.has_error() {
            self.check_keep_alive()?;
        }
        if !self.error.has_error() {
            self.handle_messages()?;
        }
        if !self.error.has_error() {
            H::on_tick(self)?;
        }
        Ok(!self.error.has_error())
    }

    fn check_force_close(&mut self) {
        let Some(deadline) = self.force_close_deadline else {
            return;
        };
        let drained = !self.force_wait_full_timeout && self.outbound.is_empty();
        if drained || self.clock.now() >= deadline {
            self.error.set_error(ErrorCode::ForceClose);
        }
    }

    fn check_keep_alive(&mut self) -> Result<(), TickMsgError> {
        let profile = Rc::clone(&self.profile);
        let Some(params) = profile.keep_alive() else {
            return Ok(());
        };
        if self.keep_alive_probes > params.probes {
            return Ok(());
        }
        let threshold = params.idle_time + params.interval * self.keep_alive_probes;
        let idle = self.clock.now().saturating_duration_since(self.last_read_time);
        if idle <= threshold {
            return Ok(());
        }
        self.keep_alive_probes += 1;
        if self.keep_alive_probes > params.probes {
            error!("Keep-alive timeout for {} after {idle:?} of silence", self.remote_address);
            self.error.set_error(ErrorCode::KeepAliveTimeout);
        } else {
            debug!("Keep-alive probe {} to {}", self.keep_alive_probes, self.remote_address);
            self.send(&params.ping_id, None)?;
        }
        Ok(())
    }

    fn handle_messages(&mut self) -> Result<(), TickMsgError> {
        loop {
            let msg = match self.unpack() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(code) => {
                    self.error.set_error(code);
                    break;
                }
            };
            let handled = self.dispatch(msg)?;
            if self.error.has_error() {
                break;
            }
            if !handled {
                self.error.set_error(ErrorCode::HandleMessage);
                break;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, msg: Message<MessageId<H>>) -> Result<bool, TickMsgError> {
        let Message { id, payload } = msg;
        // Hold our own reference so the handler is free to borrow the session mutably.
        let handler = self.profile.table().get(&id);
        let handled = match handler {
            Some(f) => f(self, &id, payload.as_deref())?,
            None => H::on_unhandled_message(self, &id, payload.as_deref())?,
        };
        if !handled {
            error!("Message {id} from {} could not be handled", self.remote_address);
        }
        Ok(handled)
    }

    /// Extract the next complete frame from the inbound buffer.
    fn unpack(&mut self) -> Result<Option<Message<MessageId<H>>>, ErrorCode> {
        let codec = self.profile.codec();
        let prefix = codec.length_prefix();
        let Some(size) = prefix.read(&self.inbound) else {
            return Ok(None);
        };
        let max_size = self.profile.limits().max_message_size;
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size < prefix.size() || size > max_size {
            error!("Invalid message size from {}: size={size} max_size={max_size}", self.remote_address);
            return Err(ErrorCode::UnpackInvalidMessageSize);
        }
        if self.inbound.len() < size {
            return Ok(None);
        }
        let msg = match codec.decode(&self.inbound[prefix.size()..size]) {
            Ok(msg) => msg,
            Err(CodecError::Format(reason)) => {
                error!("Invalid message format from {}: {reason}", self.remote_address);
                return Err(ErrorCode::RecvMessageFormat);
            }
            Err(e) => {
                error!("Could not decode message from {}: {e}", self.remote_address);
                return Err(ErrorCode::UnpackDecodeMessage);
            }
        };
        self.inbound.advance(size);
        Ok(Some(msg))
    }

    /// Append raw bytes to the inbound buffer as if they had been read from the socket.
    pub(crate) fn ingest(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.inbound.extend_from_slice(data);
        self.mark_received();
    }

    fn mark_received(&mut self) {
        self.last_read_time = self.clock.now();
        self.keep_alive_probes = 0;
    }

    /// Record the readiness carried by `event`. The actual I/O happens in [`Self::service_io`].
    pub(crate) fn handle_ready(&mut self, event: &ReadyEvent) {
        if event.readable || event.read_closed || event.error {
            self.readable = true;
        }
        if event.writable || event.write_closed {
            self.writable = true;
        }
        if event.error {
            match self.stream.take_error() {
                Ok(Some(e)) | Err(e) => {
                    debug!("Socket error on {}: {e}", self.remote_address);
                    self.error.set_io_error(ErrorCode::RemoteClosed, &e);
                }
                Ok(None) => {}
            }
        }
    }

    /// Perform at most one bounded read and one bounded write.
    pub(crate) fn service_io(&mut self) {
        if self.error.has_error() {
            return;
        }
        if self.readable {
            self.read_chunk();
        }
        if !self.error.has_error() && self.writable && !self.outbound.is_empty() {
            self.write_chunk();
        }
    }

    fn read_chunk(&mut self) {
        let chunk = self.profile.limits().max_recv_chunk.max(1);
        let start = self.inbound.len();
        self.inbound.resize(start + chunk, 0);
        let result = self.stream.read(&mut self.inbound[start..]);
        match result {
            Ok(0) => {
                self.inbound.truncate(start);
                self.readable = false;
                debug!("{} closed the connection", self.remote_address);
                self.error.set_error(ErrorCode::RemoteClosed);
            }
            Ok(n) => {
                self.inbound.truncate(start + n);
                trace!("Read {n} bytes from {}", self.remote_address);
                self.mark_received();
            }
            Err(e) => {
                self.inbound.truncate(start);
                match e.kind() {
                    io::ErrorKind::WouldBlock => self.readable = false,
                    io::ErrorKind::Interrupted => {}
                    _ => {
                        debug!("Read from {} failed: {e}", self.remote_address);
                        self.error.set_io_error(ErrorCode::RemoteClosed, &e);
                    }
                }
            }
        }
    }

    fn write_chunk(&mut self) {
        let chunk = self.profile.limits().max_send_chunk.max(1).min(self.outbound.len());
        match self.stream.write(&self.outbound[..chunk]) {
            Ok(0) => {
                self.writable = false;
            }
            Ok(n) => {
                trace!("Wrote {n} bytes to {}", self.remote_address);
                self.outbound.advance(n);
            }
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock => self.writable = false,
                io::ErrorKind::Interrupted => {}
                _ => {
                    debug!("Write to {} failed: {e}", self.remote_address);
                    self.error.set_io_error(ErrorCode::RemoteClosed, &e);
                }
            },
        }
    }

    pub(crate) fn attach(&mut self, owner: EndpointId, serial: Option<u64>) {
        self.owner = Some(owner);
        self.serial = serial;
    }

    pub(crate) fn detach(&mut self) {
        self.owner = None;
    }

    /// Deregister the socket and shut it down. Pending output is discarded.
    pub(crate) fn release(&mut self, reactor: &ReactorHandle) {
        if let Err(e) = reactor.deregister(&mut self.stream) {
            debug!("Could not deregister {}: {e}", self.remote_address);
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!("Shutdown of {} failed: {e}", self.remote_address);
        }
    }
}

/// Run the closing sequence for a session its owner has already taken out of its session table: detach, release
/// the socket and fire `on_closed`. `on_closing` must have fired before the session was removed.
pub(crate) fn finish_close<H: SessionHandler>(mut session: Session<H>, reactor: &ReactorHandle) {
    session.detach();
    session.release(reactor);
    H::on_closed(&mut session);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::{FixedIdCodec, TupleCodec};
    use crate::profile::{KeepAliveParams, SessionLimits, SessionProfileBuilder};
    use crate::reactor::Reactor;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(String, Option<Vec<u8>>)>,
    }

    impl SessionHandler for Recorder {
        type Codec = TupleCodec<String>;
    }

    fn record(session: &mut Session<Recorder>, id: &String, payload: Option<&[u8]>) {
        session.state_mut().seen.push((id.clone(), payload.map(|p| p.to_vec())));
    }

    /// A connected pair of sockets. The first is wrapped in a session, the second is the plain peer.
    fn loopback() -> (TcpStream, std::net::TcpStream, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let ours = std::net::TcpStream::connect(addr).unwrap();
        let (theirs, _) = listener.accept().unwrap();
        ours.set_nonblocking(true).unwrap();
        (TcpStream::from_std(ours), theirs, addr)
    }

    /// A session on one end of a loopback pair. The peer is returned so it stays open for the test's duration.
    fn session_with<H: SessionHandler>(
        profile: Rc<SessionProfile<H>>,
        clock: Rc<dyn Clock>,
        state: H,
    ) -> (Session<H>, std::net::TcpStream) {
        let (stream, peer, addr) = loopback();
        (Session::new(stream, Token(1), addr, Role::Client, profile, clock, state), peer)
    }

    fn recorder_profile() -> Rc<SessionProfile<Recorder>> {
        SessionProfileBuilder::new(TupleCodec::new()).on("Chat".into(), record).build().unwrap()
    }

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut data = ((body.len() + 2) as u16).to_le_bytes().to_vec();
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn split_frames_are_reassembled() {
        env_logger::try_init().ok();
        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        let data = frame(br#"["Chat","6869"]"#);
        session.ingest(&data[..1]);
        assert!(session.tick().unwrap());
        assert!(session.state().seen.is_empty());
        session.ingest(&data[1..5]);
        assert!(session.tick().unwrap());
        assert!(session.state().seen.is_empty());
        session.ingest(&data[5..]);
        assert!(session.tick().unwrap());
        assert_eq!(session.state().seen, vec![("Chat".to_string(), Some(b"hi".to_vec()))]);
        assert_eq!(session.pending_input(), 0);
    }

    #[test]
    fn several_frames_in_one_read() {
        env_logger::try_init().ok();
        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        let mut data = frame(br#"["Chat",null]"#);
        data.extend(frame(br#"["Chat","01"]"#));
        data.extend(&frame(br#"["Chat","02"]"#)[..3]);
        session.ingest(&data);
        assert!(session.tick().unwrap());
        assert_eq!(session.state().seen.len(), 2);
        assert_eq!(session.state().seen[0].1, None);
        assert_eq!(session.pending_input(), 3);
    }

    #[test]
    fn invalid_frame_sizes_fail_the_session() {
        env_logger::try_init().ok();
        for header in [[1u8, 0], [0xff, 0xff]] {
            let limits = SessionLimits { max_message_size: 1024, ..Default::default() };
            let profile =
                SessionProfileBuilder::<Recorder>::new(TupleCodec::new()).with_limits(limits).build().unwrap();
            let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Recorder::default());
            session.ingest(&header);
            assert!(!session.tick().unwrap());
            assert_eq!(session.error().code(), ErrorCode::UnpackInvalidMessageSize);
        }
    }

    #[test]
    fn undecodable_and_malformed_bodies() {
        env_logger::try_init().ok();
        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        session.ingest(&frame(b"\x80garbage"));
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::UnpackDecodeMessage);

        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        session.ingest(&frame(br#"["Chat"]"#));
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::RecvMessageFormat);
        // Failed sessions stay failed
        assert!(!session.tick().unwrap());
        assert!(!session.send(&"Chat".to_string(), None).unwrap());
    }

    #[test]
    fn rejected_messages_fail_the_session() {
        env_logger::try_init().ok();
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new())
            .on("Bad".into(), |_, _, _| false)
            .on("Chat".into(), record)
            .build()
            .unwrap();
        let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Recorder::default());
        let mut data = frame(br#"["Bad",null]"#);
        data.extend(frame(br#"["Chat",null]"#));
        session.ingest(&data);
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::HandleMessage);
        // Dispatch stops at the failed message
        assert!(session.state().seen.is_empty());
    }

    #[test]
    fn unhandled_messages_are_not_fatal() {
        env_logger::try_init().ok();
        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        let mut data = frame(br#"["Nobody",null]"#);
        data.extend(frame(br#"["Chat",null]"#));
        session.ingest(&data);
        assert!(session.tick().unwrap());
        assert_eq!(session.state().seen.len(), 1);
    }

    #[test]
    fn handler_faults_propagate() {
        env_logger::try_init().ok();
        let limits = SessionLimits { max_message_size: 32, ..Default::default() };
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new())
            .with_limits(limits)
            .on("Echo".into(), |s: &mut Session<Recorder>, _: &String, p: Option<&[u8]>| {
                s.send(&"EchoEchoEcho".to_string(), p)
            })
            .build()
            .unwrap();
        let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Recorder::default());
        session.ingest(&frame(br#"["Echo","0102"]"#));
        assert!(session.tick().unwrap());
        assert!(session.pending_output() > 0);
        session.ingest(&frame(br#"["Echo","0102030405060708"]"#));
        let err = session.tick().unwrap_err();
        assert!(matches!(err, TickMsgError::MessageSizeOverflow { max_size: 32, .. }));
    }

    #[test]
    fn oversized_sends_leave_the_buffer_alone() {
        env_logger::try_init().ok();
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new()).build().unwrap();
        let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Recorder::default());
        assert!(session.send(&"Chat".to_string(), Some(b"hello")).unwrap());
        let queued = session.pending_output();
        assert_eq!(queued, 2 + br#"["Chat","68656c6c6f"]"#.len());
        let big = vec![0u8; 9000];
        let err = session.send(&"Chat".to_string(), Some(&big)).unwrap_err();
        match err {
            TickMsgError::MessageSizeOverflow { msg_id, size, max_size } => {
                assert_eq!(msg_id, "Chat");
                assert!(size > 16384);
                assert_eq!(max_size, 16384);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(session.pending_output(), queued);
    }

    #[test]
    fn prefix_width_caps_the_frame_size() {
        use crate::codec::{Endian, IntWidth, WireInt};
        struct Small;
        impl SessionHandler for Small {
            type Codec = FixedIdCodec;
        }
        let codec = FixedIdCodec::new(WireInt::new(IntWidth::U8, Endian::Little), WireInt::default());
        let profile = SessionProfileBuilder::<Small>::new(codec).build().unwrap();
        let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Small);
        assert!(session.send(&1, Some(&[0u8; 252])).unwrap());
        let err = session.send(&1, Some(&[0u8; 253])).unwrap_err();
        assert!(matches!(err, TickMsgError::MessageSizeOverflow { size: 256, max_size: 255, .. }));
    }

    #[test]
    fn keep_alive_probes_then_times_out() {
        env_logger::try_init().ok();
        let clock = Rc::new(ManualClock::new());
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new())
            .with_keep_alive(KeepAliveParams::default())
            .build()
            .unwrap();
        let (mut session, _peer) = session_with(profile, clock.clone(), Recorder::default());
        let ping_size = frame(br#"["keep_alive_ping",null]"#).len();

        clock.advance(Duration::from_secs(30));
        assert!(session.tick().unwrap());
        assert_eq!(session.pending_output(), 0, "no probe until the idle time has strictly passed");

        for probe in 1..=3 {
            clock.advance(if probe == 1 { Duration::from_millis(1) } else { Duration::from_secs(10) });
            assert!(session.tick().unwrap());
            assert_eq!(session.pending_output(), probe * ping_size);
            // Only one probe per interval
            assert!(session.tick().unwrap());
            assert_eq!(session.pending_output(), probe * ping_size);
        }

        clock.advance(Duration::from_secs(10));
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::KeepAliveTimeout);
    }

    #[test]
    fn traffic_resets_keep_alive() {
        env_logger::try_init().ok();
        let clock = Rc::new(ManualClock::new());
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new())
            .with_keep_alive(KeepAliveParams::default())
            .build()
            .unwrap();
        let (mut session, _peer) = session_with(profile, clock.clone(), Recorder::default());
        clock.advance(Duration::from_millis(50_001));
        assert!(session.tick().unwrap());
        assert!(session.pending_output() > 0);
        session.ingest(&frame(br#"["keep_alive_pong",null]"#));
        assert!(session.tick().unwrap());
        clock.advance(Duration::from_secs(59));
        let before = session.pending_output();
        assert!(session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::Ok);
        assert!(session.pending_output() > before, "probing restarted after the idle time");
    }

    #[test]
    fn pings_are_answered() {
        env_logger::try_init().ok();
        let profile = SessionProfileBuilder::<Recorder>::new(TupleCodec::new())
            .with_keep_alive(KeepAliveParams::default())
            .build()
            .unwrap();
        let (mut session, _peer) = session_with(profile, Rc::new(ManualClock::new()), Recorder::default());
        session.ingest(&frame(br#"["keep_alive_ping",null]"#));
        assert!(session.tick().unwrap());
        assert_eq!(session.pending_output(), frame(br#"["keep_alive_pong",null]"#).len());
    }

    #[test]
    fn force_close_after_drain() {
        env_logger::try_init().ok();
        let clock = Rc::new(ManualClock::new());
        let (mut session, _peer) = session_with(recorder_profile(), clock.clone(), Recorder::default());
        session.send(&"Chat".to_string(), None).unwrap();
        session.force_close(Duration::from_secs(5), false);
        assert!(session.is_closing());
        assert!(!session.send(&"Chat".to_string(), None).unwrap());
        // Output still pending: the session lingers
        assert!(session.tick().unwrap());
        session.service_io();
        assert_eq!(session.pending_output(), 0);
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::ForceClose);
    }

    #[test]
    fn force_close_waits_for_the_deadline() {
        env_logger::try_init().ok();
        let clock = Rc::new(ManualClock::new());
        let (mut session, _peer) = session_with(recorder_profile(), clock.clone(), Recorder::default());
        session.force_close(Duration::from_secs(5), true);
        assert!(session.tick().unwrap());
        clock.advance(Duration::from_secs(4));
        assert!(session.tick().unwrap());
        clock.advance(Duration::from_secs(1));
        assert!(!session.tick().unwrap());
        assert_eq!(session.error().code(), ErrorCode::ForceClose);
    }

    #[test]
    fn zero_linger_closes_on_the_next_tick() {
        let (mut session, _peer) = session_with(recorder_profile(), Rc::new(ManualClock::new()), Recorder::default());
        session.send(&"Chat".to_string(), None).unwrap();
        session.force_close(Duration::ZERO, true);
        assert!(!session.tick().unwrap());
    }

    #[test]
    fn bytes_flow_over_the_socket() {
        env_logger::try_init().ok();
        let reactor = Reactor::new().unwrap();
        let (mut stream, mut peer, addr) = loopback();
        let token = reactor.handle().register(&mut stream).unwrap();
        let clock = Rc::new(crate::clock::SystemClock);
        let profile = recorder_profile();
        let mut session = Session::new(stream, token, addr, Role::Client, profile, clock, Recorder::default());

        session.send(&"Chat".to_string(), Some(b"up")).unwrap();
        session.service_io();
        let mut buf = vec![0u8; frame(br#"["Chat","7570"]"#).len()];
        io::Read::read_exact(&mut peer, &mut buf).unwrap();
        assert_eq!(buf, frame(br#"["Chat","7570"]"#));

        io::Write::write_all(&mut peer, &frame(br#"["Chat","646f776e"]"#)).unwrap();
        for _ in 0..1000 {
            session.handle_ready(&ReadyEvent { token, readable: true, ..Default::default() });
            session.service_io();
            session.tick().unwrap();
            if !session.state().seen.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(session.state().seen[0].1.as_deref(), Some(&b"down"[..]));

        drop(peer);
        for _ in 0..1000 {
            session.handle_ready(&ReadyEvent { token, readable: true, read_closed: true, ..Default::default() });
            session.service_io();
            if session.error().has_error() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(session.error().code(), ErrorCode::RemoteClosed);
        session.release(reactor.handle());
    }
}
