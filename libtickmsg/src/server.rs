//! Listening endpoint.
//!
//! A [`Server`] accepts connections, wraps each in a [`Session`] and keeps them in a table keyed by a serial number
//! that is assigned in accept order, starting from zero. Serials are never reused while the server lives.

use crate::clock::{Clock, SystemClock};
use crate::error_state::{ErrorCode, ErrorState};
use crate::errors::TickMsgError;
use crate::profile::SessionProfile;
use crate::reactor::{ReactorHandle, ReadyEvent};
use crate::scheduler::Runner;
use crate::session::{finish_close, EndpointId, MessageId, Role, Session, SessionHandler};
use log::*;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

/// Produces the application state for a newly accepted connection.
pub type SessionFactory<H> = Box<dyn FnMut(&SocketAddr) -> H>;

struct Listener {
    socket: TcpListener,
    token: Token,
    reactor: ReactorHandle,
}

pub struct Server<H: SessionHandler> {
    id: EndpointId,
    profile: Rc<SessionProfile<H>>,
    factory: SessionFactory<H>,
    clock: Rc<dyn Clock>,
    listen_address: Option<SocketAddr>,
    listener: Option<Listener>,
    sessions: BTreeMap<u64, Session<H>>,
    tokens: HashMap<Token, u64>,
    next_serial: u64,
    error: ErrorState,
    stop_only_self: bool,
}

impl<H: SessionHandler + Default> Server<H> {
    /// A server whose sessions start with `H::default()` as their state.
    pub fn with_default_state(profile: Rc<SessionProfile<H>>) -> Self {
        Self::new(profile, |_| H::default())
    }
}

impl<H: SessionHandler> Server<H> {
    pub fn new<F>(profile: Rc<SessionProfile<H>>, factory: F) -> Self
    where
        F: FnMut(&SocketAddr) -> H + 'static,
    {
        Self {
            id: EndpointId::next(),
            profile,
            factory: Box::new(factory),
            clock: Rc::new(SystemClock),
            listen_address: None,
            listener: None,
            sessions: BTreeMap::new(),
            tokens: HashMap::new(),
            next_serial: 0,
            error: ErrorState::new(),
            stop_only_self: false,
        }
    }

    /// Replace the time source handed to sessions. Must be called before the server is started.
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn set_listen_address(&mut self, address: SocketAddr) {
        self.listen_address = Some(address);
    }

    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address
    }

    /// The address actually bound. Differs from the listen address when binding to port 0.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.socket.local_addr().ok())
    }

    pub fn set_stop_only_self_on_error(&mut self, stop_only_self: bool) {
        self.stop_only_self = stop_only_self;
    }

    pub fn error(&self) -> &ErrorState {
        &self.error
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn find_session(&self, serial: u64) -> Option<&Session<H>> {
        self.sessions.get(&serial)
    }

    pub fn find_session_mut(&mut self, serial: u64) -> Option<&mut Session<H>> {
        self.sessions.get_mut(&serial)
    }

    /// All open sessions, in the order they were accepted.
    pub fn sessions(&self) -> impl Iterator<Item = &Session<H>> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session<H>> {
        self.sessions.values_mut()
    }

    pub fn ready_sessions(&self) -> impl Iterator<Item = &Session<H>> {
        self.sessions.values().filter(|s| s.is_ready())
    }

    /// Queue a message on every ready session. Returns the number of sessions that accepted it.
    pub fn broadcast(&mut self, id: &MessageId<H>, payload: Option<&[u8]>) -> Result<usize, TickMsgError> {
        let mut sent = 0;
        for session in self.sessions.values_mut().filter(|s| s.is_ready()) {
            if session.send(id, payload)? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Close the session with the given serial right away. Returns false if there is no such session.
    pub fn close_session(&mut self, serial: u64) -> bool {
        let Some(session) = self.sessions.get_mut(&serial) else {
            return false;
        };
        H::on_closing(session);
        let Some(session) = self.sessions.remove(&serial) else {
            return false;
        };
        self.tokens.remove(&session.token());
        match &self.listener {
            Some(listener) => finish_close(session, &listener.reactor),
            None => warn!("Session {serial} outlived its listener"),
        }
        true
    }

    fn accept_pending(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.socket.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, address)) => self.open_session(stream, address),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted) => {}
                Err(e) => {
                    error!("Could not accept connections: {e}");
                    self.error.set_io_error(ErrorCode::Select, &e);
                    break;
                }
            }
        }
    }

    fn open_session(&mut self, mut stream: TcpStream, address: SocketAddr) {
        let Some(reactor) = self.listener.as_ref().map(|l| l.reactor.clone()) else {
            return;
        };
        let token = match reactor.register(&mut stream) {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not register connection from {address}: {e}");
                return;
            }
        };
        let state = (self.factory)(&address);
        let profile = Rc::clone(&self.profile);
        let mut session = Session::new(stream, token, address, Role::Server, profile, Rc::clone(&self.clock), state);
        if !H::check_open(&mut session) {
            debug!("Connection from {address} was rejected");
            session.release(&reactor);
            return;
        }
        let serial = self.next_serial;
        self.next_serial += 1;
        session.attach(self.id, Some(serial));
        self.tokens.insert(token, serial);
        let session = self.sessions.entry(serial).or_insert(session);
        H::on_opened(session);
    }
}

impl<H: SessionHandler> Runner for Server<H> {
    fn start(&mut self, reactor: &ReactorHandle) -> Result<(), TickMsgError> {
        if self.is_started() {
            return Err(TickMsgError::AlreadyStarted);
        }
        let address = self.listen_address.ok_or(TickMsgError::MissingAddress("server"))?;
        let mut socket = TcpListener::bind(address)?;
        let token = reactor.register_with(&mut socket, Interest::READABLE)?;
        info!("Listening on {}", socket.local_addr()?);
        self.error.clear();
        self.listener = Some(Listener { socket, token, reactor: reactor.clone() });
        Ok(())
    }

    fn stop(&mut self) {
        if !self.is_started() {
            return;
        }
        let serials = self.sessions.keys().copied().collect::<Vec<_>>();
        for serial in serials {
            self.close_session(serial);
        }
        if let Some(mut listener) = self.listener.take() {
            if let Err(e) = listener.reactor.deregister(&mut listener.socket) {
                debug!("Could not deregister listener: {e}");
            }
        }
        self.error.clear();
        info!("Server stopped");
    }

    fn is_started(&self) -> bool {
        self.listener.is_some()
    }

    fn dispatch_events(&mut self, events: &[ReadyEvent]) {
        let Some(listener_token) = self.listener.as_ref().map(|l| l.token) else {
            return;
        };
        for event in events {
            if event.token == listener_token {
                if event.error {
                    error!("Listener socket failed");
                    self.error.set_error(ErrorCode::Select);
                } else if event.readable {
                    self.accept_pending();
                }
            } else if let Some(serial) = self.tokens.get(&event.token) {
                if let Some(session) = self.sessions.get_mut(serial) {
                    session.handle_ready(event);
                }
            }
        }
        for session in self.sessions.values_mut() {
            session.service_io();
        }
    }

    /// Sweep failed sessions, then tick the survivors. A session tick fault aborts the pass and is returned.
    fn tick(&mut self) -> Result<bool, TickMsgError> {
        if !self.is_started() || self.error.has_error() {
            return Ok(false);
        }
        let failed = self.sessions.iter().filter(|(_, s)| s.error().has_error()).map(|(k, _)| *k).collect::<Vec<_>>();
        for serial in failed {
            self.close_session(serial);
        }
        for session in self.sessions.values_mut() {
            session.tick()?;
        }
        Ok(true)
    }

    fn stop_only_self_on_error(&self) -> bool {
        self.stop_only_self
    }

    fn describe(&self) -> String {
        match self.listen_address {
            Some(address) => format!("server {address} ({})", self.error),
            None => format!("server ({})", self.error),
        }
    }
}
