//! Single-connection client.
//!
//! A [`Client`] makes exactly one connection attempt when started. If the attempt fails, times out or the session
//! later fails, the client's error state says why and its tick reports failure; it never reconnects. See
//! [`crate::ReconnectingClient`] for the variant that keeps trying.

use crate::clock::{Clock, SystemClock};
use crate::connector::{classify, ConnectProgress, PendingConnect};
use crate::error_state::{ErrorCode, ErrorState};
use crate::errors::TickMsgError;
use crate::profile::SessionProfile;
use crate::reactor::{ReactorHandle, ReadyEvent};
use crate::scheduler::Runner;
use crate::server::SessionFactory;
use crate::session::{finish_close, EndpointId, Role, Session, SessionHandler};
use log::*;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Client<H: SessionHandler> {
    id: EndpointId,
    profile: Rc<SessionProfile<H>>,
    factory: SessionFactory<H>,
    clock: Rc<dyn Clock>,
    connect_address: Option<SocketAddr>,
    connect_timeout: Duration,
    reactor: Option<ReactorHandle>,
    pending: Option<PendingConnect>,
    connect_deadline: Option<Instant>,
    session: Option<Session<H>>,
    error: ErrorState,
    stop_only_self: bool,
}

impl<H: SessionHandler + Default> Client<H> {
    pub fn with_default_state(profile: Rc<SessionProfile<H>>) -> Self {
        Self::new(profile, |_| H::default())
    }
}

impl<H: SessionHandler> Client<H> {
    pub fn new<F>(profile: Rc<SessionProfile<H>>, factory: F) -> Self
    where
        F: FnMut(&SocketAddr) -> H + 'static,
    {
        Self {
            id: EndpointId::next(),
            profile,
            factory: Box::new(factory),
            clock: Rc::new(SystemClock),
            connect_address: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reactor: None,
            pending: None,
            connect_deadline: None,
            session: None,
            error: ErrorState::new(),
            stop_only_self: false,
        }
    }

    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn set_connect_address(&mut self, address: SocketAddr) {
        self.connect_address = Some(address);
    }

    pub fn connect_address(&self) -> Option<SocketAddr> {
        self.connect_address
    }

    pub fn set_connect_timeout(&mut self, timeout: Duration) {
        self.connect_timeout = timeout;
    }

    pub fn set_stop_only_self_on_error(&mut self, stop_only_self: bool) {
        self.stop_only_self = stop_only_self;
    }

    pub fn error(&self) -> &ErrorState {
        &self.error
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session<H>> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut Session<H>> {
        self.session.as_mut()
    }

    /// The session, but only once it has been marked ready.
    pub fn ready_session(&mut self) -> Option<&mut Session<H>> {
        self.session.as_mut().filter(|s| s.is_ready())
    }

    fn open_session(&mut self, pending: PendingConnect) {
        let Some(reactor) = self.reactor.clone() else {
            return;
        };
        let (stream, token, address) = pending.into_parts();
        let state = (self.factory)(&address);
        let profile = Rc::clone(&self.profile);
        let mut session = Session::new(stream, token, address, Role::Client, profile, Rc::clone(&self.clock), state);
        self.connect_deadline = None;
        if !H::check_open(&mut session) {
            debug!("Connection to {address} was rejected");
            session.release(&reactor);
            self.error.set_error(ErrorCode::ConnectOpen);
            return;
        }
        session.attach(self.id, None);
        let session = self.session.insert(session);
        H::on_opened(session);
    }

    fn close_session(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        H::on_closing(session);
        if let (Some(session), Some(reactor)) = (self.session.take(), &self.reactor) {
            finish_close(session, reactor);
        }
    }
}

impl<H: SessionHandler> Runner for Client<H> {
    fn start(&mut self, reactor: &ReactorHandle) -> Result<(), TickMsgError> {
        if self.is_started() {
            return Err(TickMsgError::AlreadyStarted);
        }
        let address = self.connect_address.ok_or(TickMsgError::MissingAddress("client"))?;
        self.error.clear();
        self.reactor = Some(reactor.clone());
        self.connect_deadline = Some(self.clock.now() + self.connect_timeout);
        match PendingConnect::initiate(reactor, address) {
            Ok(pending) => self.pending = Some(pending),
            Err(e) => {
                warn!("Could not connect to {address}: {e}");
                self.error.copy_from(&classify(&e));
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if !self.is_started() {
            return;
        }
        self.close_session();
        if let (Some(pending), Some(reactor)) = (self.pending.take(), &self.reactor) {
            pending.abandon(reactor);
        }
        self.reactor = None;
        self.connect_deadline = None;
        self.error.clear();
    }

    fn is_started(&self) -> bool {
        self.reactor.is_some()
    }

    fn dispatch_events(&mut self, events: &[ReadyEvent]) {
        for event in events {
            if let Some(pending) = &self.pending {
                if pending.token() == event.token {
                    match pending.poll(event) {
                        ConnectProgress::Pending => {}
                        ConnectProgress::Connected => {
                            if let Some(pending) = self.pending.take() {
                                self.open_session(pending);
                            }
                        }
                        ConnectProgress::Failed(failure) => {
                            warn!("Could not connect to {:?} ({failure})", self.connect_address);
                            self.error.copy_from(&failure);
                            if let (Some(pending), Some(reactor)) = (self.pending.take(), &self.reactor) {
                                pending.abandon(reactor);
                            }
                        }
                    }
                    continue;
                }
            }
            if let Some(session) = self.session.as_mut().filter(|s| s.token() == event.token) {
                session.handle_ready(event);
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.service_io();
        }
    }

    fn tick(&mut self) -> Result<bool, TickMsgError> {
        if !self.is_started() || self.error.has_error() {
            return Ok(false);
        }
        let Some(session) = self.session.as_mut() else {
            if self.connect_deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                warn!("Timed out connecting to {:?}", self.connect_address);
                self.error.set_error(ErrorCode::ConnectTimeout);
                return Ok(false);
            }
            return Ok(true);
        };
        if !session.error().has_error() {
            session.tick()?;
        }
        if session.error().has_error() {
            self.error.copy_from(session.error());
            return Ok(false);
        }
        Ok(true)
    }

    fn stop_only_self_on_error(&self) -> bool {
        self.stop_only_self
    }

    fn describe(&self) -> String {
        match self.connect_address {
            Some(address) => format!("client to {address} ({})", self.error),
            None => format!("client ({})", self.error),
        }
    }
}
