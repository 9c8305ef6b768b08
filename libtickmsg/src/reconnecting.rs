//! A client that never gives up.
//!
//! [`ReconnectingClient`] cycles through three phases: waiting for the next attempt, connecting, and connected.
//! Whenever an attempt fails, times out or an established session fails, the session is closed and the next attempt
//! is scheduled `retry_interval` later. Failures are kept in [`ReconnectingClient::last_failure`] for inspection, but
//! the client itself never reports a failed tick.

use crate::client::DEFAULT_CONNECT_TIMEOUT;
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

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Where a [`ReconnectingClient`] is in its connection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectPhase {
    Waiting { next_attempt: Instant },
    Connecting { deadline: Instant },
    Connected,
}

enum Phase<H: SessionHandler> {
    Waiting { next_attempt: Instant },
    Connecting { pending: PendingConnect, deadline: Instant },
    Connected(Session<H>),
}

pub struct ReconnectingClient<H: SessionHandler> {
    id: EndpointId,
    profile: Rc<SessionProfile<H>>,
    factory: SessionFactory<H>,
    clock: Rc<dyn Clock>,
    connect_address: Option<SocketAddr>,
    connect_timeout: Duration,
    retry_interval: Duration,
    reactor: Option<ReactorHandle>,
    phase: Option<Phase<H>>,
    last_failure: ErrorState,
    attempts: u64,
}

impl<H: SessionHandler + Default> ReconnectingClient<H> {
    pub fn with_default_state(profile: Rc<SessionProfile<H>>) -> Self {
        Self::new(profile, |_| H::default())
    }
}

impl<H: SessionHandler> ReconnectingClient<H> {
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
            retry_interval: DEFAULT_RETRY_INTERVAL,
            reactor: None,
            phase: None,
            last_failure: ErrorState::new(),
            attempts: 0,
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

    /// Delay between a failure and the next attempt. Zero retries on the very next tick.
    pub fn set_retry_interval(&mut self, interval: Duration) {
        self.retry_interval = interval;
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// The reason the most recent attempt or session failed. Cleared when the client is stopped.
    pub fn last_failure(&self) -> &ErrorState {
        &self.last_failure
    }

    /// Number of connection attempts made since the client was created.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// The current phase, or `None` when stopped.
    pub fn phase(&self) -> Option<ConnectPhase> {
        self.phase.as_ref().map(|phase| match phase {
            Phase::Waiting { next_attempt } => ConnectPhase::Waiting { next_attempt: *next_attempt },
            Phase::Connecting { deadline, .. } => ConnectPhase::Connecting { deadline: *deadline },
            Phase::Connected(_) => ConnectPhase::Connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.phase, Some(Phase::Connected(_)))
    }

    pub fn session(&self) -> Option<&Session<H>> {
        match &self.phase {
            Some(Phase::Connected(session)) => Some(session),
            _ => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Session<H>> {
        match &mut self.phase {
            Some(Phase::Connected(session)) => Some(session),
            _ => None,
        }
    }

    pub fn ready_session(&mut self) -> Option<&mut Session<H>> {
        self.session_mut().filter(|s| s.is_ready())
    }

    fn begin_attempt(&mut self) {
        let (Some(address), Some(reactor)) = (self.connect_address, self.reactor.as_ref()) else {
            return;
        };
        self.attempts += 1;
        debug!("Connection attempt {} to {address}", self.attempts);
        match PendingConnect::initiate(reactor, address) {
            Ok(pending) => {
                let deadline = self.clock.now() + self.connect_timeout;
                self.phase = Some(Phase::Connecting { pending, deadline });
            }
            Err(e) => self.schedule_retry(classify(&e)),
        }
    }

    fn schedule_retry(&mut self, failure: ErrorState) {
        let next_attempt = self.clock.now() + self.retry_interval;
        warn!(
            "Connection to {:?} failed ({failure}). Retrying in {:?}",
            self.connect_address, self.retry_interval
        );
        self.last_failure = failure;
        self.phase = Some(Phase::Waiting { next_attempt });
    }

    fn open_session(&mut self, pending: PendingConnect) {
        let Some(reactor) = self.reactor.clone() else {
            return;
        };
        let (stream, token, address) = pending.into_parts();
        let state = (self.factory)(&address);
        let profile = Rc::clone(&self.profile);
        let mut session = Session::new(stream, token, address, Role::Client, profile, Rc::clone(&self.clock), state);
        if !H::check_open(&mut session) {
            debug!("Connection to {address} was rejected");
            session.release(&reactor);
            let mut failure = ErrorState::new();
            failure.set_error(ErrorCode::ConnectOpen);
            self.schedule_retry(failure);
            return;
        }
        session.attach(self.id, None);
        self.last_failure.clear();
        self.phase = Some(Phase::Connected(session));
        if let Some(session) = self.session_mut() {
            H::on_opened(session);
        }
    }

    fn close_session(&mut self, mut session: Session<H>) {
        H::on_closing(&mut session);
        if let Some(reactor) = &self.reactor {
            finish_close(session, reactor);
        }
    }
}

impl<H: SessionHandler> Runner for ReconnectingClient<H> {
    /// Begin the first attempt right away.
    fn start(&mut self, reactor: &ReactorHandle) -> Result<(), TickMsgError> {
        if self.is_started() {
            return Err(TickMsgError::AlreadyStarted);
        }
        if self.connect_address.is_none() {
            return Err(TickMsgError::MissingAddress("reconnecting client"));
        }
        self.reactor = Some(reactor.clone());
        self.last_failure.clear();
        self.phase = Some(Phase::Waiting { next_attempt: self.clock.now() });
        self.begin_attempt();
        Ok(())
    }

    fn stop(&mut self) {
        match self.phase.take() {
            Some(Phase::Connected(session)) => self.close_session(session),
            Some(Phase::Connecting { pending, .. }) => {
                if let Some(reactor) = &self.reactor {
                    pending.abandon(reactor);
                }
            }
            Some(Phase::Waiting { .. }) | None => {}
        }
        self.reactor = None;
        self.last_failure.clear();
    }

    fn is_started(&self) -> bool {
        self.phase.is_some()
    }

    fn dispatch_events(&mut self, events: &[ReadyEvent]) {
        for event in events {
            match self.phase.take() {
                Some(Phase::Connecting { pending, deadline }) if pending.token() == event.token => {
                    match pending.poll(event) {
                        ConnectProgress::Pending => self.phase = Some(Phase::Connecting { pending, deadline }),
                        ConnectProgress::Connected => self.open_session(pending),
                        ConnectProgress::Failed(failure) => {
                            if let Some(reactor) = &self.reactor {
                                pending.abandon(reactor);
                            }
                            self.schedule_retry(failure);
                        }
                    }
                }
                Some(Phase::Connected(mut session)) => {
                    if session.token() == event.token {
                        session.handle_ready(event);
                    }
                    self.phase = Some(Phase::Connected(session));
                }
                other => self.phase = other,
            }
        }
        if let Some(session) = self.session_mut() {
            session.service_io();
        }
    }

    fn tick(&mut self) -> Result<bool, TickMsgError> {
        let now = self.clock.now();
        match self.phase.take() {
            None => return Ok(false),
            Some(Phase::Waiting { next_attempt }) => {
                self.phase = Some(Phase::Waiting { next_attempt });
                if now >= next_attempt {
                    self.begin_attempt();
                }
            }
            Some(Phase::Connecting { pending, deadline }) => {
                if now >= deadline {
                    if let Some(reactor) = &self.reactor {
                        pending.abandon(reactor);
                    }
                    let mut failure = ErrorState::new();
                    failure.set_error(ErrorCode::ConnectTimeout);
                    self.schedule_retry(failure);
                } else {
                    self.phase = Some(Phase::Connecting { pending, deadline });
                }
            }
            Some(Phase::Connected(mut session)) => {
                let result = if session.error().has_error() { Ok(false) } else { session.tick() };
                if session.error().has_error() {
                    let failure = *session.error();
                    self.close_session(session);
                    self.schedule_retry(failure);
                } else {
                    self.phase = Some(Phase::Connected(session));
                }
                result?;
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        match self.connect_address {
            Some(address) => format!("reconnecting client to {address}"),
            None => "reconnecting client".to_string(),
        }
    }
}
