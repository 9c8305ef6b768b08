//! Session profiles.
//!
//! A [`SessionProfile`] bundles everything sessions of one endpoint have in common: the codec, the handler table,
//! the keep-alive parameters and the buffer limits. Profiles are immutable once built and shared between sessions
//! behind an `Rc`. Use [`SessionProfileBuilder`] to create one.

use crate::config::{SessionSettings, DEFAULT_MAX_CHUNK, DEFAULT_MAX_MESSAGE_SIZE};
use crate::dispatch::{handler, DispatchTable, Handled, MessageHandler};
use crate::errors::TickMsgError;
use crate::session::{MessageId, Session, SessionHandler};
use std::rc::Rc;
use std::time::Duration;

/// Liveness probing parameters.
///
/// When nothing has been received for `idle_time`, the session sends a `ping_id` message, and another one every
/// `interval` after that. Once `probes` pings have gone unanswered the session fails with a keep-alive timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeepAliveParams<Id> {
    pub idle_time: Duration,
    pub interval: Duration,
    pub probes: u32,
    pub ping_id: Id,
    pub pong_id: Id,
}

impl<Id> KeepAliveParams<Id> {
    pub fn new(ping_id: Id, pong_id: Id) -> Self {
        Self { idle_time: Duration::from_secs(30), interval: Duration::from_secs(10), probes: 3, ping_id, pong_id }
    }

    pub fn with_idle_time(mut self, idle_time: Duration) -> Self {
        self.idle_time = idle_time;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_probes(mut self, probes: u32) -> Self {
        self.probes = probes;
        self
    }
}

impl Default for KeepAliveParams<String> {
    fn default() -> Self {
        Self::new("keep_alive_ping".to_string(), "keep_alive_pong".to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_message_size: usize,
    pub max_send_chunk: usize,
    pub max_recv_chunk: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_send_chunk: DEFAULT_MAX_CHUNK,
            max_recv_chunk: DEFAULT_MAX_CHUNK,
        }
    }
}

pub struct SessionProfile<H: SessionHandler> {
    codec: H::Codec,
    table: DispatchTable<H>,
    keep_alive: Option<KeepAliveParams<MessageId<H>>>,
    limits: SessionLimits,
    nagle: bool,
}

impl<H: SessionHandler> SessionProfile<H> {
    pub fn codec(&self) -> &H::Codec {
        &self.codec
    }

    pub fn table(&self) -> &DispatchTable<H> {
        &self.table
    }

    pub fn keep_alive(&self) -> Option<&KeepAliveParams<MessageId<H>>> {
        self.keep_alive.as_ref()
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn nagle(&self) -> bool {
        self.nagle
    }
}

pub struct SessionProfileBuilder<H: SessionHandler> {
    codec: H::Codec,
    keep_alive: Option<KeepAliveParams<MessageId<H>>>,
    limits: SessionLimits,
    nagle: bool,
    handlers: Vec<(MessageId<H>, MessageHandler<H>, bool)>,
}

impl<H: SessionHandler> SessionProfileBuilder<H> {
    /// A builder with no handlers, keep-alive disabled, default limits and Nagle's algorithm off.
    pub fn new(codec: H::Codec) -> Self {
        Self { codec, keep_alive: None, limits: SessionLimits::default(), nagle: false, handlers: Vec::new() }
    }

    pub fn with_keep_alive(mut self, params: KeepAliveParams<MessageId<H>>) -> Self {
        self.keep_alive = Some(params);
        self
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_nagle(mut self, nagle: bool) -> Self {
        self.nagle = nagle;
        self
    }

    /// Apply limits, Nagle and keep-alive timing from a settings file.
    ///
    /// Settings carry no message ids, so keep-alive timing only takes effect if [`Self::with_keep_alive`] was called
    /// first. Settings without a keep-alive section disable probing.
    pub fn with_settings(mut self, settings: &SessionSettings) -> Self {
        self.limits = settings.limits();
        self.nagle = settings.nagle;
        self.keep_alive = match (self.keep_alive.take(), &settings.keep_alive) {
            (Some(current), Some(timing)) => Some(timing.params(current.ping_id, current.pong_id)),
            _ => None,
        };
        self
    }

    /// Register a handler that may not be replaced.
    pub fn on<F, R>(mut self, id: MessageId<H>, f: F) -> Self
    where
        F: Fn(&mut Session<H>, &MessageId<H>, Option<&[u8]>) -> R + 'static,
        R: Handled,
    {
        self.handlers.push((id, handler(f), false));
        self
    }

    /// Register a handler that a later registration for the same id may replace.
    pub fn on_overridable<F, R>(mut self, id: MessageId<H>, f: F) -> Self
    where
        F: Fn(&mut Session<H>, &MessageId<H>, Option<&[u8]>) -> R + 'static,
        R: Handled,
    {
        self.handlers.push((id, handler(f), true));
        self
    }

    /// Build the dispatch table and freeze the profile.
    ///
    /// With keep-alive enabled, a ping handler answering with a pong and a no-op pong handler are registered first,
    /// both overridable. Fails if two non-overridable handlers share an id.
    pub fn build(self) -> Result<Rc<SessionProfile<H>>, TickMsgError> {
        let mut table = DispatchTable::new();
        if let Some(params) = &self.keep_alive {
            let pong_id = params.pong_id.clone();
            let ping = handler(move |session: &mut Session<H>, _: &MessageId<H>, _: Option<&[u8]>| {
                session.send(&pong_id, None).map(|_| ())
            });
            let pong = handler(|_: &mut Session<H>, _: &MessageId<H>, _: Option<&[u8]>| ());
            table.register(params.ping_id.clone(), ping, true)?;
            table.register(params.pong_id.clone(), pong, true)?;
        }
        for (id, f, overridable) in self.handlers {
            table.register(id, f, overridable)?;
        }
        let profile = SessionProfile {
            codec: self.codec,
            table,
            keep_alive: self.keep_alive,
            limits: self.limits,
            nagle: self.nagle,
        };
        Ok(Rc::new(profile))
    }
}
