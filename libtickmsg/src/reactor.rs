//! Readiness notifications.
//!
//! The [`Reactor`] owns the `mio` poller and hands out [`ReactorHandle`]s that endpoints use to register their
//! sockets. A poll produces a batch of [`ReadyEvent`]s, which the scheduler delivers to every runner; each runner
//! picks out the tokens it owns.

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token};
use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

const EVENT_CAPACITY: usize = 1024;

/// A copy of the readiness flags of one `mio` event, detached from the poller's event buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadyEvent {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub read_closed: bool,
    pub write_closed: bool,
    pub error: bool,
}

impl Default for ReadyEvent {
    /// An event for token 0 with no readiness flags set.
    fn default() -> Self {
        Self {
            token: Token(0),
            readable: false,
            writable: false,
            read_closed: false,
            write_closed: false,
            error: false,
        }
    }
}

impl ReadyEvent {
    fn from_mio(event: &mio::event::Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    handle: ReactorHandle,
}

impl Reactor {
    pub fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let handle = ReactorHandle { registry: Rc::new(registry), next_token: Rc::new(Cell::new(0)) };
        Ok(Self { poll, events: Events::with_capacity(EVENT_CAPACITY), handle })
    }

    pub fn handle(&self) -> &ReactorHandle {
        &self.handle
    }

    /// Poll once and return the batch of readiness events. An interrupted poll yields an empty batch.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => Ok(self.events.iter().map(ReadyEvent::from_mio).collect()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

/// A cheap, cloneable handle for registering sockets with the [`Reactor`].
#[derive(Clone)]
pub struct ReactorHandle {
    registry: Rc<Registry>,
    next_token: Rc<Cell<usize>>,
}

impl ReactorHandle {
    /// Register a connection for read and write readiness under a freshly allocated token.
    pub fn register<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<Token> {
        self.register_with(source, Interest::READABLE | Interest::WRITABLE)
    }

    pub fn register_with<S: Source + ?Sized>(&self, source: &mut S, interest: Interest) -> io::Result<Token> {
        let token = Token(self.next_token.get());
        self.next_token.set(token.0.wrapping_add(1));
        self.registry.register(source, token, interest)?;
        Ok(token)
    }

    pub fn deregister<S: Source + ?Sized>(&self, source: &mut S) -> io::Result<()> {
        self.registry.deregister(source)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_event_carries_no_readiness() {
        let event = ReadyEvent { readable: true, ..Default::default() };
        assert_eq!(event.token, Token(0));
        assert!(event.readable);
        assert!(!event.writable && !event.read_closed && !event.write_closed && !event.error);
    }

    #[test]
    fn tokens_are_allocated_in_sequence() {
        let reactor = Reactor::new().unwrap();
        let mut first = std::net::TcpListener::bind("127.0.0.1:0").map(mio::net::TcpListener::from_std).unwrap();
        let mut second = std::net::TcpListener::bind("127.0.0.1:0").map(mio::net::TcpListener::from_std).unwrap();
        let a = reactor.handle().register_with(&mut first, Interest::READABLE).unwrap();
        let b = reactor.handle().clone().register_with(&mut second, Interest::READABLE).unwrap();
        assert_eq!(b.0, a.0 + 1);
        reactor.handle().deregister(&mut first).unwrap();
        reactor.handle().deregister(&mut second).unwrap();
    }
}
