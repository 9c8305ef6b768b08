//! Message id to handler routing.

use crate::errors::TickMsgError;
use crate::session::{MessageId, Session, SessionHandler};
use log::*;
use std::collections::HashMap;
use std::rc::Rc;

/// A registered message handler. `Ok(false)` means the message could not be handled and the session should be
/// failed; `Err` is a programming fault that is surfaced to whoever ticks the session.
pub type MessageHandler<H> =
    Rc<dyn Fn(&mut Session<H>, &MessageId<H>, Option<&[u8]>) -> Result<bool, TickMsgError>>;

/// Conversion of a handler's return value into a handling outcome.
///
/// Handlers that cannot fail can return `()`; handlers that can reject a message return `bool`; handlers that call
/// fallible session APIs such as [`Session::send`] can return a `Result` and use `?`.
pub trait Handled {
    fn into_outcome(self) -> Result<bool, TickMsgError>;
}

impl Handled for () {
    fn into_outcome(self) -> Result<bool, TickMsgError> {
        Ok(true)
    }
}

impl Handled for bool {
    fn into_outcome(self) -> Result<bool, TickMsgError> {
        Ok(self)
    }
}

impl Handled for Result<(), TickMsgError> {
    fn into_outcome(self) -> Result<bool, TickMsgError> {
        self.map(|_| true)
    }
}

impl Handled for Result<bool, TickMsgError> {
    fn into_outcome(self) -> Result<bool, TickMsgError> {
        self
    }
}

/// Wrap a plain closure as a [`MessageHandler`].
pub fn handler<H, F, R>(f: F) -> MessageHandler<H>
where
    H: SessionHandler,
    F: Fn(&mut Session<H>, &MessageId<H>, Option<&[u8]>) -> R + 'static,
    R: Handled,
{
    Rc::new(move |session: &mut Session<H>, id: &MessageId<H>, payload: Option<&[u8]>| {
        f(session, id, payload).into_outcome()
    })
}

struct Entry<H: SessionHandler> {
    handler: MessageHandler<H>,
    overridable: bool,
}

/// The handler table shared by every session built from the same profile.
pub struct DispatchTable<H: SessionHandler> {
    entries: HashMap<MessageId<H>, Entry<H>>,
    order: Vec<MessageId<H>>,
}

impl<H: SessionHandler> Default for DispatchTable<H> {
    fn default() -> Self {
        Self { entries: HashMap::new(), order: Vec::new() }
    }
}

impl<H: SessionHandler> DispatchTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `id`.
    ///
    /// Registering over an entry that was marked overridable replaces it. Registering over any other entry is an
    /// error and leaves the table unchanged.
    pub fn register(
        &mut self,
        id: MessageId<H>,
        handler: MessageHandler<H>,
        overridable: bool,
    ) -> Result<(), TickMsgError> {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.overridable => {
                debug!("Replacing overridable handler for message {id}");
                entry.handler = handler;
                entry.overridable = overridable;
                Ok(())
            }
            Some(_) => Err(TickMsgError::DuplicateHandler(id.to_string())),
            None => {
                self.order.push(id.clone());
                self.entries.insert(id, Entry { handler, overridable });
                Ok(())
            }
        }
    }

    /// A shared reference to the handler for `id`, if one is registered.
    pub fn get(&self, id: &MessageId<H>) -> Option<MessageHandler<H>> {
        self.entries.get(id).map(|e| Rc::clone(&e.handler))
    }

    pub fn contains(&self, id: &MessageId<H>) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_overridable(&self, id: &MessageId<H>) -> Option<bool> {
        self.entries.get(id).map(|e| e.overridable)
    }

    /// Registered ids, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &MessageId<H>> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::TupleCodec;

    struct Plain;

    impl SessionHandler for Plain {
        type Codec = TupleCodec<String>;
    }

    fn accept() -> MessageHandler<Plain> {
        handler(|_: &mut Session<Plain>, _: &String, _: Option<&[u8]>| true)
    }

    fn reject() -> MessageHandler<Plain> {
        handler(|_: &mut Session<Plain>, _: &String, _: Option<&[u8]>| false)
    }

    #[test]
    fn duplicates_are_refused() {
        let mut table = DispatchTable::<Plain>::new();
        table.register("Login".into(), accept(), false).unwrap();
        let err = table.register("Login".into(), reject(), false).unwrap_err();
        assert!(matches!(err, TickMsgError::DuplicateHandler(ref id) if id == "Login"));
        assert_eq!(table.len(), 1);
        assert_eq!(table.is_overridable(&"Login".to_string()), Some(false));
    }

    #[test]
    fn overridable_entries_are_replaced() {
        let mut table = DispatchTable::<Plain>::new();
        table.register("keep_alive_ping".into(), accept(), true).unwrap();
        table.register("Chat".into(), accept(), false).unwrap();
        let original = table.get(&"keep_alive_ping".to_string()).unwrap();
        table.register("keep_alive_ping".into(), reject(), false).unwrap();
        let replaced = table.get(&"keep_alive_ping".to_string()).unwrap();
        assert!(!Rc::ptr_eq(&original, &replaced));
        assert_eq!(table.is_overridable(&"keep_alive_ping".to_string()), Some(false));
        // The replacement keeps its original position
        let ids = table.ids().cloned().collect::<Vec<_>>();
        assert_eq!(ids, vec!["keep_alive_ping".to_string(), "Chat".to_string()]);
        // ..and can no longer be overridden
        assert!(table.register("keep_alive_ping".into(), accept(), true).is_err());
    }

    #[test]
    fn handler_outcomes() {
        assert!(matches!(().into_outcome(), Ok(true)));
        assert!(matches!(false.into_outcome(), Ok(false)));
        let faulted: Result<(), TickMsgError> = Err(TickMsgError::AlreadyStarted);
        assert!(faulted.into_outcome().is_err());
    }
}
