//! End-to-end tests over loopback sockets.

mod client_tests;

use crate::codec::TupleCodec;
use crate::profile::{SessionProfile, SessionProfileBuilder};
use crate::scheduler::Scheduler;
use crate::session::{Session, SessionHandler};
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

pub(crate) type Events = Rc<RefCell<Vec<String>>>;

/// Session state for the test protocol. Hooks append to a log shared by every session of an endpoint.
#[derive(Default)]
pub(crate) struct Chat {
    pub received: Vec<(String, Option<Vec<u8>>)>,
    pub pongs: usize,
    pub reject: bool,
    pub events: Events,
}

impl Chat {
    pub fn factory(events: &Events, reject: bool) -> impl FnMut(&SocketAddr) -> Chat + 'static {
        let events = Rc::clone(events);
        move |_| Chat { events: Rc::clone(&events), reject, ..Default::default() }
    }
}

fn note(session: &Session<Chat>, what: &str) {
    let serial = session.serial().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
    session.state().events.borrow_mut().push(format!("{what} {serial}"));
}

impl SessionHandler for Chat {
    type Codec = TupleCodec<String>;

    fn check_open(session: &mut Session<Self>) -> bool {
        !session.state().reject
    }

    fn on_opened(session: &mut Session<Self>) {
        note(session, "opened");
    }

    fn on_closing(session: &mut Session<Self>) {
        assert!(session.owner().is_some());
        note(session, "closing");
    }

    fn on_closed(session: &mut Session<Self>) {
        assert!(session.owner().is_none());
        note(session, "closed");
    }
}

pub(crate) fn chat_profile() -> SessionProfileBuilder<Chat> {
    SessionProfileBuilder::<Chat>::new(TupleCodec::new())
        .on("Chat".into(), |s: &mut Session<Chat>, id: &String, p: Option<&[u8]>| {
            s.state_mut().received.push((id.clone(), p.map(<[u8]>::to_vec)))
        })
        .on("Echo".into(), |s: &mut Session<Chat>, _: &String, p: Option<&[u8]>| s.send(&"Chat".to_string(), p))
}

pub(crate) fn profile() -> Rc<SessionProfile<Chat>> {
    chat_profile().build().unwrap()
}

pub(crate) fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// An address nothing is listening on.
pub(crate) fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Run scheduler passes until `done` holds. Gives up after a few seconds.
pub(crate) fn run_until(scheduler: &mut Scheduler, mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..5000 {
        if done() {
            return true;
        }
        scheduler.run_once().unwrap();
    }
    done()
}

/// Run a fixed number of passes.
pub(crate) fn run_for(scheduler: &mut Scheduler, passes: usize) {
    for _ in 0..passes {
        scheduler.run_once().unwrap();
    }
}
