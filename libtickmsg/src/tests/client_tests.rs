use super::{closed_port, loopback, profile, run_until, Chat, Events};
use crate::client::Client;
use crate::clock::ManualClock;
use crate::error_state::ErrorCode;
use crate::errors::TickMsgError;
use crate::reactor::Reactor;
use crate::scheduler::{Runner, Scheduler};
use crate::server::Server;
use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

fn client_for(address: SocketAddr) -> Client<Chat> {
    let mut client = Client::new(profile(), Chat::factory(&Events::default(), false));
    client.set_connect_address(address);
    client
}

#[test]
fn refused_connection() {
    env_logger::try_init().ok();
    // Keep the failed client around so its error can be inspected
    let mut scheduler = Scheduler::new().unwrap().with_auto_stop(false);
    let client = Rc::new(RefCell::new(client_for(closed_port())));
    scheduler.start(&client).unwrap();
    let mut finished = false;
    for _ in 0..5000 {
        if !scheduler.run_once().unwrap() {
            finished = true;
            break;
        }
    }
    assert!(finished);
    let client = client.borrow();
    assert_eq!(client.error().code(), ErrorCode::ConnectRefused);
    assert!(client.error().has_system_error());
    assert!(!client.is_connected());
}

#[test]
fn connect_timeout() {
    env_logger::try_init().ok();
    // A listener that never accepts. The handshake completes in the kernel, but the client never hears about it
    // because no events are dispatched.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let reactor = Reactor::new().unwrap();
    let clock = Rc::new(ManualClock::new());
    let mut client = client_for(listener.local_addr().unwrap()).with_clock(clock.clone());
    client.set_connect_timeout(Duration::from_secs(2));
    client.start(reactor.handle()).unwrap();

    assert!(client.tick().unwrap());
    clock.advance(Duration::from_millis(1999));
    assert!(client.tick().unwrap());
    clock.advance(Duration::from_millis(1));
    assert!(!client.tick().unwrap());
    assert_eq!(client.error().code(), ErrorCode::ConnectTimeout);
    // Errors are sticky until the client is stopped
    assert!(!client.tick().unwrap());
    client.stop();
    assert!(!client.is_started());
    assert_eq!(client.error().code(), ErrorCode::Ok);
}

#[test]
fn session_errors_are_mirrored() {
    env_logger::try_init().ok();
    let mut scheduler = Scheduler::new().unwrap().with_auto_stop(false);
    let mut server = Server::new(profile(), Chat::factory(&Events::default(), false));
    server.set_listen_address(loopback());
    let server = Rc::new(RefCell::new(server));
    scheduler.start(&server).unwrap();
    let client = Rc::new(RefCell::new(client_for(server.borrow().local_address().unwrap())));
    scheduler.start(&client).unwrap();
    assert!(run_until(&mut scheduler, || client.borrow().is_connected() && server.borrow().session_count() == 1));

    server.borrow_mut().close_session(0);
    let mut failed = false;
    for _ in 0..5000 {
        if !scheduler.run_once().unwrap() {
            failed = true;
            break;
        }
    }
    assert!(failed);
    let client = client.borrow();
    assert_eq!(client.error().code(), ErrorCode::RemoteClosed);
    assert_eq!(client.session().map(|s| *s.error()), Some(*client.error()));
    // The server does not care about the closed session
    assert!(server.borrow().error().code() == ErrorCode::Ok);
}

#[test]
fn ready_session_requires_the_ready_flag() {
    env_logger::try_init().ok();
    let mut scheduler = Scheduler::new().unwrap();
    let mut server = Server::new(profile(), Chat::factory(&Events::default(), false));
    server.set_listen_address(loopback());
    let server = Rc::new(RefCell::new(server));
    scheduler.start(&server).unwrap();
    let client = Rc::new(RefCell::new(client_for(server.borrow().local_address().unwrap())));
    scheduler.start(&client).unwrap();
    assert!(run_until(&mut scheduler, || client.borrow().is_connected()));

    let mut client = client.borrow_mut();
    assert!(client.ready_session().is_some());
    client.session_mut().unwrap().set_ready(false);
    assert!(client.ready_session().is_none());
    client.session_mut().unwrap().set_ready(true);
    assert!(client.ready_session().is_some());
    assert_eq!(client.session().unwrap().serial(), None);
}

#[test]
fn missing_address() {
    let reactor = Reactor::new().unwrap();
    let mut client = Client::with_default_state(profile());
    let err = client.start(reactor.handle()).unwrap_err();
    assert!(matches!(err, TickMsgError::MissingAddress(_)));
    assert!(!client.is_started());
}
