//! The driving loop.
//!
//! A [`Scheduler`] owns the [`Reactor`] and a set of started [`Runner`]s (servers and clients). Each pass of
//! [`Scheduler::run_once`] polls the reactor without blocking, hands the readiness events to every runner, ticks every
//! runner and finally calls the idle callback, which by default sleeps for a millisecond.
//!
//! When a runner's tick fails, the scheduler either stops just that runner and carries on (if the runner opted in
//! with `stop_only_self_on_error`), or stops everything and reports that the loop should end.

use crate::errors::TickMsgError;
use crate::reactor::{Reactor, ReactorHandle, ReadyEvent};
use log::*;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// A server or client driven by a [`Scheduler`].
pub trait Runner {
    /// Bind or connect, registering sockets with `reactor`.
    fn start(&mut self, reactor: &ReactorHandle) -> Result<(), TickMsgError>;
    /// Close every session and release every socket. Stopping a stopped runner does nothing.
    fn stop(&mut self);
    fn is_started(&self) -> bool;
    /// Pick out the events for sockets this runner owns, then service the I/O of its sessions.
    fn dispatch_events(&mut self, events: &[ReadyEvent]);
    /// `Ok(false)` signals that the runner has failed.
    fn tick(&mut self) -> Result<bool, TickMsgError>;
    /// Whether a failed tick should only stop this runner rather than the whole scheduler.
    fn stop_only_self_on_error(&self) -> bool {
        false
    }
    /// A short description for log lines.
    fn describe(&self) -> String;
}

/// Called at the end of every pass. Returning `false` ends the loop.
pub type IdleCallback = Box<dyn FnMut() -> bool>;

/// An idle callback that sleeps for `duration`.
pub fn sleep(duration: Duration) -> IdleCallback {
    Box::new(move || {
        std::thread::sleep(duration);
        true
    })
}

pub struct Scheduler {
    reactor: Reactor,
    runners: Vec<Rc<RefCell<dyn Runner>>>,
    idle: IdleCallback,
    auto_stop: bool,
}

impl Scheduler {
    pub fn new() -> Result<Self, TickMsgError> {
        let reactor = Reactor::new()?;
        Ok(Self { reactor, runners: Vec::new(), idle: sleep(Duration::from_millis(1)), auto_stop: true })
    }

    pub fn with_idle<F: FnMut() -> bool + 'static>(mut self, idle: F) -> Self {
        self.idle = Box::new(idle);
        self
    }

    /// Whether runners are stopped automatically when a pass fails. Defaults to true.
    pub fn with_auto_stop(mut self, auto_stop: bool) -> Self {
        self.auto_stop = auto_stop;
        self
    }

    pub fn reactor(&self) -> &ReactorHandle {
        self.reactor.handle()
    }

    pub fn runner_count(&self) -> usize {
        self.runners.len()
    }

    /// Start `runner` and add it to the set driven by this scheduler.
    pub fn start<R: Runner + 'static>(&mut self, runner: &Rc<RefCell<R>>) -> Result<(), TickMsgError> {
        runner.borrow_mut().start(self.reactor.handle())?;
        let runner: Rc<RefCell<dyn Runner>> = runner.clone();
        debug!("Started {}", runner.borrow().describe());
        self.runners.push(runner);
        Ok(())
    }

    /// Stop `runner` and remove it from the set.
    pub fn stop<R: Runner + 'static>(&mut self, runner: &Rc<RefCell<R>>) {
        let runner: Rc<RefCell<dyn Runner>> = runner.clone();
        self.stop_runner(&runner);
    }

    fn stop_runner(&mut self, runner: &Rc<RefCell<dyn Runner>>) {
        runner.borrow_mut().stop();
        self.runners.retain(|r| !Rc::ptr_eq(r, runner));
    }

    pub fn stop_all(&mut self) {
        let runners = self.runners.clone();
        for runner in &runners {
            self.stop_runner(runner);
        }
    }

    /// Run one pass. Returns `Ok(false)` when the loop should end.
    pub fn run_once(&mut self) -> Result<bool, TickMsgError> {
        let mut failed = None;
        if !self.runners.is_empty() {
            let events = self.reactor.poll_once(Some(Duration::ZERO))?;
            // Runners may be stopped from inside a tick, so iterate over a snapshot.
            let runners = self.runners.clone();
            for runner in &runners {
                runner.borrow_mut().dispatch_events(&events);
            }
            for runner in &runners {
                if !runner.borrow_mut().tick()? {
                    failed = Some(Rc::clone(runner));
                    break;
                }
            }
        }
        let Some(runner) = failed else {
            if (self.idle)() {
                return Ok(true);
            }
            debug!("Idle callback ended the loop");
            if self.auto_stop {
                self.stop_all();
            }
            return Ok(false);
        };
        let description = runner.borrow().describe();
        if runner.borrow().stop_only_self_on_error() {
            warn!("{description} failed; stopping it");
            if self.auto_stop {
                self.stop_runner(&runner);
            }
            Ok(true)
        } else {
            warn!("{description} failed; stopping all runners");
            if self.auto_stop {
                self.stop_all();
            }
            Ok(false)
        }
    }

    /// Run passes until one reports that the loop should end.
    pub fn run_forever(&mut self) -> Result<(), TickMsgError> {
        while self.run_once()? {}
        Ok(())
    }
}
