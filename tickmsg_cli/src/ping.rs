//! The echo client.
//!
//! Requests carry a sequence number (`u32`, little endian) followed by random filler. The client checks every reply
//! against the request it answers and records the round-trip time.

use crate::echo::{profile_builder, ECHO_REPLY, ECHO_REQUEST};
use libtickmsg::{FixedIdCodec, Session, SessionHandler, SessionProfile, SessionSettings, TickMsgError};
use log::*;
use rand::Rng;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use std::time::{Duration, Instant};

const SEQ_SIZE: usize = 4;

/// Progress of a ping run. Shared by every session of the run, so it survives reconnects.
#[derive(Debug)]
pub struct PingReport {
    requested: u32,
    sent: u32,
    filler: usize,
    interval: Duration,
    next_send: Option<Instant>,
    in_flight: HashMap<u32, (Instant, Vec<u8>)>,
    round_trips: Vec<Duration>,
    lost: u32,
}

impl PingReport {
    pub fn new(requested: u32, interval: Duration, filler: usize) -> Self {
        Self {
            requested,
            sent: 0,
            filler,
            interval,
            next_send: None,
            in_flight: HashMap::new(),
            round_trips: Vec::new(),
            lost: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.sent >= self.requested && self.in_flight.is_empty()
    }

    pub fn replies(&self) -> usize {
        self.round_trips.len()
    }

    pub fn lost(&self) -> u32 {
        self.lost
    }

    /// The next request payload, if one is due at `now`.
    pub fn next_request(&mut self, now: Instant) -> Option<Vec<u8>> {
        if self.sent >= self.requested || self.next_send.is_some_and(|t| now < t) {
            return None;
        }
        let seq = self.sent;
        let mut payload = vec![0u8; SEQ_SIZE + self.filler];
        payload[..SEQ_SIZE].copy_from_slice(&seq.to_le_bytes());
        rand::rng().fill(&mut payload[SEQ_SIZE..]);
        self.sent += 1;
        self.next_send = Some(now + self.interval);
        self.in_flight.insert(seq, (now, payload.clone()));
        Some(payload)
    }

    /// Match a reply to its request. Returns false for replies that answer nothing we sent.
    pub fn record_reply(&mut self, payload: &[u8], now: Instant) -> bool {
        let Some(seq) = payload.get(..SEQ_SIZE).and_then(|b| b.try_into().ok()).map(u32::from_le_bytes) else {
            warn!("Echo reply is too short ({} bytes)", payload.len());
            return false;
        };
        match self.in_flight.remove(&seq) {
            Some((sent_at, expected)) if expected == payload => {
                let rtt = now.saturating_duration_since(sent_at);
                info!("Reply {seq}: {} bytes in {rtt:?}", payload.len());
                self.round_trips.push(rtt);
                true
            }
            Some(_) => {
                warn!("Reply {seq} does not match its request");
                false
            }
            None => {
                warn!("Unexpected reply {seq}");
                false
            }
        }
    }

    /// Requests still in flight when a connection drops will never be answered.
    fn abandon_in_flight(&mut self) {
        self.lost += self.in_flight.len() as u32;
        self.in_flight.clear();
    }
}

impl Display for PingReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} requests sent, {} replies, {} lost", self.sent, self.replies(), self.lost)?;
        if let (Some(min), Some(max)) = (self.round_trips.iter().min(), self.round_trips.iter().max()) {
            let total: Duration = self.round_trips.iter().sum();
            let avg = total / self.round_trips.len() as u32;
            write!(f, ". rtt min/avg/max = {min:?}/{avg:?}/{max:?}")?;
        }
        Ok(())
    }
}

pub struct PingSession {
    report: Rc<RefCell<PingReport>>,
}

impl PingSession {
    pub fn new(report: Rc<RefCell<PingReport>>) -> Self {
        Self { report }
    }
}

impl SessionHandler for PingSession {
    type Codec = FixedIdCodec;

    fn on_closed(session: &mut Session<Self>) {
        session.state().report.borrow_mut().abandon_in_flight();
    }

    fn on_tick(session: &mut Session<Self>) -> Result<(), TickMsgError> {
        let request = session.state().report.borrow_mut().next_request(Instant::now());
        if let Some(payload) = request {
            session.send(&ECHO_REQUEST, Some(&payload))?;
        }
        Ok(())
    }
}

pub fn ping_profile(settings: &SessionSettings) -> Result<Rc<SessionProfile<PingSession>>, TickMsgError> {
    profile_builder::<PingSession>(settings)
        .on(ECHO_REPLY, |session, _, payload| {
            session.state().report.borrow_mut().record_reply(payload.unwrap_or_default(), Instant::now())
        })
        .build()
}
