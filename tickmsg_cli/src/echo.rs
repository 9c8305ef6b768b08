//! The echo protocol.
//!
//! Messages carry a 16-bit little-endian id followed by raw payload bytes. The server answers every
//! [`ECHO_REQUEST`] with an [`ECHO_REPLY`] carrying the same payload.

use libtickmsg::{
    FixedIdCodec, KeepAliveParams, Session, SessionHandler, SessionProfile, SessionProfileBuilder, SessionSettings,
    TickMsgError, WireInt,
};
use log::*;
use std::rc::Rc;

pub const ECHO_REQUEST: u32 = 1;
pub const ECHO_REPLY: u32 = 2;
pub const KEEP_ALIVE_PING: u32 = 100;
pub const KEEP_ALIVE_PONG: u32 = 101;

pub fn codec(settings: &SessionSettings) -> FixedIdCodec {
    FixedIdCodec::new(settings.length_prefix, WireInt::default())
}

/// A profile builder with the codec, keep-alive ids and limits every echo endpoint shares.
pub fn profile_builder<H>(settings: &SessionSettings) -> SessionProfileBuilder<H>
where
    H: SessionHandler<Codec = FixedIdCodec>,
{
    SessionProfileBuilder::new(codec(settings))
        .with_keep_alive(KeepAliveParams::new(KEEP_ALIVE_PING, KEEP_ALIVE_PONG))
        .with_settings(settings)
}

#[derive(Default)]
pub struct EchoServerSession {
    pub echoed: u64,
}

impl SessionHandler for EchoServerSession {
    type Codec = FixedIdCodec;

    fn on_closing(session: &mut Session<Self>) {
        info!(
            "close connection from {} after {} echoes ({})",
            session.remote_address(),
            session.state().echoed,
            session.error()
        );
    }
}

pub fn server_profile(settings: &SessionSettings) -> Result<Rc<SessionProfile<EchoServerSession>>, TickMsgError> {
    profile_builder::<EchoServerSession>(settings)
        .on(ECHO_REQUEST, |session, _, payload| {
            session.state_mut().echoed += 1;
            session.send(&ECHO_REPLY, payload)
        })
        .build()
}
