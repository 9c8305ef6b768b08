//! Length-prefixed TCP messaging on a single-threaded, tick-driven event loop.
//!
//! Applications describe their protocol with a [`SessionProfile`] (codec, handlers, keep-alive, limits), wrap it in
//! a [`Server`], [`Client`] or [`ReconnectingClient`], and drive everything from a [`Scheduler`].

pub mod client;
pub mod clock;
pub mod codec;
pub mod config;
mod connector;
pub mod dispatch;
pub mod error_state;
pub mod errors;
pub mod profile;
pub mod reactor;
pub mod reconnecting;
pub mod scheduler;
pub mod server;
pub mod session;

#[cfg(test)]
mod tests;

pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{FixedIdCodec, Message, MessageCodec, TupleCodec, WireInt};
pub use config::{EndpointSettings, KeepAliveSettings, SessionSettings};
pub use dispatch::{DispatchTable, Handled, MessageHandler};
pub use error_state::{ErrorCode, ErrorState};
pub use errors::{CodecError, TickMsgError};
pub use profile::{KeepAliveParams, SessionLimits, SessionProfile, SessionProfileBuilder};
pub use reconnecting::{ConnectPhase, ReconnectingClient};
pub use scheduler::{Runner, Scheduler};
pub use server::Server;
pub use session::{EndpointId, MessageId, Role, Session, SessionHandler};
