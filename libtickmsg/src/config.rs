//! Serializable settings for sessions and endpoints.
//!
//! All fields have defaults, so a partial settings file only needs to name what it changes.

use crate::codec::WireInt;
use crate::profile::{KeepAliveParams, SessionLimits};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;
pub const DEFAULT_MAX_CHUNK: usize = 16 * 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound on the size of a frame, length prefix included.
    pub max_message_size: usize,
    /// Most bytes written to a socket in one pass.
    pub max_send_chunk: usize,
    /// Most bytes read from a socket in one pass.
    pub max_recv_chunk: usize,
    /// Leave Nagle's algorithm on. When false (the default) sockets are set to `TCP_NODELAY`.
    pub nagle: bool,
    pub length_prefix: WireInt,
    /// Liveness probing. `None` disables it.
    pub keep_alive: Option<KeepAliveSettings>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_send_chunk: DEFAULT_MAX_CHUNK,
            max_recv_chunk: DEFAULT_MAX_CHUNK,
            nagle: false,
            length_prefix: WireInt::default(),
            keep_alive: Some(KeepAliveSettings::default()),
        }
    }
}

impl SessionSettings {
    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            max_message_size: self.max_message_size,
            max_send_chunk: self.max_send_chunk,
            max_recv_chunk: self.max_recv_chunk,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepAliveSettings {
    pub idle_time_secs: u64,
    pub interval_secs: u64,
    pub probes: u32,
}

impl Default for KeepAliveSettings {
    fn default() -> Self {
        Self { idle_time_secs: 30, interval_secs: 10, probes: 3 }
    }
}

impl KeepAliveSettings {
    pub fn params<Id>(&self, ping_id: Id, pong_id: Id) -> KeepAliveParams<Id> {
        KeepAliveParams::new(ping_id, pong_id)
            .with_idle_time(Duration::from_secs(self.idle_time_secs))
            .with_interval(Duration::from_secs(self.interval_secs))
            .with_probes(self.probes)
    }
}

/// Connection management settings for servers and clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    pub connect_timeout_ms: u64,
    pub retry_interval_ms: u64,
    /// How long the scheduler sleeps after each pass.
    pub idle_sleep_ms: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self { connect_timeout_ms: 5_000, retry_interval_ms: 3_000, idle_sleep_ms: 1 }
    }
}

impl EndpointSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }
}
