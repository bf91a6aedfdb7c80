use rsocks_proto::{StreamId, MAX_FRAME_SIZE};
use std::fmt;
use std::time::Duration;

/// Which end of the session opens streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens streams; allocates odd stream IDs
    Client,
    /// Accepts streams; allocates even stream IDs
    Server,
}

impl Role {
    pub(crate) fn first_stream_id(self) -> StreamId {
        match self {
            Role::Client => 1,
            Role::Server => 2,
        }
    }

    /// Whether `stream_id` lies in the ID space this role allocates from
    pub(crate) fn allocates(self, stream_id: StreamId) -> bool {
        stream_id != rsocks_proto::SESSION_STREAM_ID
            && (stream_id % 2 == 1) == (self == Role::Client)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inbound streams waiting for `accept()`; further streams are reset
    pub accept_backlog: usize,

    /// Largest data frame a stream write produces (capped at `MAX_FRAME_SIZE`)
    pub max_frame_payload: u32,

    /// Send a ping this often so a dead transport surfaces as a write error
    pub keepalive_interval: Option<Duration>,
}

impl SessionConfig {
    pub(crate) fn frame_payload_limit(&self) -> usize {
        self.max_frame_payload.clamp(1, MAX_FRAME_SIZE) as usize
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            accept_backlog: 256,
            max_frame_payload: 16 * 1024,
            keepalive_interval: None,
        }
    }
}
