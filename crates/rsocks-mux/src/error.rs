use rsocks_proto::FrameError;
use thiserror::Error;

/// Multiplexed session errors
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Session closed")]
    SessionClosed,

    #[error("No available stream IDs")]
    StreamIdsExhausted,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
}
