//! Tunnel Protocol Definitions
//!
//! This crate defines the frames carried over the single rendezvous TCP
//! connection, the tokio-util codec that reads and writes them, and a few
//! helpers shared by both ends of the tunnel.

pub mod address;
pub mod codec;
pub mod frame;

pub use address::{validate_address, AddressError};
pub use codec::FrameCodec;
pub use frame::{Frame, FrameError, FrameFlags, FrameType, GoAwayCode, StreamId};

/// Maximum payload carried by a single frame (256KB)
pub const MAX_FRAME_SIZE: u32 = 256 * 1024;

/// Receive window every stream starts with, on both ends (256KB)
pub const INITIAL_WINDOW_SIZE: u32 = 256 * 1024;

/// Reserved stream ID addressing the session itself (pings, go-away)
pub const SESSION_STREAM_ID: StreamId = 0;
