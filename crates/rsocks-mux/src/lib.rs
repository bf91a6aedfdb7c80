//! Stream multiplexing over a single rendezvous connection
//!
//! A [`MuxSession`] wraps one byte transport (normally the rendezvous TCP
//! connection) and carves independent bidirectional [`MuxStream`]s out of it.
//!
//! # Roles
//!
//! The side that *opens* streams runs the [`Role::Client`] role and allocates
//! odd stream IDs; the side that *accepts* them runs [`Role::Server`] and
//! allocates even IDs. In rsocks the roles are inverted relative to TCP: the
//! agent dials the rendezvous but acts as the mux server, the relay accepts
//! the rendezvous but acts as the mux client.
//!
//! # Architecture
//!
//! Each session spawns a reader task (decodes frames and routes them to
//! streams) and a writer task (drains an outbound frame queue onto the
//! transport). Streams implement tokio's `AsyncRead`/`AsyncWrite`, with
//! per-stream credit windows providing backpressure.

mod config;
mod error;
mod policy;
mod session;
mod stream;

pub use config::{Role, SessionConfig};
pub use error::MuxError;
pub use policy::AcceptPolicy;
pub use session::MuxSession;
pub use stream::MuxStream;
