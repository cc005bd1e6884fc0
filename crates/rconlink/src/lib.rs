//! Remote-console client for game servers.
//!
//! rconlink keeps one authenticated, framed connection per server, serializes
//! concurrent commands over it, correlates responses, and recovers from a
//! dropped connection. A stateless HTTP fallback implements the same
//! `execute` contract for read-mostly queries.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP/TLS byte stream
//! - [`frame`]: length-prefixed framing
//! - [`session`]: envelopes, correlation, sessions, the client facade, HTTP
//!   fallback, discovery and per-server routing

/// Re-export transport types.
pub mod transport {
    pub use rconlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use rconlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use rconlink_session::*;
}

pub use rconlink_session::{
    CommandOutcome, ConnectionDescriptor, Credentials, RconClient, RconError, Result,
};
