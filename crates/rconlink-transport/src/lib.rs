//! Stream transport for RCON sessions.
//!
//! Provides one connected byte-stream type, [`RconStream`], over either a
//! plain TCP socket or a TLS-wrapped one (behind the `tls` feature). This is
//! the lowest layer of rconlink; framing and sessions build on top of it.

pub mod error;
pub mod stream;

pub use error::{Result, TransportError};
pub use stream::{connect, Endpoint, RconStream};

/// Whether this build can wrap connections in TLS.
pub const TLS_SUPPORTED: bool = cfg!(feature = "tls");
