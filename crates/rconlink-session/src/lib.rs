//! # rconlink-session
//!
//! Authenticated RCON sessions and the command-execution client built on them.
//!
//! - [`Envelope`] and [`parse`] build and decode the JSON command envelope.
//! - [`Correlator`] matches inbound responses to outstanding requests.
//! - [`Session`] owns one framed, authenticated connection.
//! - [`RconClient`] serializes callers over one session and recovers from a
//!   single dropped connection per call.
//! - [`HttpFallback`] runs the same contract over a stateless web API
//!   (feature `http`).
//! - [`ServerRegistry`] routes commands to a server's executors by operation
//!   class.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rconlink_session::{ConnectionDescriptor, Credentials, RconClient};
//!
//! # async fn demo() -> rconlink_session::Result<()> {
//! let client = RconClient::new(ConnectionDescriptor::new(
//!     "10.0.0.5",
//!     7779,
//!     Credentials::password("secret"),
//! ));
//! let outcome = client
//!     .execute("GetServerInformation", serde_json::json!({"Name": "session"}), Duration::from_secs(5))
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod correlator;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod executor;
#[cfg(feature = "http")]
pub mod http;
pub mod registry;
pub mod session;
pub mod state;

pub use client::RconClient;
pub use config::{
    ConnectionDescriptor, CorrelationMode, Credentials, TokenPlacement, PROTOCOL_VERSION,
};
pub use correlator::{Correlator, PendingRequest};
pub use discovery::{Catalogue, CommandCheck, CommandInfo};
pub use envelope::{
    extract_token, parse, CommandOutcome, Envelope, Reply, ReplyStatus, ServerFailure,
};
pub use error::{ErrorClass, RconError, Result, TimeoutPhase};
pub use executor::{Executor, ExecutorKind};
#[cfg(feature = "http")]
pub use http::{HttpFallback, HttpFallbackConfig};
pub use registry::{OperationClass, ServerHandle, ServerRegistry};
pub use session::{AccessToken, Session};
pub use state::SessionState;
