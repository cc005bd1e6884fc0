use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rconlink_frame::FrameError;
use rconlink_transport::TransportError;

use crate::state::SessionState;

/// Which wait ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for exclusive access to the session.
    Lock,
    /// Opening the connection or completing login.
    Connect,
    /// Writing the request; the socket stopped accepting data.
    Send,
    /// Waiting for the correlated response.
    Response,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeoutPhase::Lock => "waiting for the session",
            TimeoutPhase::Connect => "connecting",
            TimeoutPhase::Send => "sending a request",
            TimeoutPhase::Response => "waiting for a response",
        };
        f.write_str(name)
    }
}

/// How a failure should be presented at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The server could not be reached or the link broke.
    Unreachable,
    /// Credentials were refused.
    Authentication,
    /// A deadline elapsed.
    Timeout,
    /// The server answered with something we cannot interpret.
    Protocol,
    /// The caller asked for something invalid.
    Usage,
}

/// Errors produced by RCON sessions and clients.
///
/// Server-reported business failures are not errors; they come back as
/// [`CommandOutcome::Rejected`](crate::CommandOutcome::Rejected).
///
/// The type is `Clone` so one link failure can be delivered to every request
/// waiting on that link.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RconError {
    /// Malformed or oversized frame on the wire.
    #[error("framing error: {0}")]
    Framing(#[source] Arc<FrameError>),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] Arc<TransportError>),

    /// The server refused the login credentials.
    #[error("authentication rejected: {message}")]
    Authentication { code: Option<i64>, message: String },

    /// The server refused the session token for a command.
    #[error("access token rejected while running {command}: {message}")]
    TokenRejected { command: String, message: String },

    /// A deadline elapsed.
    #[error("timed out after {after:?} {phase}")]
    Timeout { phase: TimeoutPhase, after: Duration },

    /// A well-framed payload that does not make sense, or an unmatched response.
    #[error("protocol error: {message}")]
    Protocol {
        message: String,
        raw: Option<String>,
    },

    /// The initial connection attempt failed.
    #[error("connection failed: {source}")]
    Connection { source: Box<RconError> },

    /// The retry budget ran out after a transport failure.
    #[error("{command} failed after {attempts} attempt(s): {source}")]
    CommandFailed {
        command: String,
        attempts: u32,
        source: Box<RconError>,
    },

    /// HTTP fallback failure (`status` is `None` when no response arrived).
    #[error("http error{}: {body}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http { status: Option<u16>, body: String },

    /// The session or client has been shut down.
    #[error("session closed")]
    Closed,

    /// The caller supplied an unusable request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No server is registered under this id.
    #[error("unknown server '{0}'")]
    UnknownServer(String),

    /// A session state change that the lifecycle does not allow.
    #[error("invalid session state transition {from:?} -> {to:?}")]
    InvalidState { from: SessionState, to: SessionState },

    /// JSON serialization failure while building a request.
    #[error("json error: {0}")]
    Json(#[source] Arc<serde_json::Error>),
}

impl RconError {
    /// Build a protocol error carrying the raw payload for diagnosis.
    pub fn protocol(message: impl Into<String>, raw: Option<&[u8]>) -> Self {
        RconError::Protocol {
            message: message.into(),
            raw: raw.map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    /// Shorthand for a transport-level "connection closed" failure.
    pub fn link_closed(reason: impl Into<String>) -> Self {
        TransportError::Closed(reason.into()).into()
    }

    /// Failures recovered by one reconnect-and-retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RconError::Transport(_) | RconError::TokenRejected { .. }
        )
    }

    /// Failures after which the session can no longer be trusted.
    pub fn poisons_session(&self) -> bool {
        matches!(
            self,
            RconError::Framing(_)
                | RconError::Transport(_)
                | RconError::TokenRejected { .. }
                | RconError::Timeout { .. }
        )
    }

    /// UI-facing classification. Wrapped failures take the class of their
    /// root cause.
    pub fn class(&self) -> ErrorClass {
        match self {
            RconError::Connection { source } | RconError::CommandFailed { source, .. } => {
                source.class()
            }
            RconError::Transport(_) | RconError::Http { .. } | RconError::Closed => {
                ErrorClass::Unreachable
            }
            RconError::Authentication { .. } | RconError::TokenRejected { .. } => {
                ErrorClass::Authentication
            }
            RconError::Timeout { .. } => ErrorClass::Timeout,
            RconError::Framing(_) | RconError::Protocol { .. } | RconError::Json(_) => {
                ErrorClass::Protocol
            }
            RconError::InvalidRequest(_)
            | RconError::UnknownServer(_)
            | RconError::InvalidState { .. } => ErrorClass::Usage,
        }
    }

    /// Raw payload attached to a protocol error, for operator logs.
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            RconError::Protocol { raw, .. } => raw.as_deref(),
            RconError::Connection { source } | RconError::CommandFailed { source, .. } => {
                source.raw_payload()
            }
            _ => None,
        }
    }

    /// Generic end-user text for this failure.
    pub fn user_message(&self) -> &'static str {
        match self.class() {
            ErrorClass::Unreachable => "could not reach the game server",
            ErrorClass::Authentication => "the game server refused our credentials",
            ErrorClass::Timeout => "the game server did not answer in time",
            ErrorClass::Protocol => "the game server sent an unexpected response",
            ErrorClass::Usage => "the request was not valid",
        }
    }
}

impl From<FrameError> for RconError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => RconError::Transport(Arc::new(TransportError::Io(io))),
            other => RconError::Framing(Arc::new(other)),
        }
    }
}

impl From<TransportError> for RconError {
    fn from(err: TransportError) -> Self {
        RconError::Transport(Arc::new(err))
    }
}

impl From<serde_json::Error> for RconError {
    fn from(err: serde_json::Error) -> Self {
        RconError::Json(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, RconError>;
