use std::fmt;
use std::io;

use rconlink_session::{ErrorClass, RconError};
use tracing::warn;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
/// The server answered and refused the command.
pub const REJECTED: i32 = 2;
pub const TRANSPORT_ERROR: i32 = 3;
pub const AUTHENTICATION: i32 = 4;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => USAGE,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn class_code(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Unreachable => TRANSPORT_ERROR,
        ErrorClass::Authentication => AUTHENTICATION,
        ErrorClass::Timeout => TIMEOUT,
        ErrorClass::Protocol => DATA_INVALID,
        ErrorClass::Usage => USAGE,
    }
}

/// Map a client error to an exit code and a one-line message.
///
/// Protocol-class failures are logged with the raw payload so operators can
/// diagnose them; the printed line stays generic.
pub fn rcon_error(context: &str, err: RconError) -> CliError {
    let class = err.class();
    if let Some(raw) = err.raw_payload() {
        warn!(error = %err, raw, "{context}");
    }
    let message = match class {
        ErrorClass::Protocol => format!("{context}: {}", err.user_message()),
        _ => format!("{context}: {} ({err})", err.user_message()),
    };
    CliError::new(class_code(class), message)
}
