use std::fmt;
use std::time::Duration;

use rconlink_frame::FrameConfig;
use rconlink_transport::Endpoint;

/// Envelope protocol version sent with every command.
pub const PROTOCOL_VERSION: i64 = 2;

/// Default body key for the token when it travels inside the body.
pub const DEFAULT_TOKEN_BODY_KEY: &str = "Token";

/// Default top-level field for the token when it travels beside the body.
pub const DEFAULT_TOKEN_HEADER_FIELD: &str = "authToken";

/// Default top-level field carrying explicit correlation identifiers.
pub const DEFAULT_CORRELATION_FIELD: &str = "requestId";

/// Command used for the login handshake.
pub const DEFAULT_LOGIN_COMMAND: &str = "Login";

/// Command used to list the server's supported commands.
pub const DEFAULT_INTROSPECTION_COMMAND: &str = "GetDisplayableCommands";

/// Where the session token is attached on outbound envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPlacement {
    /// Top-level envelope field next to `command`/`version`/`body`.
    Header { field: String },
    /// Reserved key injected into the command body.
    Body { key: String },
}

impl TokenPlacement {
    pub fn header() -> Self {
        TokenPlacement::Header {
            field: DEFAULT_TOKEN_HEADER_FIELD.to_string(),
        }
    }

    pub fn body() -> Self {
        TokenPlacement::Body {
            key: DEFAULT_TOKEN_BODY_KEY.to_string(),
        }
    }
}

impl Default for TokenPlacement {
    fn default() -> Self {
        Self::body()
    }
}

/// How responses are matched to requests.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CorrelationMode {
    /// The wire carries no identifier; responses arrive in request order and
    /// at most one request is outstanding.
    #[default]
    Ordered,
    /// Identifiers travel in a top-level envelope field and are echoed back.
    Explicit { field: String },
}

impl CorrelationMode {
    pub fn explicit() -> Self {
        CorrelationMode::Explicit {
            field: DEFAULT_CORRELATION_FIELD.to_string(),
        }
    }

    /// Response field to read the identifier from, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            CorrelationMode::Ordered => None,
            CorrelationMode::Explicit { field } => Some(field),
        }
    }
}

/// Login credentials. Redacted in debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: String,
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            username: None,
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field(
                "password",
                &format_args!("<redacted:{} bytes>", self.password.len()),
            )
            .finish()
    }
}

/// Everything needed to open and authenticate one session.
///
/// Immutable for the lifetime of a client; reconnects reuse it unchanged.
#[derive(Debug, Clone)]
pub struct ConnectionDescriptor {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    /// Wrap the TCP stream in TLS.
    pub tls: bool,
    pub token_placement: TokenPlacement,
    pub correlation: CorrelationMode,
    pub frame: FrameConfig,
    /// Bound on socket open plus login.
    pub login_timeout: Duration,
    pub login_command: String,
    pub introspection_command: String,
    pub protocol_version: i64,
}

impl ConnectionDescriptor {
    pub fn new(host: impl Into<String>, port: u16, credentials: Credentials) -> Self {
        Self {
            endpoint: Endpoint::new(host, port),
            credentials,
            tls: false,
            token_placement: TokenPlacement::default(),
            correlation: CorrelationMode::default(),
            frame: FrameConfig::default(),
            login_timeout: Duration::from_secs(10),
            login_command: DEFAULT_LOGIN_COMMAND.to_string(),
            introspection_command: DEFAULT_INTROSPECTION_COMMAND.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_token_placement(mut self, placement: TokenPlacement) -> Self {
        self.token_placement = placement;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationMode) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }
}
