/// Errors that can occur in RCON transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// The host cannot be used as a TLS server name.
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    /// TLS was requested but this build has no TLS support.
    #[error("tls requested but rconlink-transport was built without the `tls` feature")]
    TlsUnavailable,

    /// The peer closed the stream.
    #[error("connection closed: {0}")]
    Closed(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
