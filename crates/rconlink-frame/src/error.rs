/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The configured header width cannot describe a length.
    #[error("invalid frame header width {0} (expected 1..=8 bytes)")]
    InvalidHeaderWidth(usize),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream closed before the declared payload length was satisfied.
    #[error("connection closed (incomplete frame, {buffered} bytes buffered)")]
    ConnectionClosed { buffered: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
