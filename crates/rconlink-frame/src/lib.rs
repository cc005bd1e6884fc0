//! Length-prefixed framing for RCON byte streams.
//!
//! Every payload on the wire is preceded by a fixed-width unsigned length
//! header. The default deployment uses a 4-byte big-endian header followed by
//! UTF-8 JSON, but both the width and byte order are configurable so callers
//! never need to know which framing a given server build speaks.
//!
//! Decoding never blocks: partial input is buffered until a whole frame is
//! available, and oversized length fields are rejected before anything is
//! allocated for them.

pub mod codec;
pub mod error;
pub mod framed;

pub use codec::{
    decode_frame, encode_frame, ByteOrder, FrameConfig, FrameFormat, DEFAULT_HEADER_WIDTH,
    DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use framed::RconCodec;
