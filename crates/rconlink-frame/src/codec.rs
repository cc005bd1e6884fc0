use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Default header width: a 4-byte unsigned length.
pub const DEFAULT_HEADER_WIDTH: usize = 4;

/// Default maximum payload size accepted from the wire (~32 MB).
pub const DEFAULT_MAX_PAYLOAD: usize = 32_000_000;

/// Byte order of the length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Shape of the length header that precedes every payload.
///
/// Wire format (default):
/// ```text
/// ┌───────────────────┬──────────────────────────┐
/// │ Length (4B BE)    │ Payload (Length bytes)   │
/// │ unsigned          │ UTF-8 JSON envelope      │
/// └───────────────────┴──────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    /// Header width in bytes, 1..=8.
    pub header_width: usize,
    /// Byte order of the header.
    pub byte_order: ByteOrder,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            header_width: DEFAULT_HEADER_WIDTH,
            byte_order: ByteOrder::Big,
        }
    }
}

impl FrameFormat {
    /// Create a format with an explicit width and byte order.
    pub fn new(header_width: usize, byte_order: ByteOrder) -> Result<Self> {
        let format = Self {
            header_width,
            byte_order,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check that the header width can hold a length.
    pub fn validate(&self) -> Result<()> {
        if (1..=8).contains(&self.header_width) {
            Ok(())
        } else {
            Err(FrameError::InvalidHeaderWidth(self.header_width))
        }
    }

    /// Largest payload length the header can express.
    pub fn max_representable(&self) -> u64 {
        if self.header_width >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.header_width * 8)) - 1
        }
    }

    fn read_length(&self, mut header: &[u8]) -> u64 {
        match self.byte_order {
            ByteOrder::Big => header.get_uint(self.header_width),
            ByteOrder::Little => header.get_uint_le(self.header_width),
        }
    }

    fn write_length(&self, len: u64, dst: &mut BytesMut) {
        match self.byte_order {
            ByteOrder::Big => dst.put_uint(len, self.header_width),
            ByteOrder::Little => dst.put_uint_le(len, self.header_width),
        }
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Header layout.
    pub format: FrameFormat,
    /// Maximum payload size in bytes. Default: 32 MB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Encode a payload into the wire format.
pub fn encode_frame(payload: &[u8], format: &FrameFormat, dst: &mut BytesMut) -> Result<()> {
    format.validate()?;
    let len = payload.len() as u64;
    if len > format.max_representable() {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: format.max_representable(),
        });
    }
    dst.reserve(format.header_width + payload.len());
    format.write_length(len, dst);
    dst.put_slice(payload);
    Ok(())
}

/// Decode one payload from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Bytes>> {
    let format = &config.format;
    format.validate()?;

    let width = format.header_width;
    if src.len() < width {
        return Ok(None);
    }

    let declared = format.read_length(&src[..width]);
    let max = config.max_payload_size as u64;
    if declared > max {
        return Err(FrameError::PayloadTooLarge {
            size: declared,
            max,
        });
    }

    let payload_len = declared as usize;
    let total = width + payload_len;
    if src.len() < total {
        // Bounded by the ceiling check above.
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(width);
    Ok(Some(src.split_to(payload_len).freeze()))
}
