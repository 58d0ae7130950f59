use bytes::{BufMut, Bytes, BytesMut};

use crate::channel::is_valid_channel;
use crate::error::{FrameError, Result};

/// Start- and end-of-frame marker. The same byte serves both roles.
pub const SENTINEL: u8 = 0x7E;

/// Maximum payload length: 12 bits on the wire.
pub const MAX_PAYLOAD: usize = 4095;

/// Fixed per-frame overhead: two sentinels plus two header bytes.
pub const FRAME_OVERHEAD: usize = 4;

/// One complete frame delivered by the receive side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this frame arrived on.
    pub channel: u8,
    /// The payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        FRAME_OVERHEAD + self.payload.len()
    }
}

/// Pack the channel/length header byte pair.
///
/// Byte 0 carries the channel in the high nibble and the top 4 bits of the
/// length in the low nibble; byte 1 carries the low 8 bits of the length.
pub(crate) fn pack_header(channel: u8, len: usize) -> [u8; 2] {
    debug_assert!(len <= MAX_PAYLOAD);
    [(channel << 4) | ((len >> 8) as u8 & 0x0F), (len & 0xFF) as u8]
}

/// Split the first header byte into channel and length high bits.
pub(crate) fn unpack_ch_len_hi(byte: u8) -> (u8, usize) {
    (byte >> 4, ((byte & 0x0F) as usize) << 8)
}

/// Encode one complete frame into `dst`.
///
/// Wire format:
/// ```text
/// ┌──────────┬────────────────────┬─────────┬────────────────┬──────────┐
/// │ 0x7E     │ ch<<4 | len>>8     │ len&0xFF│ payload        │ 0x7E     │
/// │ sentinel │ channel + len high │ len low │ (len bytes)    │ sentinel │
/// └──────────┴────────────────────┴─────────┴────────────────┴──────────┘
/// ```
///
/// The streaming send path in [`Lsd`] produces exactly these bytes one at a
/// time; this helper exists for peers and tests that hold the whole frame.
///
/// [`Lsd`]: crate::lsd::Lsd
pub fn encode_frame(channel: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if !is_valid_channel(channel) {
        return Err(FrameError::InvalidChannel(channel));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::FrameTooLong { len: payload.len() });
    }
    dst.reserve(FRAME_OVERHEAD + payload.len());
    dst.put_u8(SENTINEL);
    dst.put_slice(&pack_header(channel, payload.len()));
    dst.put_slice(payload);
    dst.put_u8(SENTINEL);
    Ok(())
}
