use crate::codec::MAX_PAYLOAD;

/// Errors that can occur while framing or deframing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in a 12-bit length field.
    #[error("frame too long ({len} bytes, max {MAX_PAYLOAD})")]
    FrameTooLong { len: usize },

    /// The channel ID does not exist.
    #[error("invalid channel {0}")]
    InvalidChannel(u8),

    /// The channel exists but is not enabled.
    #[error("channel {0} disabled")]
    ChannelDisabled(u8),

    /// A send was started while another is still in flight.
    #[error("send already in progress")]
    SendInProgress,

    /// A receive was armed while another is still in flight.
    #[error("receive already armed")]
    RecvInProgress,

    /// A receive was armed with a zero-capacity buffer.
    #[error("receive buffer capacity must be nonzero")]
    EmptyBuffer,

    /// The byte after the payload was not the end-of-frame sentinel.
    #[error("bad frame terminator (expected sentinel, got {0:#04x})")]
    BadTerminator(u8),

    /// The underlying byte link failed.
    #[error("link error: {0}")]
    Link(#[from] megalink_link::LinkError),
}

pub type Result<T> = std::result::Result<T, FrameError>;
