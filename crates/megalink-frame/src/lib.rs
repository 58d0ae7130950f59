//! Sentinel-delimited frame multiplexing (LSD) over a serial byte link.
//!
//! This is the core value-add layer of megalink. Every frame on the wire is:
//! - A sentinel byte (0x7E) marking start of frame
//! - One byte carrying the 4-bit channel and the top 4 bits of the length
//! - The low 8 bits of the length (12-bit lengths, max 4095)
//! - The payload
//! - The same sentinel byte marking end of frame
//!
//! [`Lsd`] drives both directions with non-blocking state machines pumped by
//! [`Lsd::process`]; completions surface as [`LsdEvent`]s. Blocking
//! conveniences loop `process()` and are safe only when the peer is known to
//! respond.

pub mod channel;
pub mod codec;
pub mod error;
pub mod lsd;

pub use channel::{channel_name, is_valid_channel, CTRL_CHANNEL, HTTP_CHANNEL, MAX_CHANNELS};
pub use codec::{encode_frame, Frame, FRAME_OVERHEAD, MAX_PAYLOAD, SENTINEL};
pub use error::{FrameError, Result};
pub use lsd::{Lsd, LsdEvent, Received};
