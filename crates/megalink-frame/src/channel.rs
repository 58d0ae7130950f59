//! Channel IDs multiplexed over one physical link.
//!
//! Channel 0 is reserved for command/reply traffic with the coprocessor and
//! the last channel for HTTP passthrough; the rest carry socket data.

/// Number of logical channels on one link.
pub const MAX_CHANNELS: u8 = 4;

/// Command/reply traffic with the coprocessor.
pub const CTRL_CHANNEL: u8 = 0;

/// HTTP request/response body passthrough.
pub const HTTP_CHANNEL: u8 = MAX_CHANNELS - 1;

/// Returns true if the channel ID fits on the wire and in the channel table.
pub fn is_valid_channel(ch: u8) -> bool {
    ch < MAX_CHANNELS
}

/// Returns a human-readable name for a channel ID.
pub fn channel_name(ch: u8) -> &'static str {
    match ch {
        CTRL_CHANNEL => "CTRL",
        HTTP_CHANNEL => "HTTP",
        _ if is_valid_channel(ch) => "DATA",
        _ => "INVALID",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_channels_named() {
        assert_eq!(channel_name(CTRL_CHANNEL), "CTRL");
        assert_eq!(channel_name(HTTP_CHANNEL), "HTTP");
        assert_eq!(channel_name(1), "DATA");
        assert_eq!(channel_name(MAX_CHANNELS), "INVALID");
    }
}
