//! Networking stack for the MegaWiFi console coprocessor.
//!
//! Everything a game needs to talk to the network coprocessor over one
//! serial line: sentinel-delimited frame multiplexing, a command/session
//! protocol, and a cooperative scheduler that shares the CPU between the
//! game loop and the link.
//!
//! # Crate Structure
//!
//! - [`link`] — Byte-transport capability contract and the in-memory loopback
//! - [`frame`] — LSD framing: addressed, length-delimited frames over one link
//! - [`task`] — Cooperative supervisor/user scheduler driven by a tick source
//! - [`session`] — Command protocol, session management, and the coprocessor sim

/// Re-export byte-link types.
pub mod link {
    pub use megalink_link::*;
}

/// Re-export framing types.
pub mod frame {
    pub use megalink_frame::*;
}

/// Re-export scheduler types.
pub mod task {
    pub use megalink_task::*;
}

/// Re-export session types.
pub mod session {
    pub use megalink_session::*;
}
