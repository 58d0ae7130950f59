//! Command/session layer for the MegaWiFi network coprocessor.
//!
//! Game code talks to [`Session`]: it owns the framer and the cooperative
//! scheduler, runs one command at a time on the control channel, and hands
//! socket and HTTP payload traffic to a data callback. [`sim`] provides a
//! protocol-complete coprocessor model for tests and demos.

pub mod error;
pub mod proto;
pub mod session;
pub mod sim;

pub use error::{Result, SessionError};
pub use proto::{
    ApEntry, ApSecurity, Command, FlashId, HttpMethod, HttpStatus, SockState, SysState,
    SysStatus, Version, AP_SLOTS, CMD_CAPACITY,
};
pub use session::{timeouts, DataCallback, Session};
pub use sim::SimCoprocessor;
