//! Byte-transport capability contract for console network adapters.
//!
//! This is the lowest layer of megalink. A [`ByteLink`] is one physical
//! duplex serial link to a network coprocessor: presence detection plus
//! ready/read/write primitives. Everything above (framing, sessions) is
//! written against the trait, so any adapter driver is substitutable.
//!
//! Concrete hardware drivers live with the hardware SDKs; this crate only
//! ships [`LoopbackLink`], an in-memory pair used by tests and demos.

pub mod error;
pub mod loopback;
pub mod traits;

pub use error::{LinkError, Result};
pub use loopback::{LoopbackConfig, LoopbackLink};
pub use traits::ByteLink;
