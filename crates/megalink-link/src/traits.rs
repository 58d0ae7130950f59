use crate::error::Result;

/// One physical duplex byte link to a network coprocessor.
///
/// This is the narrow contract every adapter driver implements. The framing
/// layer never touches hardware directly: it asks `read_ready`/`write_ready`
/// and moves single bytes, so a driver can map these straight onto its
/// status and data registers.
///
/// `read` returns `None` when no byte is pending; callers normally gate it
/// on `read_ready`. `write` may fail with [`LinkError::Overrun`] when called
/// while `write_ready` is false.
///
/// [`LinkError::Overrun`]: crate::error::LinkError::Overrun
pub trait ByteLink {
    /// One-time bring-up of the adapter.
    fn init(&mut self) -> Result<()>;

    /// Whether an adapter is physically attached and answering.
    fn is_present(&self) -> bool;

    /// Whether at least one received byte is pending.
    fn read_ready(&self) -> bool;

    /// Whether the link can accept at least one outgoing byte.
    fn write_ready(&self) -> bool;

    /// Take one received byte, or `None` when nothing is pending.
    fn read(&mut self) -> Option<u8>;

    /// Queue one byte for transmission.
    fn write(&mut self, byte: u8) -> Result<()>;

    /// Capacity of the peer-side buffer, in bytes.
    ///
    /// Bulk transfers chunk their data to this size.
    fn buffer_len(&self) -> usize;

    /// Maximum number of bytes to write per burst before re-checking
    /// readiness.
    fn tx_burst_len(&self) -> usize;
}
