/// Errors that can occur on a byte link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// No adapter answered presence detection.
    #[error("no link adapter detected")]
    NotPresent,

    /// The link was used before `init()` completed.
    #[error("link not initialized")]
    NotInitialized,

    /// A byte was written while the peer-side buffer was full.
    #[error("link write overrun (peer buffer full)")]
    Overrun,

    /// The other endpoint of the link is gone.
    #[error("link closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, LinkError>;
