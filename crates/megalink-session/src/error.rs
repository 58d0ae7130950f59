use megalink_frame::FrameError;

/// Errors returned to game code by session operations.
///
/// Statuses are returned synchronously; nothing here retries or reconnects —
/// that policy belongs to the application.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The coprocessor answered with an error reply.
    #[error("command failed")]
    Failed,

    /// The session was used before `init()` succeeded, or no coprocessor is
    /// attached.
    #[error("session not ready")]
    NotReady,

    /// The reply does not fit in the command buffer.
    #[error("reply larger than command buffer")]
    BufferTooShort,

    /// An argument is out of range for the operation.
    #[error("bad parameter")]
    BadParam,

    /// The request could not be transmitted.
    #[error("send failed")]
    SendFailed,

    /// A reply arrived but could not be understood.
    #[error("malformed reply")]
    RecvFailed,

    /// No reply arrived within the deadline. Distinct from protocol errors;
    /// the receive side is left armed.
    #[error("timed out waiting for reply")]
    RecvTimeout,

    /// The framing layer failed.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, SessionError>;
