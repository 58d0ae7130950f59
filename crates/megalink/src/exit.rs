use std::fmt;

use megalink_session::SessionError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const LINK_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    let code = match err {
        SessionError::RecvTimeout => TIMEOUT,
        SessionError::BadParam => USAGE,
        SessionError::NotReady | SessionError::SendFailed => LINK_ERROR,
        SessionError::RecvFailed | SessionError::BufferTooShort => DATA_INVALID,
        SessionError::Failed => FAILURE,
        SessionError::Frame(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}
