use std::io;
use thiserror::Error;

/// Adapter errors
///
/// Cloneable because a terminal error is recorded once and handed to every
/// subsequent read, write and close.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("ws.dial: {0}")]
    ConnectFailed(String),

    #[error("connection closed with code {code}")]
    ClosedBeforeOpen { code: u16 },

    #[error("connection failed, see console")]
    ConnectFailedSeeConsole,

    #[error("connect cancelled")]
    Cancelled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<AdapterError> for io::Error {
    fn from(err: AdapterError) -> Self {
        let kind = match err {
            AdapterError::ConnectionClosed => io::ErrorKind::ConnectionAborted,
            AdapterError::Cancelled => io::ErrorKind::Interrupted,
            AdapterError::ClosedBeforeOpen { .. }
            | AdapterError::ConnectFailed(_)
            | AdapterError::ConnectFailedSeeConsole => io::ErrorKind::ConnectionRefused,
            AdapterError::Transport(_) | AdapterError::SendFailed(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
