use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Session to {0} is closed")]
    SessionClosed(String),

    #[error("Session to {0} is not open yet")]
    NotOpen(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Send buffer to {peer} did not drain below {threshold} bytes within {waited:?}")]
    DrainTimeout {
        peer: String,
        threshold: usize,
        waited: Duration,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;
