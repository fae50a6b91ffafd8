use crate::protocol::{AckRejection, ChannelError, ProtocolError, TimeoutError};
use crate::transport::TransportError;
use thiserror::Error;

/// Failures caused by the local side rather than the peer or the link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("Source {name} is no longer available: {reason}")]
    SourceUnavailable { name: String, reason: String },

    #[error("Reading {name} bytes {start}..{end} failed: {reason}")]
    SourceRead {
        name: String,
        start: u64,
        end: u64,
        reason: String,
    },

    #[error("Artifact stream failed: {0}")]
    Sink(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Application error: {0}")]
    Application(#[from] ApplicationError),

    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl From<ChannelError> for TransferError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Transport(e) => TransferError::Transport(e),
            ChannelError::Protocol(e) => TransferError::Protocol(e),
            ChannelError::Timeout(e) => TransferError::Timeout(e),
        }
    }
}

impl TransferError {
    /// Map a rejected ack waiter onto the error that caused it.
    pub fn from_rejection(rejection: AckRejection, peer: &str) -> Self {
        match rejection {
            AckRejection::SessionClosed => {
                TransferError::Transport(TransportError::SessionClosed(peer.to_string()))
            }
            AckRejection::Cancelled(reason) => TransferError::Cancelled(reason),
            AckRejection::Reset => TransferError::Cancelled("acknowledgments reset".into()),
        }
    }

    /// Short label used for metrics and logs.
    pub fn category(&self) -> &'static str {
        match self {
            TransferError::Transport(_) => "transport",
            TransferError::Protocol(_) => "protocol",
            TransferError::Application(_) => "application",
            TransferError::Timeout(_) => "timeout",
            TransferError::Cancelled(_) => "cancelled",
            TransferError::InvalidStateTransition(_) => "state",
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;
