use crate::protocol::{ChannelError, ProtocolError, TimeoutError};
use crate::queue::types::QueueItemStatus;
use crate::transfer::TransferError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue has no files")]
    Empty,

    #[error("Queue item {index} cannot go from {from:?} to {to:?}")]
    InvalidStatus {
        index: u32,
        from: QueueItemStatus,
        to: QueueItemStatus,
    },

    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
}

impl From<ChannelError> for QueueError {
    fn from(err: ChannelError) -> Self {
        QueueError::Transfer(err.into())
    }
}

impl From<ProtocolError> for QueueError {
    fn from(err: ProtocolError) -> Self {
        QueueError::Transfer(err.into())
    }
}

impl From<TimeoutError> for QueueError {
    fn from(err: TimeoutError) -> Self {
        QueueError::Transfer(err.into())
    }
}

impl From<TransportError> for QueueError {
    fn from(err: TransportError) -> Self {
        QueueError::Transfer(err.into())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
