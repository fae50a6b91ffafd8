use crate::transfer::TransferError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Broadcast needs at least one peer")]
    NoPeers,

    #[error("Peer {0} appears more than once")]
    DuplicatePeer(String),

    #[error("Peer {peer} failed: {source}")]
    Peer {
        peer: String,
        #[source]
        source: TransferError,
    },

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl BroadcastError {
    pub fn peer(peer: &str, source: impl Into<TransferError>) -> Self {
        BroadcastError::Peer {
            peer: peer.to_string(),
            source: source.into(),
        }
    }

    /// Underlying transfer error, if any.
    pub fn transfer_error(&self) -> Option<&TransferError> {
        match self {
            BroadcastError::NoPeers | BroadcastError::DuplicatePeer(_) => None,
            BroadcastError::Peer { source, .. } => Some(source),
            BroadcastError::Transfer(e) => Some(e),
        }
    }
}

pub type BroadcastResult<T> = Result<T, BroadcastError>;
