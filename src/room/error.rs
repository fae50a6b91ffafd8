use crate::room::types::RoomState;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Already in room {0}")]
    AlreadyInRoom(String),

    #[error("Not in a room")]
    NotInRoom,

    #[error("Only the host can {0}")]
    NotHost(&'static str),

    #[error("The host cannot {0}")]
    HostOnly(&'static str),

    #[error("Cannot {action} while room is {state:?}")]
    InvalidState {
        action: &'static str,
        state: RoomState,
    },

    #[error("Invalid room id: {0}")]
    InvalidRoomId(String),

    #[error("File index {index} outside 0..{count}")]
    FileIndexOutOfRange { index: u32, count: usize },

    #[error("A request is already waiting for the registry")]
    RequestPending,

    #[error("Registry connection closed")]
    Disconnected,
}

pub type RoomResult<T> = Result<T, RoomError>;
