pub mod coordinator;
pub mod error;
pub mod types;

pub use coordinator::{is_valid_room_id, RoomCoordinator};
pub use error::{RoomError, RoomResult};
pub use types::{
    MemberRole, MemberStatus, Room, RoomEvent, RoomMember, RoomState, RoomStatus, TransferMode,
};
