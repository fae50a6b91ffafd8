use crate::protocol::FileMetadata;
use crate::registry::{RegistryMessage, ROOM_CLOSED};
use crate::room::error::{RoomError, RoomResult};
use crate::room::types::{MemberStatus, Room, RoomEvent, RoomState, TransferMode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Room ids are six ASCII digits.
pub fn is_valid_room_id(room_id: &str) -> bool {
    room_id.len() == 6 && room_id.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Create,
    Join(String),
}

/// Client-side mirror of the room this device belongs to.
///
/// Every mutation is proposed to the registry through `outbound` and takes
/// effect only when the registry echoes an authoritative `room-update`.
/// Leaving is the one exception: the leaver stops mirroring the room as soon
/// as it asks to leave.
pub struct RoomCoordinator {
    device_id: String,
    display_name: String,
    outbound: mpsc::UnboundedSender<RegistryMessage>,
    room: Option<Room>,
    state: RoomState,
    pending: Option<Pending>,
}

impl RoomCoordinator {
    pub fn new(
        device_id: impl Into<String>,
        display_name: impl Into<String>,
        outbound: mpsc::UnboundedSender<RegistryMessage>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: display_name.into(),
            outbound,
            room: None,
            state: RoomState::None,
            pending: None,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn is_host(&self) -> bool {
        self.room
            .as_ref()
            .is_some_and(|room| room.is_host(&self.device_id))
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Decide how files should move given current membership.
    pub fn transfer_mode(&self) -> TransferMode {
        match &self.room {
            None => TransferMode::Direct,
            Some(room) if room.is_host(&self.device_id) => TransferMode::Broadcast {
                targets: room.recipients().map(|m| m.device_id.clone()).collect(),
            },
            Some(room) => TransferMode::Pull {
                host: room.host_device_id.clone(),
            },
        }
    }

    /// Propose a new room with this device as host.
    pub fn create_room(&mut self, file_list: Vec<FileMetadata>) -> RoomResult<()> {
        self.ensure_free()?;
        self.propose(RegistryMessage::CreateRoom {
            device_id: self.device_id.clone(),
            device_name: self.display_name.clone(),
            file_info: file_list.first().cloned(),
            file_list: Some(file_list),
        })?;
        self.pending = Some(Pending::Create);
        Ok(())
    }

    pub fn join_room(&mut self, room_id: &str) -> RoomResult<()> {
        if !is_valid_room_id(room_id) {
            return Err(RoomError::InvalidRoomId(room_id.to_string()));
        }
        self.ensure_free()?;
        self.propose(RegistryMessage::JoinRoom {
            device_id: self.device_id.clone(),
            device_name: self.display_name.clone(),
            room_id: room_id.to_string(),
        })?;
        self.pending = Some(Pending::Join(room_id.to_string()));
        Ok(())
    }

    pub fn leave_room(&mut self) -> RoomResult<()> {
        let room = self.room.take().ok_or(RoomError::NotInRoom)?;
        let was_host = room.is_host(&self.device_id);

        self.propose(RegistryMessage::LeaveRoom {
            device_id: self.device_id.clone(),
            room_id: room.id.clone(),
        })?;

        self.state = if was_host {
            RoomState::Destroyed
        } else {
            RoomState::None
        };
        info!(room_id = %room.id, was_host, "Left room");
        Ok(())
    }

    /// Host only, while the room is waiting.
    pub fn start_broadcast(&mut self) -> RoomResult<()> {
        let room_id = self.host_room_in_waiting("start a broadcast")?;
        self.propose(RegistryMessage::StartBroadcast { room_id })
    }

    /// Replace the room's file list. Host only, while the room is waiting.
    pub fn update_files(&mut self, file_list: Vec<FileMetadata>) -> RoomResult<()> {
        let room_id = self.host_room_in_waiting("change the file list")?;
        self.propose(RegistryMessage::UpdateRoomFiles { room_id, file_list })
    }

    /// Share this device's receive status with the room.
    pub fn report_status(&mut self, status: MemberStatus, progress: Option<f32>) -> RoomResult<()> {
        let room = self.room.as_ref().ok_or(RoomError::NotInRoom)?;
        let message = RegistryMessage::UpdateMemberStatus {
            room_id: room.id.clone(),
            device_id: self.device_id.clone(),
            status,
            progress,
        };
        self.propose(message)
    }

    /// Ask the host to send one file from the room's list.
    pub fn request_file(&mut self, file_index: u32) -> RoomResult<()> {
        let room = self.room.as_ref().ok_or(RoomError::NotInRoom)?;
        if room.is_host(&self.device_id) {
            return Err(RoomError::HostOnly("request files from itself"));
        }
        if file_index as usize >= room.file_list.len() {
            return Err(RoomError::FileIndexOutOfRange {
                index: file_index,
                count: room.file_list.len(),
            });
        }
        let message = RegistryMessage::RequestFile {
            room_id: room.id.clone(),
            device_id: self.device_id.clone(),
            file_index,
        };
        self.propose(message)
    }

    /// Apply a message relayed by the registry.
    pub fn handle_registry_message(&mut self, message: RegistryMessage) -> Option<RoomEvent> {
        match message {
            RegistryMessage::RoomUpdate { room } => self.apply_snapshot(room),
            RegistryMessage::RoomError { error } => Some(self.apply_error(error)),
            RegistryMessage::FileRequest { from, file_index } if self.is_host() => {
                debug!(from = %from, file_index, "File requested");
                Some(RoomEvent::FileRequested { from, file_index })
            }
            RegistryMessage::FileRequest { from, .. } => {
                warn!(from = %from, "Ignoring file request while not hosting");
                None
            }
            _ => None,
        }
    }

    fn apply_snapshot(&mut self, room: Room) -> Option<RoomEvent> {
        let ours = self.room.as_ref().is_some_and(|r| r.id == room.id);
        let awaited = match &self.pending {
            Some(Pending::Create) => room.is_host(&self.device_id),
            Some(Pending::Join(id)) => *id == room.id,
            None => false,
        };

        if !ours && !awaited {
            debug!(room_id = %room.id, "Ignoring update for another room");
            return None;
        }

        if !room.contains(&self.device_id) {
            // Removed by the registry
            self.room = None;
            self.pending = None;
            self.state = RoomState::Destroyed;
            return Some(RoomEvent::Closed {
                room_id: room.id,
                reason: "removed from room".to_string(),
            });
        }

        let previous = self.state;
        self.state = room.status.into();
        self.room = Some(room.clone());

        if awaited && !ours {
            self.pending = None;
            let is_host = room.is_host(&self.device_id);
            info!(room_id = %room.id, is_host, members = room.members.len(), "Entered room");
            return Some(RoomEvent::Joined { room, is_host });
        }

        match (previous, self.state) {
            (RoomState::Waiting, RoomState::Transferring) => {
                info!(room_id = %room.id, "Room started transferring");
                Some(RoomEvent::BroadcastStarted(room))
            }
            (prev, RoomState::Completed) if prev != RoomState::Completed => {
                info!(room_id = %room.id, "Room completed");
                Some(RoomEvent::Completed(room))
            }
            _ => Some(RoomEvent::Updated(room)),
        }
    }

    fn apply_error(&mut self, error: String) -> RoomEvent {
        if self.pending.take().is_some() {
            warn!(error = %error, "Room request rejected");
            return RoomEvent::Error(error);
        }

        if error != ROOM_CLOSED {
            // The room outlives a rejected proposal
            warn!(room_id = ?self.room.as_ref().map(|r| &r.id), error = %error, "Room request rejected");
            return RoomEvent::Error(error);
        }

        match self.room.take() {
            Some(room) => {
                warn!(room_id = %room.id, error = %error, "Room closed by registry");
                self.state = RoomState::Destroyed;
                RoomEvent::Closed {
                    room_id: room.id,
                    reason: error,
                }
            }
            None => RoomEvent::Error(error),
        }
    }

    fn ensure_free(&self) -> RoomResult<()> {
        if let Some(room) = &self.room {
            return Err(RoomError::AlreadyInRoom(room.id.clone()));
        }
        if self.pending.is_some() {
            return Err(RoomError::RequestPending);
        }
        Ok(())
    }

    fn host_room_in_waiting(&self, action: &'static str) -> RoomResult<String> {
        let room = self.room.as_ref().ok_or(RoomError::NotInRoom)?;
        if !room.is_host(&self.device_id) {
            return Err(RoomError::NotHost(action));
        }
        if self.state != RoomState::Waiting {
            return Err(RoomError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(room.id.clone())
    }

    fn propose(&self, message: RegistryMessage) -> RoomResult<()> {
        debug!(kind = message.kind(), "Proposing to registry");
        self.outbound
            .send(message)
            .map_err(|_| RoomError::Disconnected)
    }
}
