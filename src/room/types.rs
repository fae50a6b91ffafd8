use crate::protocol::FileMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Transferring,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Host,
    Member,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Waiting,
    Receiving,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub device_id: String,
    pub display_name: String,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
}

impl RoomMember {
    pub fn new(device_id: impl Into<String>, display_name: impl Into<String>, role: MemberRole) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: display_name.into(),
            role,
            status: MemberStatus::Waiting,
            joined_at: Utc::now(),
            progress: None,
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == MemberRole::Host
    }
}

/// Registry-owned room snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: String,
    pub host_device_id: String,
    pub members: Vec<RoomMember>,
    #[serde(default)]
    pub file_list: Vec<FileMetadata>,
    pub status: RoomStatus,
}

impl Room {
    pub fn new(id: impl Into<String>, host: RoomMember, file_list: Vec<FileMetadata>) -> Self {
        Self {
            id: id.into(),
            host_device_id: host.device_id.clone(),
            members: vec![host],
            file_list,
            status: RoomStatus::Waiting,
        }
    }

    pub fn member(&self, device_id: &str) -> Option<&RoomMember> {
        self.members.iter().find(|m| m.device_id == device_id)
    }

    pub fn member_mut(&mut self, device_id: &str) -> Option<&mut RoomMember> {
        self.members.iter_mut().find(|m| m.device_id == device_id)
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.member(device_id).is_some()
    }

    pub fn is_host(&self, device_id: &str) -> bool {
        self.host_device_id == device_id
    }

    /// Members other than the host.
    pub fn recipients(&self) -> impl Iterator<Item = &RoomMember> {
        self.members.iter().filter(|m| !m.is_host())
    }

    /// True once at least one recipient exists and all of them completed.
    pub fn all_recipients_completed(&self) -> bool {
        let mut recipients = self.recipients().peekable();
        recipients.peek().is_some() && recipients.all(|m| m.status == MemberStatus::Completed)
    }

    pub fn total_size(&self) -> u64 {
        self.file_list.iter().map(|f| f.size).sum()
    }
}

/// Client-side view of where this device stands with respect to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    None,
    Waiting,
    Transferring,
    Completed,
    Destroyed,
}

impl From<RoomStatus> for RoomState {
    fn from(status: RoomStatus) -> Self {
        match status {
            RoomStatus::Waiting => RoomState::Waiting,
            RoomStatus::Transferring => RoomState::Transferring,
            RoomStatus::Completed => RoomState::Completed,
        }
    }
}

/// How files should flow given the current room membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMode {
    /// No room: one sender, one receiver
    Direct,
    /// Host sends to every other member in lockstep
    Broadcast { targets: Vec<String> },
    /// Member requests individual files from the host
    Pull { host: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    Joined { room: Room, is_host: bool },
    Updated(Room),
    BroadcastStarted(Room),
    Completed(Room),
    Closed { room_id: String, reason: String },
    Error(String),
    FileRequested { from: String, file_index: u32 },
}
