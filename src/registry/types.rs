use crate::protocol::FileMetadata;
use crate::room::{MemberStatus, Room};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `room-error` text sent to the remaining members when a room is closed.
/// Every other `room-error` rejects a single request and leaves the room as
/// it was.
pub const ROOM_CLOSED: &str = "Host left the room";

/// A device announced to the registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub display_name: String,
    pub last_seen_at: DateTime<Utc>,
}

/// Messages exchanged with the registry, carried as JSON text frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RegistryMessage {
    Register {
        device_id: String,
        device_name: String,
    },
    DeviceList {
        devices: Vec<Device>,
    },
    Heartbeat,
    CreateRoom {
        device_id: String,
        device_name: String,
        file_info: Option<FileMetadata>,
        #[serde(default)]
        file_list: Option<Vec<FileMetadata>>,
    },
    RoomUpdate {
        room: Room,
    },
    JoinRoom {
        device_id: String,
        device_name: String,
        room_id: String,
    },
    RoomError {
        error: String,
    },
    LeaveRoom {
        device_id: String,
        room_id: String,
    },
    StartBroadcast {
        room_id: String,
    },
    UpdateRoomFiles {
        room_id: String,
        file_list: Vec<FileMetadata>,
    },
    RequestFile {
        room_id: String,
        device_id: String,
        file_index: u32,
    },
    FileRequest {
        from: String,
        file_index: u32,
    },
    UpdateMemberStatus {
        room_id: String,
        device_id: String,
        status: MemberStatus,
        #[serde(default)]
        progress: Option<f32>,
    },
}

impl RegistryMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryMessage::Register { .. } => "register",
            RegistryMessage::DeviceList { .. } => "device-list",
            RegistryMessage::Heartbeat => "heartbeat",
            RegistryMessage::CreateRoom { .. } => "create-room",
            RegistryMessage::RoomUpdate { .. } => "room-update",
            RegistryMessage::JoinRoom { .. } => "join-room",
            RegistryMessage::RoomError { .. } => "room-error",
            RegistryMessage::LeaveRoom { .. } => "leave-room",
            RegistryMessage::StartBroadcast { .. } => "start-broadcast",
            RegistryMessage::UpdateRoomFiles { .. } => "update-room-files",
            RegistryMessage::RequestFile { .. } => "request-file",
            RegistryMessage::FileRequest { .. } => "file-request",
            RegistryMessage::UpdateMemberStatus { .. } => "update-member-status",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interval between heartbeats while connected
    pub heartbeat_interval: Duration,

    /// Registry side: a device silent for this long is dropped
    pub heartbeat_timeout: Duration,

    /// Reconnect delay, multiplied by the attempt number
    pub reconnect_delay: Duration,

    /// Consecutive failed reconnects before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 5,
        }
    }
}

impl RegistryConfig {
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
