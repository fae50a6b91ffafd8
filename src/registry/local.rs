//! In-process registry service.
//!
//! Holds the device directory and the room table for every attached link and
//! answers [`RegistryMessage`]s the way a hosted registry would. Used for
//! tests and single-process deployments.

use crate::metrics::record_registry_eviction;
use crate::registry::client::{RegistryConnector, RegistryLink};
use crate::registry::error::RegistryResult;
use crate::registry::types::{Device, RegistryMessage, ROOM_CLOSED};
use crate::room::{MemberRole, MemberStatus, Room, RoomMember, RoomStatus};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct DeviceEntry {
    connection: u64,
    display_name: String,
    last_seen_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Inner {
    next_connection: AtomicU64,
    /// Kill switch per attached link
    connections: DashMap<u64, oneshot::Sender<()>>,
    devices: DashMap<String, DeviceEntry>,
    rooms: DashMap<String, Room>,
}

enum LeaveOutcome {
    NotMember,
    Updated(Room),
    /// Remaining members to notify
    Closed(Vec<String>),
}

#[derive(Clone, Default)]
pub struct LocalRegistry {
    inner: Arc<Inner>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection. Must be called inside a tokio runtime.
    pub fn attach(&self) -> RegistryLink {
        let connection = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        let (client_tx, registry_rx) = mpsc::unbounded_channel();
        let (registry_tx, client_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = oneshot::channel();
        self.inner.connections.insert(connection, kill_tx);

        tokio::spawn(self.clone().serve(connection, registry_tx, registry_rx, kill_rx));

        RegistryLink {
            outgoing: client_tx,
            incoming: client_rx,
        }
    }

    /// Drop the connection a device is registered on, as if the network
    /// went away. Returns false when the device is unknown.
    pub fn disconnect(&self, device_id: &str) -> bool {
        let connection = match self.inner.devices.get(device_id) {
            Some(entry) => entry.connection,
            None => return false,
        };
        match self.inner.connections.remove(&connection) {
            Some((_, kill)) => {
                let _ = kill.send(());
                true
            }
            None => false,
        }
    }

    /// Disconnect every device whose last heartbeat is older than
    /// `max_age`. Returns the evicted ids.
    pub fn evict_stale(&self, max_age: Duration) -> Vec<String> {
        let now = Utc::now();
        let stale: Vec<String> = self
            .inner
            .devices
            .iter()
            .filter(|entry| {
                (now - entry.last_seen_at)
                    .to_std()
                    .is_ok_and(|age| age > max_age)
            })
            .map(|entry| entry.key().clone())
            .collect();

        stale
            .into_iter()
            .filter(|device_id| {
                let evicted = self.disconnect(device_id);
                if evicted {
                    warn!(device_id = %device_id, ?max_age, "Evicting silent device");
                    record_registry_eviction();
                }
                evicted
            })
            .collect()
    }

    /// Periodically evict devices that missed heartbeats for
    /// `heartbeat_timeout`. The task ends once the registry is dropped.
    pub fn spawn_sweeper(&self, heartbeat_timeout: Duration) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = (heartbeat_timeout / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                LocalRegistry { inner }.evict_stale(heartbeat_timeout);
            }
        })
    }

    pub fn devices(&self) -> Vec<Device> {
        self.inner
            .devices
            .iter()
            .map(|entry| Device {
                id: entry.key().clone(),
                display_name: entry.display_name.clone(),
                last_seen_at: entry.last_seen_at,
            })
            .collect()
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.inner.rooms.get(room_id).map(|room| room.clone())
    }

    pub fn room_count(&self) -> usize {
        self.inner.rooms.len()
    }

    async fn serve(
        self,
        connection: u64,
        reply: mpsc::UnboundedSender<String>,
        mut incoming: mpsc::UnboundedReceiver<String>,
        mut kill: oneshot::Receiver<()>,
    ) {
        let mut device: Option<String> = None;

        loop {
            tokio::select! {
                _ = &mut kill => break,
                text = incoming.recv() => {
                    let Some(text) = text else { break };
                    match RegistryMessage::from_json(&text) {
                        Ok(message) => self.dispatch(connection, &reply, &mut device, message),
                        Err(e) => warn!(connection, error = %e, "Ignoring malformed registry message"),
                    }
                }
            }
        }

        self.detach(connection, device.as_deref());
    }

    fn dispatch(
        &self,
        connection: u64,
        reply: &mpsc::UnboundedSender<String>,
        device: &mut Option<String>,
        message: RegistryMessage,
    ) {
        debug!(connection, kind = message.kind(), "Registry message");

        let message = match message {
            RegistryMessage::Register {
                device_id,
                device_name,
            } => {
                info!(connection, device_id = %device_id, "Device registered");
                self.inner.devices.insert(
                    device_id.clone(),
                    DeviceEntry {
                        connection,
                        display_name: device_name,
                        last_seen_at: Utc::now(),
                        tx: reply.clone(),
                    },
                );
                *device = Some(device_id);
                self.broadcast_devices();
                return;
            }
            other => other,
        };

        let Some(me) = device.clone() else {
            respond_error(reply, "Device not registered");
            return;
        };

        match message {
            RegistryMessage::Heartbeat => {
                if let Some(mut entry) = self.inner.devices.get_mut(&me) {
                    entry.last_seen_at = Utc::now();
                }
            }
            RegistryMessage::CreateRoom {
                device_id,
                device_name,
                file_info,
                file_list,
            } => {
                if device_id != me {
                    return respond_error(reply, "Device id does not match connection");
                }
                if self.room_of(&me).is_some() {
                    return respond_error(reply, "Already in a room");
                }
                let files = file_list.unwrap_or_else(|| file_info.into_iter().collect());
                let room = Room::new(
                    self.fresh_room_id(),
                    RoomMember::new(me.clone(), device_name, MemberRole::Host),
                    files,
                );
                info!(room_id = %room.id, host = %me, files = room.file_list.len(), "Room created");
                self.inner.rooms.insert(room.id.clone(), room.clone());
                self.broadcast_room(&room);
            }
            RegistryMessage::JoinRoom {
                device_id,
                device_name,
                room_id,
            } => {
                if device_id != me {
                    return respond_error(reply, "Device id does not match connection");
                }
                if let Some(current) = self.room_of(&me) {
                    if current != room_id {
                        return respond_error(reply, "Already in a room");
                    }
                }
                let joined = self.update_room(&room_id, |room| {
                    if room.contains(&me) {
                        return Ok(room.clone());
                    }
                    if room.status != RoomStatus::Waiting {
                        return Err("Room is no longer accepting members");
                    }
                    room.members
                        .push(RoomMember::new(me.clone(), device_name, MemberRole::Member));
                    Ok(room.clone())
                });
                match joined {
                    Some(Ok(room)) => {
                        info!(room_id = %room.id, device_id = %me, members = room.members.len(), "Joined room");
                        self.broadcast_room(&room);
                    }
                    Some(Err(error)) => respond_error(reply, error),
                    None => respond_error(reply, "Room not found"),
                }
            }
            RegistryMessage::LeaveRoom { device_id, room_id } => {
                if device_id != me {
                    return respond_error(reply, "Device id does not match connection");
                }
                self.leave(&me, &room_id);
            }
            RegistryMessage::StartBroadcast { room_id } => {
                let started = self.update_room(&room_id, |room| {
                    if !room.is_host(&me) {
                        return Err("Only the host can start the transfer");
                    }
                    if room.status != RoomStatus::Waiting {
                        return Err("Transfer already started");
                    }
                    room.status = RoomStatus::Transferring;
                    for member in room.members.iter_mut().filter(|m| !m.is_host()) {
                        member.status = MemberStatus::Receiving;
                    }
                    Ok(room.clone())
                });
                match started {
                    Some(Ok(room)) => {
                        info!(room_id = %room.id, recipients = room.recipients().count(), "Room transfer started");
                        self.broadcast_room(&room);
                    }
                    Some(Err(error)) => respond_error(reply, error),
                    None => respond_error(reply, "Room not found"),
                }
            }
            RegistryMessage::UpdateRoomFiles { room_id, file_list } => {
                let updated = self.update_room(&room_id, |room| {
                    if !room.is_host(&me) {
                        return Err("Only the host can change the file list");
                    }
                    if room.status != RoomStatus::Waiting {
                        return Err("Transfer already started");
                    }
                    room.file_list = file_list;
                    Ok(room.clone())
                });
                match updated {
                    Some(Ok(room)) => self.broadcast_room(&room),
                    Some(Err(error)) => respond_error(reply, error),
                    None => respond_error(reply, "Room not found"),
                }
            }
            RegistryMessage::RequestFile {
                room_id,
                device_id,
                file_index,
            } => {
                let host = self.inner.rooms.get(&room_id).map(|room| {
                    let valid = room.contains(&device_id) && (file_index as usize) < room.file_list.len();
                    (room.host_device_id.clone(), valid)
                });
                match host {
                    Some((host, true)) => {
                        debug!(room_id = %room_id, from = %device_id, file_index, "Forwarding file request");
                        self.send_to(
                            &host,
                            &RegistryMessage::FileRequest {
                                from: device_id,
                                file_index,
                            },
                        );
                    }
                    Some((_, false)) => respond_error(reply, "Invalid file request"),
                    None => respond_error(reply, "Room not found"),
                }
            }
            RegistryMessage::UpdateMemberStatus {
                room_id,
                device_id,
                status,
                progress,
            } => {
                let updated = self.update_room(&room_id, |room| {
                    let member = room.member_mut(&device_id)?;
                    member.status = status;
                    member.progress = progress;
                    if room.all_recipients_completed() {
                        room.status = RoomStatus::Completed;
                    }
                    Some(room.clone())
                });
                match updated {
                    Some(Some(room)) => {
                        if room.status == RoomStatus::Completed {
                            info!(room_id = %room.id, "All recipients completed");
                        }
                        self.broadcast_room(&room);
                    }
                    Some(None) => respond_error(reply, "Not a member of this room"),
                    None => respond_error(reply, "Room not found"),
                }
            }
            other => {
                warn!(device_id = %me, kind = other.kind(), "Unexpected message from client");
            }
        }
    }

    /// Runs `f` under the room's entry lock. No other map may be touched
    /// from inside `f`.
    fn update_room<T>(&self, room_id: &str, f: impl FnOnce(&mut Room) -> T) -> Option<T> {
        let mut room = self.inner.rooms.get_mut(room_id)?;
        Some(f(&mut room))
    }

    fn room_of(&self, device_id: &str) -> Option<String> {
        self.inner
            .rooms
            .iter()
            .find(|room| room.contains(device_id))
            .map(|room| room.id.clone())
    }

    fn fresh_room_id(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(100_000..1_000_000).to_string();
            if !self.inner.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn leave(&self, device_id: &str, room_id: &str) {
        let outcome = self.update_room(room_id, |room| {
            if !room.contains(device_id) {
                return LeaveOutcome::NotMember;
            }
            let was_host = room.is_host(device_id);
            room.members.retain(|m| m.device_id != device_id);
            if was_host || room.members.is_empty() {
                LeaveOutcome::Closed(room.members.iter().map(|m| m.device_id.clone()).collect())
            } else {
                LeaveOutcome::Updated(room.clone())
            }
        });

        match outcome {
            Some(LeaveOutcome::Updated(room)) => {
                info!(room_id, device_id, "Member left room");
                self.broadcast_room(&room);
            }
            Some(LeaveOutcome::Closed(remaining)) => {
                self.inner.rooms.remove(room_id);
                info!(room_id, device_id, notified = remaining.len(), "Room closed");
                let closed = RegistryMessage::RoomError {
                    error: ROOM_CLOSED.to_string(),
                };
                for member in remaining {
                    self.send_to(&member, &closed);
                }
            }
            Some(LeaveOutcome::NotMember) | None => {
                debug!(room_id, device_id, "Leave for unknown membership ignored");
            }
        }
    }

    fn detach(&self, connection: u64, device: Option<&str>) {
        self.inner.connections.remove(&connection);
        let Some(device_id) = device else { return };

        // A reconnect may already have re-registered the device
        let removed = self
            .inner
            .devices
            .remove_if(device_id, |_, entry| entry.connection == connection)
            .is_some();
        if !removed {
            return;
        }

        info!(connection, device_id, "Device disconnected");
        if let Some(room_id) = self.room_of(device_id) {
            self.leave(device_id, &room_id);
        }
        self.broadcast_devices();
    }

    fn broadcast_devices(&self) {
        let message = RegistryMessage::DeviceList {
            devices: self.devices(),
        };
        let targets: Vec<mpsc::UnboundedSender<String>> =
            self.inner.devices.iter().map(|entry| entry.tx.clone()).collect();
        let Ok(text) = message.to_json() else { return };
        for tx in targets {
            let _ = tx.send(text.clone());
        }
    }

    fn broadcast_room(&self, room: &Room) {
        let message = RegistryMessage::RoomUpdate { room: room.clone() };
        for member in &room.members {
            self.send_to(&member.device_id, &message);
        }
    }

    fn send_to(&self, device_id: &str, message: &RegistryMessage) {
        let tx = self.inner.devices.get(device_id).map(|entry| entry.tx.clone());
        match (tx, message.to_json()) {
            (Some(tx), Ok(text)) => {
                let _ = tx.send(text);
            }
            (None, _) => debug!(device_id, kind = message.kind(), "Recipient offline"),
            (_, Err(e)) => warn!(error = %e, "Failed to encode registry message"),
        }
    }
}

fn respond_error(reply: &mpsc::UnboundedSender<String>, error: &str) {
    let message = RegistryMessage::RoomError {
        error: error.to_string(),
    };
    if let Ok(text) = message.to_json() {
        let _ = reply.send(text);
    }
}

impl RegistryConnector for LocalRegistry {
    fn connect(&self) -> BoxFuture<'_, RegistryResult<RegistryLink>> {
        let link = self.attach();
        Box::pin(async move { Ok(link) })
    }
}
