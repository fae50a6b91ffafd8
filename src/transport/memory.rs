//! In-process session pair.
//!
//! Two [`MemorySession`]s wired back to back through a pump task per
//! direction. The pump can add delivery latency and can hold bytes in the
//! "send buffer" for a while after delivery, which makes
//! [`pending_bytes`](TransportSession::pending_bytes) behave like a slowly
//! draining network buffer.

use crate::transport::error::{TransportError, TransportResult};
use crate::transport::session::TransportSession;
use crate::transport::types::{SessionDirection, SessionEvent, SessionState};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Link behaviour shared by both directions of a pair.
#[derive(Debug, Clone)]
pub struct LinkProfile {
    /// Delay before a frame is delivered to the other side.
    pub latency: Duration,

    /// Extra time a delivered frame keeps counting towards `pending_bytes`.
    pub drain_delay: Duration,

    /// Time until both sessions report open. `None` never opens.
    pub open_delay: Option<Duration>,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            drain_delay: Duration::ZERO,
            open_delay: Some(Duration::ZERO),
        }
    }
}

impl LinkProfile {
    pub fn instant() -> Self {
        Self::default()
    }

    pub fn never_open() -> Self {
        Self {
            open_delay: None,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_drain_delay(mut self, drain_delay: Duration) -> Self {
        self.drain_delay = drain_delay;
        self
    }

    pub fn with_open_delay(mut self, open_delay: Duration) -> Self {
        self.open_delay = Some(open_delay);
        self
    }
}

/// One end of an in-process link.
pub struct MemorySession {
    peer_id: String,
    direction: SessionDirection,
    state: Arc<RwLock<SessionState>>,
    outbox: mpsc::UnboundedSender<Bytes>,
    pending: Arc<AtomicUsize>,
    pending_at_send: Mutex<Vec<usize>>,
    local_events: mpsc::UnboundedSender<SessionEvent>,
    remote_events: mpsc::UnboundedSender<SessionEvent>,
}

/// A session together with the event stream the connection layer would
/// normally feed from its callbacks.
pub struct MemoryEndpoint {
    pub session: Arc<MemorySession>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

/// Build a connected pair. The first endpoint belongs to `local_id` and talks
/// to `remote_id` (outgoing); the second is the mirror image (incoming).
///
/// Must be called inside a tokio runtime: the pumps are spawned tasks.
pub fn memory_pair(
    local_id: &str,
    remote_id: &str,
    profile: LinkProfile,
) -> (MemoryEndpoint, MemoryEndpoint) {
    let state = Arc::new(RwLock::new(SessionState::Connecting));
    let (a_events_tx, a_events_rx) = mpsc::unbounded_channel();
    let (b_events_tx, b_events_rx) = mpsc::unbounded_channel();
    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();
    let a_pending = Arc::new(AtomicUsize::new(0));
    let b_pending = Arc::new(AtomicUsize::new(0));

    let a = Arc::new(MemorySession {
        peer_id: remote_id.to_string(),
        direction: SessionDirection::Outgoing,
        state: state.clone(),
        outbox: a_out_tx,
        pending: a_pending.clone(),
        pending_at_send: Mutex::new(Vec::new()),
        local_events: a_events_tx.clone(),
        remote_events: b_events_tx.clone(),
    });
    let b = Arc::new(MemorySession {
        peer_id: local_id.to_string(),
        direction: SessionDirection::Incoming,
        state: state.clone(),
        outbox: b_out_tx,
        pending: b_pending.clone(),
        pending_at_send: Mutex::new(Vec::new()),
        local_events: b_events_tx.clone(),
        remote_events: a_events_tx.clone(),
    });

    spawn_pump(a_out_rx, b_events_tx.clone(), a_pending, state.clone(), &profile);
    spawn_pump(b_out_rx, a_events_tx.clone(), b_pending, state.clone(), &profile);

    match profile.open_delay {
        Some(delay) if delay.is_zero() => open_link(&state, &a_events_tx, &b_events_tx),
        Some(delay) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                open_link(&state, &a_events_tx, &b_events_tx);
            });
        }
        None => {}
    }

    (
        MemoryEndpoint {
            session: a,
            events: a_events_rx,
        },
        MemoryEndpoint {
            session: b,
            events: b_events_rx,
        },
    )
}

fn open_link(
    state: &RwLock<SessionState>,
    a_events: &mpsc::UnboundedSender<SessionEvent>,
    b_events: &mpsc::UnboundedSender<SessionEvent>,
) {
    let mut state = state.write();
    if *state != SessionState::Connecting {
        return;
    }
    *state = SessionState::Open;
    let _ = a_events.send(SessionEvent::Open);
    let _ = b_events.send(SessionEvent::Open);
}

fn spawn_pump(
    mut outbox: mpsc::UnboundedReceiver<Bytes>,
    remote_events: mpsc::UnboundedSender<SessionEvent>,
    pending: Arc<AtomicUsize>,
    state: Arc<RwLock<SessionState>>,
    profile: &LinkProfile,
) {
    let latency = profile.latency;
    let drain_delay = profile.drain_delay;

    tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if state.read().is_closed() {
                break;
            }

            let len = frame.len();
            if remote_events.send(SessionEvent::Data(frame)).is_err() {
                break;
            }
            if !drain_delay.is_zero() {
                tokio::time::sleep(drain_delay).await;
            }
            pending.fetch_sub(len, Ordering::SeqCst);
        }
    });
}

impl MemorySession {
    /// `pending_bytes` as observed at the moment of every accepted send.
    pub fn pending_at_send(&self) -> Vec<usize> {
        self.pending_at_send.lock().clone()
    }

    /// Simulate a transport failure reported by the connection layer.
    pub fn fail(&self, reason: &str) {
        let _ = self
            .local_events
            .send(SessionEvent::Error(reason.to_string()));
        self.close();
    }
}

impl TransportSession for MemorySession {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn direction(&self) -> SessionDirection {
        self.direction
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn send(&self, bytes: Bytes) -> TransportResult<()> {
        match self.state() {
            SessionState::Open => {}
            SessionState::Connecting => {
                return Err(TransportError::NotOpen(self.peer_id.clone()));
            }
            SessionState::Closed => {
                return Err(TransportError::SessionClosed(self.peer_id.clone()));
            }
        }

        let len = bytes.len();
        let before = self.pending.fetch_add(len, Ordering::SeqCst);
        self.pending_at_send.lock().push(before);

        self.outbox.send(bytes).map_err(|e| {
            self.pending.fetch_sub(len, Ordering::SeqCst);
            TransportError::SendFailed(e.to_string())
        })
    }

    fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn close(&self) {
        {
            let mut state = self.state.write();
            if state.is_closed() {
                return;
            }
            *state = SessionState::Closed;
        }
        let _ = self.local_events.send(SessionEvent::Close);
        let _ = self.remote_events.send(SessionEvent::Close);
    }
}
