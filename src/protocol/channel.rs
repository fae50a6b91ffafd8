use crate::protocol::ack::{AckRejection, AckTable, AckWaiter};
use crate::protocol::codec;
use crate::protocol::error::{ChannelResult, ProtocolResult, TimeoutError};
use crate::protocol::message::ChunkMessage;
use crate::transport::{SessionEvent, SessionState, TransportError, TransportSession};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Message-level view of one transport session.
///
/// A dispatcher task owns the session's event stream: it decodes frames,
/// resolves `ack` messages against the pending-ack table, forwards every
/// other message to [`recv`](PeerChannel::recv) and tracks the open state.
/// When the session closes or errors the dispatcher rejects all outstanding
/// ack waiters.
pub struct PeerChannel {
    session: Arc<dyn TransportSession>,
    acks: Arc<AckTable>,
    inbound: Mutex<mpsc::UnboundedReceiver<ProtocolResult<ChunkMessage>>>,
    state: watch::Receiver<SessionState>,
    dispatcher: JoinHandle<()>,
}

impl PeerChannel {
    /// Take over a session and its event stream. Spawns the dispatcher, so
    /// this must run inside a tokio runtime.
    pub fn new(
        session: Arc<dyn TransportSession>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Self {
        let acks = Arc::new(AckTable::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.state());

        let dispatcher = tokio::spawn(dispatch(
            session.peer_id().to_string(),
            events,
            acks.clone(),
            inbound_tx,
            state_tx,
        ));

        Self {
            session,
            acks,
            inbound: Mutex::new(inbound_rx),
            state: state_rx,
            dispatcher,
        }
    }

    pub fn peer_id(&self) -> &str {
        self.session.peer_id()
    }

    pub fn session(&self) -> &Arc<dyn TransportSession> {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open() && self.session.is_open()
    }

    pub fn pending_bytes(&self) -> usize {
        self.session.pending_bytes()
    }

    pub fn outstanding_acks(&self) -> usize {
        self.acks.outstanding()
    }

    /// Encode and send one message.
    pub fn send(&self, message: &ChunkMessage) -> ChannelResult<()> {
        if !self.is_open() {
            return Err(TransportError::SessionClosed(self.peer_id().to_string()).into());
        }
        let frame = codec::encode(message)
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.session.send(frame)?;
        Ok(())
    }

    /// Wait until the session reports open.
    pub async fn wait_open(&self, timeout: Duration) -> ChannelResult<()> {
        let mut state = self.state.clone();
        let settled = tokio::time::timeout(timeout, async move {
            state
                .wait_for(|s| *s != SessionState::Connecting)
                .await
                .map(|s| *s)
        })
        .await;

        match settled {
            Ok(Ok(SessionState::Open)) => Ok(()),
            Ok(_) => Err(TransportError::SessionClosed(self.peer_id().to_string()).into()),
            Err(_) => Err(TimeoutError::ConnectionOpen {
                peer: self.peer_id().to_string(),
                after: timeout,
            }
            .into()),
        }
    }

    /// Block while the session's unsent byte count is at or above
    /// `threshold`. Returns whether any waiting happened.
    pub async fn wait_for_capacity(
        &self,
        threshold: usize,
        poll_interval: Duration,
        drain_timeout: Duration,
    ) -> ChannelResult<bool> {
        let started = Instant::now();
        let mut waited = false;

        loop {
            if !self.is_open() {
                return Err(TransportError::SessionClosed(self.peer_id().to_string()).into());
            }

            let pending = self.session.pending_bytes();
            if pending < threshold {
                return Ok(waited);
            }

            if started.elapsed() >= drain_timeout {
                return Err(TransportError::DrainTimeout {
                    peer: self.peer_id().to_string(),
                    threshold,
                    waited: started.elapsed(),
                }
                .into());
            }

            if !waited {
                debug!(
                    peer = %self.peer_id(),
                    pending,
                    threshold,
                    "Applying backpressure - waiting for send buffer to drain"
                );
                waited = true;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Register interest in `ack{index}`; call before sending the chunk.
    pub fn expect_ack(&self, index: u32) -> AckWaiter {
        self.acks.register(index)
    }

    /// Stop waiting for `ack{index}` (after a timeout).
    pub fn forget_ack(&self, index: u32) {
        self.acks.forget(index);
    }

    /// Next non-ack message. `None` once the session is closed and every
    /// message received before the close has been consumed.
    pub async fn recv(&self) -> Option<ProtocolResult<ChunkMessage>> {
        self.inbound.lock().await.recv().await
    }

    /// Reject all outstanding ack waiters, keeping the session open.
    pub fn reset_acks(&self) -> usize {
        self.acks.reject_all(AckRejection::Reset)
    }

    /// Close the session and release every waiter with `Cancelled`.
    pub fn cancel(&self, reason: &str) {
        self.session.close();
        let rejected = self.acks.reject_all(AckRejection::Cancelled(reason.to_string()));
        debug!(peer = %self.peer_id(), rejected, reason, "Channel cancelled");
    }

    /// Close the session normally.
    pub fn close(&self) {
        self.session.close();
        self.acks.reject_all(AckRejection::SessionClosed);
    }
}

impl Drop for PeerChannel {
    fn drop(&mut self) {
        self.dispatcher.abort();
        self.acks.reject_all(AckRejection::SessionClosed);
    }
}

async fn dispatch(
    peer: String,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    acks: Arc<AckTable>,
    inbound: mpsc::UnboundedSender<ProtocolResult<ChunkMessage>>,
    state: watch::Sender<SessionState>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Open => {
                state.send_replace(SessionState::Open);
            }
            SessionEvent::Data(frame) => match codec::decode(&frame) {
                Ok(ChunkMessage::Ack { index }) => {
                    if !acks.resolve(index) {
                        debug!(peer = %peer, index, "Ignoring duplicate or stale ack");
                    }
                }
                Ok(message) => {
                    let _ = inbound.send(Ok(message));
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Dropping undecodable frame");
                    let _ = inbound.send(Err(e));
                }
            },
            SessionEvent::Close => break,
            SessionEvent::Error(reason) => {
                warn!(peer = %peer, reason = %reason, "Session error");
                break;
            }
        }
    }

    state.send_replace(SessionState::Closed);
    let rejected = acks.reject_all(AckRejection::SessionClosed);
    if rejected > 0 {
        debug!(peer = %peer, rejected, "Session closed with acks outstanding");
    }
}
