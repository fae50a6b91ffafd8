use crate::transport::error::TransportResult;
use crate::transport::types::{SessionDirection, SessionState};
use bytes::Bytes;

/// One bidirectional, ordered, message-oriented channel to one peer.
///
/// The connection layer owns the session and hands out `Arc` references.
/// Incoming traffic and lifecycle changes are not part of this trait: the
/// connection layer delivers them as [`SessionEvent`](crate::transport::SessionEvent)s
/// on an unbounded channel created together with the session.
///
/// The transport gives no flow control of its own. Callers must poll
/// [`pending_bytes`](TransportSession::pending_bytes) and hold off sending
/// while it is above their threshold.
pub trait TransportSession: Send + Sync {
    /// Device id of the remote side.
    fn peer_id(&self) -> &str;

    fn direction(&self) -> SessionDirection;

    fn state(&self) -> SessionState;

    /// Queue one message for delivery.
    fn send(&self, bytes: Bytes) -> TransportResult<()>;

    /// Bytes accepted by `send` but not yet handed to the network.
    fn pending_bytes(&self) -> usize;

    /// Close the session. Idempotent.
    fn close(&self);

    fn is_open(&self) -> bool {
        self.state().is_open()
    }
}
