//! Shared helpers for the integration tests.

#![allow(dead_code)]

use bytes::Bytes;
use p2p_transfer::protocol::codec;
use p2p_transfer::protocol::{ChunkMessage, PeerChannel};
use p2p_transfer::transport::{
    memory_pair, LinkProfile, MemorySession, SessionDirection, SessionState, TransportResult,
    TransportSession,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Session wrapper that keeps a decoded copy of every outgoing message.
pub struct Recording {
    inner: Arc<MemorySession>,
    sent: Mutex<Vec<ChunkMessage>>,
}

impl Recording {
    pub fn sent(&self) -> Vec<ChunkMessage> {
        self.sent.lock().clone()
    }

    pub fn inner(&self) -> &Arc<MemorySession> {
        &self.inner
    }
}

impl TransportSession for Recording {
    fn peer_id(&self) -> &str {
        self.inner.peer_id()
    }

    fn direction(&self) -> SessionDirection {
        self.inner.direction()
    }

    fn state(&self) -> SessionState {
        self.inner.state()
    }

    fn send(&self, bytes: Bytes) -> TransportResult<()> {
        if let Ok(message) = codec::decode(&bytes) {
            self.sent.lock().push(message);
        }
        self.inner.send(bytes)
    }

    fn pending_bytes(&self) -> usize {
        self.inner.pending_bytes()
    }

    fn close(&self) {
        self.inner.close()
    }
}

pub fn channel_pair(local: &str, remote: &str, profile: LinkProfile) -> (PeerChannel, PeerChannel) {
    let (a, b) = memory_pair(local, remote, profile);
    (
        PeerChannel::new(a.session, a.events),
        PeerChannel::new(b.session, b.events),
    )
}

/// Like [`channel_pair`], with both sides recording what they send.
pub fn recorded_pair(
    local: &str,
    remote: &str,
    profile: LinkProfile,
) -> (PeerChannel, Arc<Recording>, PeerChannel, Arc<Recording>) {
    let (a, b) = memory_pair(local, remote, profile);
    let a_rec = Arc::new(Recording {
        inner: a.session,
        sent: Mutex::new(Vec::new()),
    });
    let b_rec = Arc::new(Recording {
        inner: b.session,
        sent: Mutex::new(Vec::new()),
    });
    (
        PeerChannel::new(a_rec.clone(), a.events),
        a_rec,
        PeerChannel::new(b_rec.clone(), b.events),
        b_rec,
    )
}

/// Deterministic, non-repeating-per-chunk test payload.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
