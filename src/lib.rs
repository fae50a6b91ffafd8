//! Reliable chunked file transfer between peers.
//!
//! Files are split into fixed-size chunks and pushed over an ordered
//! message session. Every chunk is acknowledged before the next one goes
//! out, the sender waits for the transport's outbound buffer to drain, and
//! the receiver reassembles by index.
//!
//! Layers, bottom up:
//! - [`transport`]: ordered, reliable message sessions
//! - [`protocol`]: chunk messages, codec, per-chunk ack tracking
//! - [`transfer`]: one file, one peer
//! - [`broadcast`]: one file, many peers, lock-step
//! - [`queue`]: many files, one peer, with selection
//! - [`room`] and [`registry`]: rendezvous and host-managed rooms

pub mod broadcast;
pub mod metrics;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod room;
pub mod transfer;
pub mod transport;
