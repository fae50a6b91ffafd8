pub mod ack;
pub mod channel;
pub mod codec;
pub mod error;
pub mod message;

pub use ack::{AckRejection, AckTable, AckWaiter};
pub use channel::PeerChannel;
pub use error::{
    ChannelError, ChannelResult, ProtocolError, ProtocolResult, TimeoutError,
};
pub use message::{chunk_count, chunk_range, ChunkMessage, FileMetadata};
