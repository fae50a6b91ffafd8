pub mod error;
pub mod receiver;
pub mod sender;
pub mod sink;
pub mod source;
pub mod state_machine;
pub mod types;

pub use error::{ApplicationError, TransferError, TransferResult};
pub use receiver::{receive_file, ChunkedReceiver};
pub use sender::{send_file, ChunkedSender};
pub use sink::{
    sanitize_file_name, ArtifactStream, DirectoryStreamProvider, StreamProvider, StreamTarget,
};
pub use source::{guess_mime_type, ByteSource, FileSource, MemorySource, DEFAULT_MIME_TYPE};
pub use state_machine::{PhaseEvent, TransferPhase, TransferStateMachine};
pub use types::{
    ArtifactBody, ReceivedArtifact, SendReport, TransferConfig, TransferEvent, TransferProgress,
};
