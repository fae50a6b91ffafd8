pub mod error;
pub mod memory;
pub mod session;
pub mod types;

pub use error::{TransportError, TransportResult};
pub use memory::{memory_pair, LinkProfile, MemoryEndpoint, MemorySession};
pub use session::TransportSession;
pub use types::{SessionDirection, SessionEvent, SessionState};
