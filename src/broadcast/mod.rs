pub mod coordinator;
pub mod error;
pub mod types;

pub use coordinator::BroadcastCoordinator;
pub use error::{BroadcastError, BroadcastResult};
pub use types::{BroadcastEvent, BroadcastProgress, BroadcastReport};
