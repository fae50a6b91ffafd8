pub mod error;
pub mod orchestrator;
pub mod types;

pub use error::{QueueError, QueueResult};
pub use orchestrator::{serve_file_request, QueueReceiver, QueueSender};
pub use types::{QueueConfig, QueueEvent, QueueItem, QueueItemStatus, QueueSummary};
