//! Device registry and room relay protocol.
//!
//! [`RegistryClient`] keeps one connection to the rendezvous service alive
//! (register, heartbeat, reconnect) and exposes the device directory.
//! [`LocalRegistry`] is an in-process relay with the same semantics.

pub mod client;
pub mod error;
pub mod local;
pub mod types;

pub use client::{RegistryClient, RegistryConnector, RegistryHandle, RegistryLink};
pub use error::{RegistryError, RegistryResult};
pub use local::LocalRegistry;
pub use types::{Device, RegistryConfig, RegistryMessage, ROOM_CLOSED};
