//! Metrics and observability module
//!
//! Records transfer activity through the `metrics` facade. The library does
//! not install an exporter; the embedding application picks one.
//!
//! Key metrics exposed:
//! - Chunk operations (sent, acknowledged, received)
//! - Backpressure waits per peer
//! - Transfer outcomes and durations
//! - Queue item outcomes and registry reconnects

pub mod recorder;

pub use recorder::{
    init_metrics, record_backpressure_wait, record_broadcast_started, record_chunk_acked,
    record_chunk_received, record_chunk_sent, record_queue_item, record_registry_eviction,
    record_registry_reconnect, ChunkTimer, TransferMetrics,
};
