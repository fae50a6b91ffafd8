//! Metrics recorder for peer-to-peer transfer operations
//!
//! Records various metrics about transfer progress and health.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Register metric descriptions. Safe to call more than once.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    // Chunk counters
    describe_counter!("p2p_chunks_sent_total", "Total number of chunks sent");
    describe_counter!(
        "p2p_chunks_acked_total",
        "Total number of chunks acknowledged by a peer"
    );
    describe_counter!(
        "p2p_chunks_received_total",
        "Total number of chunks received"
    );
    describe_counter!(
        "p2p_backpressure_waits_total",
        "Times a sender waited for the send buffer to drain"
    );

    // Byte counters
    describe_counter!("p2p_bytes_sent_total", "Total bytes sent");
    describe_counter!("p2p_bytes_received_total", "Total bytes received");

    // Transfer counters
    describe_counter!(
        "p2p_transfers_started_total",
        "Total number of transfers started"
    );
    describe_counter!(
        "p2p_transfers_completed_total",
        "Total number of transfers completed successfully"
    );
    describe_counter!(
        "p2p_transfers_failed_total",
        "Total number of transfers that failed"
    );
    describe_counter!(
        "p2p_queue_items_total",
        "Queue items finished, labelled by outcome"
    );
    describe_counter!(
        "p2p_registry_reconnects_total",
        "Reconnection attempts to the device registry"
    );
    describe_counter!(
        "p2p_registry_evictions_total",
        "Devices dropped by the registry after missing heartbeats"
    );

    // Gauges
    describe_gauge!(
        "p2p_active_transfers",
        "Number of currently active transfers"
    );
    describe_gauge!(
        "p2p_broadcast_peers",
        "Peers taking part in the current broadcast"
    );

    // Histograms
    describe_histogram!(
        "p2p_chunk_ack_seconds",
        "Time from sending a chunk to its acknowledgment"
    );
    describe_histogram!("p2p_transfer_size_bytes", "Size of each transferred file");
    describe_histogram!("p2p_transfer_duration_seconds", "Total transfer duration");
    describe_histogram!(
        "p2p_throughput_bytes_per_second",
        "Transfer throughput in bytes per second"
    );
}

// ============== Chunk Operations ==============

pub fn record_chunk_sent(peer: &str, chunk_size: usize) {
    counter!("p2p_chunks_sent_total", "peer" => peer.to_string()).increment(1);
    counter!("p2p_bytes_sent_total", "peer" => peer.to_string()).increment(chunk_size as u64);
}

/// Record a chunk acknowledgment
pub fn record_chunk_acked(peer: &str) {
    counter!("p2p_chunks_acked_total", "peer" => peer.to_string()).increment(1);
}

pub fn record_chunk_received(peer: &str, chunk_size: usize) {
    counter!("p2p_chunks_received_total", "peer" => peer.to_string()).increment(1);
    counter!("p2p_bytes_received_total", "peer" => peer.to_string())
        .increment(chunk_size as u64);
}

pub fn record_backpressure_wait(peer: &str) {
    counter!("p2p_backpressure_waits_total", "peer" => peer.to_string()).increment(1);
}

fn record_chunk_ack_duration(duration: Duration) {
    histogram!("p2p_chunk_ack_seconds").record(duration.as_secs_f64());
}

// ============== Transfer Operations ==============

fn record_transfer_started(direction: &'static str, file_size: u64) {
    counter!("p2p_transfers_started_total", "direction" => direction).increment(1);
    gauge!("p2p_active_transfers").increment(1.0);
    histogram!("p2p_transfer_size_bytes").record(file_size as f64);
}

fn record_transfer_complete(direction: &'static str, duration: Duration, bytes: u64) {
    counter!("p2p_transfers_completed_total", "direction" => direction).increment(1);
    gauge!("p2p_active_transfers").decrement(1.0);

    histogram!("p2p_transfer_duration_seconds").record(duration.as_secs_f64());

    let throughput = if duration.as_secs_f64() > 0.0 {
        bytes as f64 / duration.as_secs_f64()
    } else {
        0.0
    };
    histogram!("p2p_throughput_bytes_per_second").record(throughput);
}

fn record_transfer_failed(direction: &'static str, reason: &str) {
    counter!("p2p_transfers_failed_total", "direction" => direction, "reason" => reason.to_string())
        .increment(1);
    gauge!("p2p_active_transfers").decrement(1.0);
}

pub fn record_broadcast_started(peers: usize) {
    gauge!("p2p_broadcast_peers").set(peers as f64);
}

// ============== Queue & Registry ==============

pub fn record_queue_item(outcome: &'static str) {
    counter!("p2p_queue_items_total", "outcome" => outcome).increment(1);
}

pub fn record_registry_reconnect(attempt: u32) {
    counter!("p2p_registry_reconnects_total").increment(1);
    gauge!("p2p_registry_reconnect_attempt").set(attempt as f64);
}

pub fn record_registry_eviction() {
    counter!("p2p_registry_evictions_total").increment(1);
}

/// Helper struct to time a transfer and record its outcome exactly once
pub struct TransferMetrics {
    direction: &'static str,
    start_time: Instant,
    bytes_transferred: u64,
}

impl TransferMetrics {
    /// Start tracking a new transfer (`direction` is "send", "receive" or "broadcast")
    pub fn start(direction: &'static str, file_size: u64) -> Self {
        record_transfer_started(direction, file_size);

        Self {
            direction,
            start_time: Instant::now(),
            bytes_transferred: 0,
        }
    }

    /// Bytes confirmed by the peer (or written, when receiving)
    pub fn add_bytes(&mut self, bytes: u64) {
        self.bytes_transferred += bytes;
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn complete(self) {
        let duration = self.start_time.elapsed();
        record_transfer_complete(self.direction, duration, self.bytes_transferred);
    }

    /// `reason` is the error category, e.g. "timeout"
    pub fn fail(self, reason: &str) {
        record_transfer_failed(self.direction, reason);
    }

    /// Get current duration
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes per second since `start`
    pub fn throughput(&self) -> f64 {
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes_transferred as f64 / secs
        } else {
            0.0
        }
    }
}

/// Times one chunk from send to acknowledgment
pub struct ChunkTimer {
    start_time: Instant,
}

impl ChunkTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn stop(self) {
        record_chunk_ack_duration(self.start_time.elapsed());
    }
}
