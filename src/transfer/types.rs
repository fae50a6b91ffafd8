use crate::protocol::FileMetadata;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tuning for senders, receivers and broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per chunk (the last chunk may be shorter)
    pub chunk_size: usize,

    /// Sending pauses while the session holds this many unsent bytes
    pub max_buffered_bytes: usize,

    /// How long to wait for each chunk's acknowledgment
    pub ack_timeout: Duration,

    /// How long a broadcast waits for all sessions to open
    pub connect_timeout: Duration,

    /// Receive side gives up after this long without a message
    pub inactivity_timeout: Duration,

    /// Contiguous chunks merged into one unit on the receive side
    pub merge_batch_size: u32,

    /// Emit progress every this many chunks (and on the last one)
    pub progress_interval: u32,

    /// Read retries per chunk before the source counts as unreadable
    pub read_retries: u32,

    /// Base delay between read retries, multiplied by the attempt number
    pub read_retry_delay: Duration,

    /// Polling period while waiting for the send buffer to drain
    pub backpressure_poll: Duration,

    /// Longest single backpressure wait before the session counts as stuck
    pub drain_timeout: Duration,

    /// Optional pause after each acknowledged chunk
    pub chunk_delay: Option<Duration>,

    /// Files at least this large are streamed to a sink when one is available
    pub stream_threshold: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_buffered_bytes: 1024 * 1024,
            ack_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(30),
            inactivity_timeout: Duration::from_secs(5 * 60),
            merge_batch_size: 100,
            progress_interval: 10,
            read_retries: 3,
            read_retry_delay: Duration::from_millis(100),
            backpressure_poll: Duration::from_millis(10),
            drain_timeout: Duration::from_secs(30),
            chunk_delay: None,
            stream_threshold: 64 * 1024 * 1024,
        }
    }
}

impl TransferConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_max_buffered_bytes(mut self, bytes: usize) -> Self {
        self.max_buffered_bytes = bytes;
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_merge_batch_size(mut self, batch: u32) -> Self {
        self.merge_batch_size = batch.max(1);
        self
    }

    pub fn with_progress_interval(mut self, interval: u32) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    pub fn with_read_retry_delay(mut self, delay: Duration) -> Self {
        self.read_retry_delay = delay;
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub fn with_stream_threshold(mut self, bytes: u64) -> Self {
        self.stream_threshold = bytes;
        self
    }
}

/// Confirmed progress of one single-peer transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferProgress {
    pub transfer_id: String,
    pub peer_id: String,
    pub file_name: String,
    /// Chunks acknowledged (sender) or received (receiver)
    pub completed_chunks: u32,
    pub total_chunks: u32,
    pub bytes_confirmed: u64,
    pub total_bytes: u64,
    pub progress_percent: f32,
}

impl TransferProgress {
    pub(crate) fn fraction(completed: u32, total: u32) -> f32 {
        if total == 0 {
            1.0
        } else {
            completed as f32 / total as f32
        }
    }
}

/// UI-facing notifications for single-peer transfers.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Started {
        transfer_id: String,
        peer_id: String,
        metadata: FileMetadata,
    },
    Progress(TransferProgress),
    Completed {
        transfer_id: String,
        peer_id: String,
        bytes: u64,
    },
    Failed {
        transfer_id: String,
        peer_id: String,
        error: String,
    },
}

/// Summary returned by a successful send.
#[derive(Debug, Clone)]
pub struct SendReport {
    pub transfer_id: String,
    pub metadata: FileMetadata,
    pub chunks_sent: u32,
    pub bytes_sent: u64,
    pub backpressure_waits: u32,
    pub elapsed: Duration,
}

/// Where the finalized bytes ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactBody {
    Memory(Bytes),
    Streamed {
        location: Option<PathBuf>,
        bytes_written: u64,
    },
    /// Streaming failed part-way: the first `streamed_bytes` bytes are in the
    /// stream, everything after them is in `remainder`.
    Mixed {
        location: Option<PathBuf>,
        streamed_bytes: u64,
        remainder: Bytes,
    },
}

/// A fully received file, handed to the artifact sink by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedArtifact {
    pub metadata: FileMetadata,
    pub body: ArtifactBody,
}

impl ReceivedArtifact {
    pub fn size(&self) -> u64 {
        match &self.body {
            ArtifactBody::Memory(bytes) => bytes.len() as u64,
            ArtifactBody::Streamed { bytes_written, .. } => *bytes_written,
            ArtifactBody::Mixed {
                streamed_bytes,
                remainder,
                ..
            } => streamed_bytes + remainder.len() as u64,
        }
    }

    /// In-memory contents, when the whole file was buffered.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ArtifactBody::Memory(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// Join merged parts without copying when there is only one.
pub(crate) fn concat_parts(mut parts: Vec<Bytes>) -> Bytes {
    match parts.len() {
        0 => Bytes::new(),
        1 => parts.pop().unwrap_or_default(),
        _ => {
            let total = parts.iter().map(Bytes::len).sum();
            let mut out = BytesMut::with_capacity(total);
            for part in parts {
                out.extend_from_slice(&part);
            }
            out.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransferConfig::default();
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.merge_batch_size, 100);
        assert_eq!(config.read_retries, 3);
    }

    #[test]
    fn test_config_serializes() {
        let config = TransferConfig::default().with_chunk_size(1024);
        let json = serde_json::to_string(&config).unwrap();
        let back: TransferConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chunk_size, 1024);
    }

    #[test]
    fn test_concat_parts() {
        let parts = vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")];
        assert_eq!(concat_parts(parts), Bytes::from_static(b"abcd"));
        assert!(concat_parts(Vec::new()).is_empty());
    }

    #[test]
    fn test_mixed_artifact_size() {
        let artifact = ReceivedArtifact {
            metadata: FileMetadata::new("x", 10, "application/octet-stream"),
            body: ArtifactBody::Mixed {
                location: None,
                streamed_bytes: 6,
                remainder: Bytes::from_static(b"1234"),
            },
        };
        assert_eq!(artifact.size(), 10);
        assert!(artifact.bytes().is_none());
    }
}
