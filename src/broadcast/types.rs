use crate::protocol::FileMetadata;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Confirmed progress across every broadcast target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastProgress {
    pub broadcast_id: String,
    pub file_name: String,
    pub total_chunks: u32,
    /// Percent of chunks each peer has acknowledged
    pub per_peer: BTreeMap<String, f32>,
    /// Mean of `per_peer`
    pub aggregate_percent: f32,
}

impl BroadcastProgress {
    pub(crate) fn from_acked(
        broadcast_id: &str,
        metadata: &FileMetadata,
        total_chunks: u32,
        acked: &BTreeMap<String, u32>,
    ) -> Self {
        let per_peer: BTreeMap<String, f32> = acked
            .iter()
            .map(|(peer, count)| {
                let fraction = if total_chunks == 0 {
                    1.0
                } else {
                    *count as f32 / total_chunks as f32
                };
                (peer.clone(), fraction * 100.0)
            })
            .collect();

        let aggregate_percent = if per_peer.is_empty() {
            0.0
        } else {
            per_peer.values().sum::<f32>() / per_peer.len() as f32
        };

        Self {
            broadcast_id: broadcast_id.to_string(),
            file_name: metadata.name.clone(),
            total_chunks,
            per_peer,
            aggregate_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    Started {
        broadcast_id: String,
        peers: Vec<String>,
        metadata: FileMetadata,
    },
    Progress(BroadcastProgress),
    Completed {
        broadcast_id: String,
        peers: Vec<String>,
        bytes: u64,
    },
    Failed {
        broadcast_id: String,
        peer_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone)]
pub struct BroadcastReport {
    pub broadcast_id: String,
    pub metadata: FileMetadata,
    pub peers: Vec<String>,
    pub chunks_sent: u32,
    /// Bytes delivered to each peer
    pub bytes_per_peer: u64,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_is_mean_of_peers() {
        let meta = FileMetadata::new("a", 100, "text/plain");
        let mut acked = BTreeMap::new();
        acked.insert("p1".to_string(), 10);
        acked.insert("p2".to_string(), 5);
        acked.insert("p3".to_string(), 0);

        let progress = BroadcastProgress::from_acked("b", &meta, 10, &acked);
        assert_eq!(progress.per_peer["p1"], 100.0);
        assert_eq!(progress.per_peer["p2"], 50.0);
        assert_eq!(progress.aggregate_percent, 50.0);
    }

    #[test]
    fn test_empty_file_counts_as_done() {
        let meta = FileMetadata::new("a", 0, "text/plain");
        let mut acked = BTreeMap::new();
        acked.insert("p1".to_string(), 0);
        let progress = BroadcastProgress::from_acked("b", &meta, 0, &acked);
        assert_eq!(progress.aggregate_percent, 100.0);
    }
}
