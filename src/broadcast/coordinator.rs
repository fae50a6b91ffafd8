use crate::broadcast::error::{BroadcastError, BroadcastResult};
use crate::broadcast::types::{BroadcastEvent, BroadcastProgress, BroadcastReport};
use crate::metrics::{
    record_backpressure_wait, record_broadcast_started, record_chunk_acked, record_chunk_sent,
    TransferMetrics,
};
use crate::protocol::{chunk_range, AckWaiter, ChunkMessage, FileMetadata, PeerChannel, TimeoutError};
use crate::transfer::sender::read_chunk;
use crate::transfer::{
    ByteSource, PhaseEvent, TransferConfig, TransferError, TransferPhase, TransferStateMachine,
};
use bytes::Bytes;
use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Sends one file to several peers in lockstep.
///
/// Each chunk is read once and sent to every peer; the coordinator advances
/// only when all peers have acknowledged it under one shared timeout. Any
/// peer failure aborts the whole broadcast and closes every session.
pub struct BroadcastCoordinator {
    config: TransferConfig,
    machine: TransferStateMachine,
    events: Option<mpsc::UnboundedSender<BroadcastEvent>>,
}

impl BroadcastCoordinator {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            machine: TransferStateMachine::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<BroadcastEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn phase(&self) -> TransferPhase {
        self.machine.current()
    }

    pub async fn broadcast(
        &self,
        source: &dyn ByteSource,
        channels: &[PeerChannel],
    ) -> BroadcastResult<BroadcastReport> {
        if channels.is_empty() {
            return Err(BroadcastError::NoPeers);
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = channels.iter().find(|c| !seen.insert(c.peer_id())) {
            return Err(BroadcastError::DuplicatePeer(duplicate.peer_id().to_string()));
        }

        let broadcast_id = uuid::Uuid::new_v4().to_string();
        let metadata = source
            .metadata()
            .chunked(self.config.chunk_size)
            .map_err(TransferError::from)?;
        let peers: Vec<String> = channels.iter().map(|c| c.peer_id().to_string()).collect();
        let mut metrics = TransferMetrics::start("broadcast", metadata.size);
        record_broadcast_started(peers.len());

        self.emit(BroadcastEvent::Started {
            broadcast_id: broadcast_id.clone(),
            peers: peers.clone(),
            metadata: metadata.clone(),
        });

        match self
            .run(&broadcast_id, &metadata, source, channels, &mut metrics)
            .await
        {
            Ok(report) => {
                info!(
                    broadcast_id = %broadcast_id,
                    file = %metadata.name,
                    peers = peers.len(),
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Broadcast completed"
                );
                metrics.complete();
                self.emit(BroadcastEvent::Completed {
                    broadcast_id,
                    peers,
                    bytes: report.bytes_per_peer,
                });
                Ok(report)
            }
            Err(e) => {
                error!(broadcast_id = %broadcast_id, error = %e, "Broadcast failed, closing all sessions");
                let reason = e.to_string();
                for channel in channels {
                    channel.cancel(&reason);
                }
                let _ = self.machine.transition(PhaseEvent::Fail {
                    error: reason.clone(),
                });
                metrics.fail(
                    e.transfer_error()
                        .map(TransferError::category)
                        .unwrap_or("broadcast"),
                );
                let peer_id = match &e {
                    BroadcastError::Peer { peer, .. } => Some(peer.clone()),
                    _ => None,
                };
                self.emit(BroadcastEvent::Failed {
                    broadcast_id,
                    peer_id,
                    error: reason,
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        broadcast_id: &str,
        metadata: &FileMetadata,
        source: &dyn ByteSource,
        channels: &[PeerChannel],
        metrics: &mut TransferMetrics,
    ) -> BroadcastResult<BroadcastReport> {
        let started = Instant::now();
        let total = metadata.total_chunks.unwrap_or_default();

        // No data leaves until every target is reachable
        try_join_all(channels.iter().map(|channel| async move {
            channel
                .wait_open(self.config.connect_timeout)
                .await
                .map_err(|e| BroadcastError::peer(channel.peer_id(), e))
        }))
        .await?;

        self.machine
            .transition(PhaseEvent::Announce)
            .map_err(BroadcastError::from)?;
        for channel in channels {
            channel
                .send(&ChunkMessage::Metadata(metadata.clone()))
                .map_err(|e| BroadcastError::peer(channel.peer_id(), e))?;
        }
        info!(
            broadcast_id,
            file = %metadata.name,
            peers = channels.len(),
            total_chunks = total,
            "Starting broadcast"
        );

        let mut acked: BTreeMap<String, u32> = channels
            .iter()
            .map(|c| (c.peer_id().to_string(), 0))
            .collect();
        let mut bytes_per_peer = 0u64;

        for index in 0..total {
            self.machine
                .transition(PhaseEvent::ChunkStarted { index })
                .map_err(BroadcastError::from)?;

            let (start, end) = chunk_range(index, metadata.size, self.config.chunk_size);
            let data = read_chunk(&self.config, source, &metadata.name, start, end).await?;
            let len = data.len();

            let waiters = try_join_all(
                channels
                    .iter()
                    .map(|channel| self.send_to(channel, index, data.clone())),
            )
            .await?;

            self.machine
                .transition(PhaseEvent::ChunkSent { index })
                .map_err(BroadcastError::from)?;

            let emit_progress =
                (index + 1) % self.config.progress_interval.max(1) == 0 || index + 1 == total;
            self.await_all_acks(
                broadcast_id,
                metadata,
                total,
                index,
                waiters,
                &mut acked,
                emit_progress,
            )
            .await?;

            bytes_per_peer += len as u64;
            metrics.add_bytes(len as u64 * channels.len() as u64);

            if let Some(delay) = self.config.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }

        self.machine
            .transition(PhaseEvent::Finalize)
            .map_err(BroadcastError::from)?;
        for channel in channels {
            channel
                .send(&ChunkMessage::Complete)
                .map_err(|e| BroadcastError::peer(channel.peer_id(), e))?;
        }
        self.machine
            .transition(PhaseEvent::Complete)
            .map_err(BroadcastError::from)?;

        Ok(BroadcastReport {
            broadcast_id: broadcast_id.to_string(),
            metadata: metadata.clone(),
            peers: acked.into_keys().collect(),
            chunks_sent: total,
            bytes_per_peer,
            elapsed: started.elapsed(),
        })
    }

    /// Backpressure wait and send to one peer, returning its ack waiter.
    async fn send_to(
        &self,
        channel: &PeerChannel,
        index: u32,
        data: Bytes,
    ) -> BroadcastResult<(String, AckWaiter)> {
        let peer = channel.peer_id().to_string();
        let waited = channel
            .wait_for_capacity(
                self.config.max_buffered_bytes,
                self.config.backpressure_poll,
                self.config.drain_timeout,
            )
            .await
            .map_err(|e| BroadcastError::peer(&peer, e))?;
        if waited {
            record_backpressure_wait(&peer);
        }

        let len = data.len();
        let waiter = channel.expect_ack(index);
        if let Err(e) = channel.send(&ChunkMessage::Chunk { index, data }) {
            channel.forget_ack(index);
            return Err(BroadcastError::peer(&peer, e));
        }
        record_chunk_sent(&peer, len);
        Ok((peer, waiter))
    }

    #[allow(clippy::too_many_arguments)]
    async fn await_all_acks(
        &self,
        broadcast_id: &str,
        metadata: &FileMetadata,
        total: u32,
        index: u32,
        waiters: Vec<(String, AckWaiter)>,
        acked: &mut BTreeMap<String, u32>,
        emit_progress: bool,
    ) -> BroadcastResult<()> {
        let deadline = tokio::time::Instant::now() + self.config.ack_timeout;
        let mut outstanding: Vec<String> = waiters.iter().map(|(peer, _)| peer.clone()).collect();
        let mut pending: FuturesUnordered<_> = waiters
            .into_iter()
            .map(|(peer, waiter)| async move { (peer, waiter.received().await) })
            .collect();

        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((peer, Ok(())))) => {
                    record_chunk_acked(&peer);
                    outstanding.retain(|p| p != &peer);
                    acked.insert(peer.clone(), index + 1);
                    debug!(broadcast_id, peer = %peer, index, "Peer acknowledged chunk");
                    if emit_progress {
                        self.emit(BroadcastEvent::Progress(BroadcastProgress::from_acked(
                            broadcast_id,
                            metadata,
                            total,
                            acked,
                        )));
                    }
                }
                Ok(Some((peer, Err(rejection)))) => {
                    let source = TransferError::from_rejection(rejection, &peer);
                    return Err(BroadcastError::peer(&peer, source));
                }
                Ok(None) => return Ok(()),
                Err(_) => {
                    warn!(
                        broadcast_id,
                        index,
                        waiting_on = ?outstanding,
                        "Acknowledgment timeout during broadcast"
                    );
                    let peer = outstanding.first().cloned().unwrap_or_default();
                    return Err(BroadcastError::peer(
                        &peer,
                        TimeoutError::Ack {
                            peer: peer.clone(),
                            index,
                            after: self.config.ack_timeout,
                        },
                    ));
                }
            }
        }
    }

    fn emit(&self, event: BroadcastEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
