use crate::metrics::{
    record_backpressure_wait, record_chunk_acked, record_chunk_sent, ChunkTimer, TransferMetrics,
};
use crate::protocol::{chunk_range, ChunkMessage, FileMetadata, PeerChannel, TimeoutError};
use crate::retry::{retry_with, LinearBackoff};
use crate::transfer::error::{ApplicationError, TransferError, TransferResult};
use crate::transfer::source::ByteSource;
use crate::transfer::state_machine::{PhaseEvent, TransferPhase, TransferStateMachine};
use crate::transfer::types::{SendReport, TransferConfig, TransferEvent, TransferProgress};
use bytes::Bytes;
use std::io;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Stop-and-wait sender: one chunk in flight, each acknowledged before the
/// next is read.
pub struct ChunkedSender {
    config: TransferConfig,
    machine: TransferStateMachine,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
}

impl ChunkedSender {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            machine: TransferStateMachine::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn phase(&self) -> TransferPhase {
        self.machine.current()
    }

    /// Handle observing this sender's phase.
    pub fn state(&self) -> TransferStateMachine {
        self.machine.clone()
    }

    /// Send one file over `channel`.
    ///
    /// On failure every outstanding ack waiter is rejected but the session is
    /// left open; callers that own the session decide whether to close it.
    pub async fn send(
        &self,
        source: &dyn ByteSource,
        channel: &PeerChannel,
    ) -> TransferResult<SendReport> {
        let transfer_id = uuid::Uuid::new_v4().to_string();
        let metadata = source.metadata().chunked(self.config.chunk_size)?;
        let mut metrics = TransferMetrics::start("send", metadata.size);

        self.emit(TransferEvent::Started {
            transfer_id: transfer_id.clone(),
            peer_id: channel.peer_id().to_string(),
            metadata: metadata.clone(),
        });

        match self
            .run(&transfer_id, &metadata, source, channel, &mut metrics)
            .await
        {
            Ok(report) => {
                info!(
                    transfer_id = %transfer_id,
                    peer = %channel.peer_id(),
                    file = %metadata.name,
                    bytes = report.bytes_sent,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Send completed"
                );
                metrics.complete();
                self.emit(TransferEvent::Completed {
                    transfer_id,
                    peer_id: channel.peer_id().to_string(),
                    bytes: report.bytes_sent,
                });
                Ok(report)
            }
            Err(e) => {
                let rejected = channel.reset_acks();
                warn!(
                    transfer_id = %transfer_id,
                    peer = %channel.peer_id(),
                    file = %metadata.name,
                    rejected,
                    error = %e,
                    "Send failed"
                );
                let event = match &e {
                    TransferError::Cancelled(_) => PhaseEvent::Cancel,
                    other => PhaseEvent::Fail {
                        error: other.to_string(),
                    },
                };
                let _ = self.machine.transition(event);
                metrics.fail(e.category());
                self.emit(TransferEvent::Failed {
                    transfer_id,
                    peer_id: channel.peer_id().to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        transfer_id: &str,
        metadata: &FileMetadata,
        source: &dyn ByteSource,
        channel: &PeerChannel,
        metrics: &mut TransferMetrics,
    ) -> TransferResult<SendReport> {
        let started = Instant::now();
        let peer = channel.peer_id().to_string();
        let total = metadata.total_chunks.unwrap_or_default();

        self.machine.transition(PhaseEvent::Announce)?;
        channel.send(&ChunkMessage::Metadata(metadata.clone()))?;
        info!(
            transfer_id,
            peer = %peer,
            file = %metadata.name,
            size = metadata.size,
            total_chunks = total,
            "Starting send"
        );

        let mut bytes_sent = 0u64;
        let mut backpressure_waits = 0u32;

        for index in 0..total {
            self.machine.transition(PhaseEvent::ChunkStarted { index })?;

            if channel
                .wait_for_capacity(
                    self.config.max_buffered_bytes,
                    self.config.backpressure_poll,
                    self.config.drain_timeout,
                )
                .await?
            {
                backpressure_waits += 1;
                record_backpressure_wait(&peer);
            }

            let (start, end) = chunk_range(index, metadata.size, self.config.chunk_size);
            let data = read_chunk(&self.config, source, &metadata.name, start, end).await?;
            let len = data.len();

            // Registered before sending so an immediate ack cannot be missed
            let waiter = channel.expect_ack(index);
            let timer = ChunkTimer::start();
            if let Err(e) = channel.send(&ChunkMessage::Chunk { index, data }) {
                channel.forget_ack(index);
                return Err(e.into());
            }
            record_chunk_sent(&peer, len);
            self.machine.transition(PhaseEvent::ChunkSent { index })?;

            match tokio::time::timeout(self.config.ack_timeout, waiter.received()).await {
                Ok(Ok(())) => {}
                Ok(Err(rejection)) => return Err(TransferError::from_rejection(rejection, &peer)),
                Err(_) => {
                    channel.forget_ack(index);
                    return Err(TimeoutError::Ack {
                        peer,
                        index,
                        after: self.config.ack_timeout,
                    }
                    .into());
                }
            }
            timer.stop();
            record_chunk_acked(&peer);

            bytes_sent += len as u64;
            metrics.add_bytes(len as u64);

            let completed = index + 1;
            if completed % self.config.progress_interval.max(1) == 0 || completed == total {
                self.emit_progress(transfer_id, &peer, metadata, completed, total, end);
            }

            if let Some(delay) = self.config.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }

        self.machine.transition(PhaseEvent::Finalize)?;
        channel.send(&ChunkMessage::Complete)?;
        self.machine.transition(PhaseEvent::Complete)?;

        Ok(SendReport {
            transfer_id: transfer_id.to_string(),
            metadata: metadata.clone(),
            chunks_sent: total,
            bytes_sent,
            backpressure_waits,
            elapsed: started.elapsed(),
        })
    }

    fn emit_progress(
        &self,
        transfer_id: &str,
        peer: &str,
        metadata: &FileMetadata,
        completed: u32,
        total: u32,
        bytes_confirmed: u64,
    ) {
        self.emit(TransferEvent::Progress(TransferProgress {
            transfer_id: transfer_id.to_string(),
            peer_id: peer.to_string(),
            file_name: metadata.name.clone(),
            completed_chunks: completed,
            total_chunks: total,
            bytes_confirmed,
            total_bytes: metadata.size,
            progress_percent: TransferProgress::fraction(completed, total) * 100.0,
        }));
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Read `[start, end)` from `source`, retrying transient failures with a
/// linear backoff. A vanished source is not retried.
pub(crate) async fn read_chunk(
    config: &TransferConfig,
    source: &dyn ByteSource,
    name: &str,
    start: u64,
    end: u64,
) -> TransferResult<Bytes> {
    let backoff = LinearBackoff::new(config.read_retry_delay, config.read_retries);
    let result = retry_with(
        backoff,
        "read chunk",
        |e: &io::Error| e.kind() != io::ErrorKind::NotFound,
        || source.read_range(start, end),
    )
    .await;

    match result {
        Ok(data) => {
            debug!(file = name, start, end, "Read chunk");
            Ok(data)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ApplicationError::SourceUnavailable {
            name: name.to_string(),
            reason: e.to_string(),
        }
        .into()),
        Err(e) => Err(ApplicationError::SourceRead {
            name: name.to_string(),
            start,
            end,
            reason: e.to_string(),
        }
        .into()),
    }
}

/// Send a single file and close the session if the transfer fails.
pub async fn send_file(
    source: &dyn ByteSource,
    channel: &PeerChannel,
    config: TransferConfig,
) -> TransferResult<SendReport> {
    let sender = ChunkedSender::new(config);
    let result = sender.send(source, channel).await;
    if let Err(e) = &result {
        channel.cancel(&e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::source::MemorySource;
    use crate::transport::{memory_pair, LinkProfile};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn channel_pair() -> (PeerChannel, PeerChannel) {
        let (a, b) = memory_pair("alice", "bob", LinkProfile::instant());
        (
            PeerChannel::new(a.session, a.events),
            PeerChannel::new(b.session, b.events),
        )
    }

    /// Acknowledge every chunk, collecting what arrived.
    async fn ack_everything(peer: &PeerChannel) -> Vec<ChunkMessage> {
        let mut seen = Vec::new();
        while let Some(Ok(message)) = peer.recv().await {
            if let ChunkMessage::Chunk { index, .. } = &message {
                peer.send(&ChunkMessage::Ack { index: *index }).unwrap();
            }
            let done = matches!(message, ChunkMessage::Complete);
            seen.push(message);
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_send_small_file() {
        let (alice, bob) = channel_pair();
        let config = TransferConfig::default().with_chunk_size(4);
        let source = MemorySource::new("a.txt", "text/plain", &b"hello world"[..]);

        let receiver = tokio::spawn(async move { ack_everything(&bob).await });
        let report = ChunkedSender::new(config)
            .send(&source, &alice)
            .await
            .unwrap();

        assert_eq!(report.chunks_sent, 3);
        assert_eq!(report.bytes_sent, 11);

        let seen = receiver.await.unwrap();
        assert_eq!(seen.len(), 5);
        match &seen[0] {
            ChunkMessage::Metadata(meta) => {
                assert_eq!(meta.total_chunks, Some(3));
                assert_eq!(meta.mime_type, "text/plain");
            }
            other => panic!("Expected metadata, got {other:?}"),
        }
        assert_eq!(seen[4], ChunkMessage::Complete);
    }

    #[tokio::test]
    async fn test_empty_file_sends_metadata_and_complete() {
        let (alice, bob) = channel_pair();
        let source = MemorySource::new("empty", "text/plain", Bytes::new());

        let receiver = tokio::spawn(async move { ack_everything(&bob).await });
        let report = ChunkedSender::new(TransferConfig::default())
            .send(&source, &alice)
            .await
            .unwrap();
        assert_eq!(report.chunks_sent, 0);

        let seen = receiver.await.unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], ChunkMessage::Complete);
    }

    #[tokio::test]
    async fn test_ack_timeout_fails_transfer() {
        let (alice, _bob) = channel_pair();
        let config = TransferConfig::default()
            .with_chunk_size(4)
            .with_ack_timeout(Duration::from_millis(50));
        let source = MemorySource::new("a.bin", "application/octet-stream", vec![0u8; 16]);

        let sender = ChunkedSender::new(config);
        let started = Instant::now();
        let err = sender.send(&source, &alice).await.unwrap_err();

        assert!(matches!(
            err,
            TransferError::Timeout(TimeoutError::Ack { index: 0, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(sender.phase(), TransferPhase::Failed { .. }));
        assert_eq!(alice.outstanding_acks(), 0);
        // The session stays usable for a queue to carry on
        assert!(alice.is_open());
    }

    #[tokio::test]
    async fn test_send_file_closes_session_on_failure() {
        let (alice, _bob) = channel_pair();
        let config = TransferConfig::default().with_ack_timeout(Duration::from_millis(20));
        let source = MemorySource::new("a.bin", "application/octet-stream", vec![1u8; 8]);

        assert!(send_file(&source, &alice, config).await.is_err());
        assert!(!alice.is_open());
    }

    #[tokio::test]
    async fn test_cancel_rejects_pending_ack() {
        let (alice, _bob) = channel_pair();
        let alice = std::sync::Arc::new(alice);
        let source = MemorySource::new("a.bin", "application/octet-stream", vec![0u8; 64]);

        let canceller = alice.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel("user");
        });

        let sender = ChunkedSender::new(TransferConfig::default());
        let err = sender.send(&source, &alice).await.unwrap_err();
        assert_eq!(err, TransferError::Cancelled("user".into()));
        assert_eq!(sender.phase(), TransferPhase::Cancelled);
    }

    struct FlakySource {
        metadata: FileMetadata,
        failures_left: AtomicU32,
    }

    impl ByteSource for FlakySource {
        fn metadata(&self) -> &FileMetadata {
            &self.metadata
        }

        fn read_range(&self, start: u64, end: u64) -> BoxFuture<'_, io::Result<Bytes>> {
            Box::pin(async move {
                if self.failures_left.load(Ordering::SeqCst) > 0 {
                    self.failures_left.fetch_sub(1, Ordering::SeqCst);
                    return Err(io::Error::new(io::ErrorKind::Interrupted, "busy"));
                }
                Ok(Bytes::from(vec![7u8; (end - start) as usize]))
            })
        }
    }

    #[tokio::test]
    async fn test_transient_read_errors_are_retried() {
        let (alice, bob) = channel_pair();
        let config = TransferConfig::default().with_read_retry_delay(Duration::from_millis(1));
        let source = FlakySource {
            metadata: FileMetadata::new("flaky.bin", 10, "application/octet-stream"),
            failures_left: AtomicU32::new(2),
        };

        tokio::spawn(async move { ack_everything(&bob).await });
        let report = ChunkedSender::new(config)
            .send(&source, &alice)
            .await
            .unwrap();
        assert_eq!(report.bytes_sent, 10);
    }

    #[tokio::test]
    async fn test_persistent_read_errors_fail_transfer() {
        let (alice, bob) = channel_pair();
        let config = TransferConfig::default().with_read_retry_delay(Duration::from_millis(1));
        let source = FlakySource {
            metadata: FileMetadata::new("broken.bin", 10, "application/octet-stream"),
            failures_left: AtomicU32::new(100),
        };

        tokio::spawn(async move { ack_everything(&bob).await });
        let err = ChunkedSender::new(config)
            .send(&source, &alice)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Application(ApplicationError::SourceRead { .. })
        ));
        assert_eq!(source.failures_left.load(Ordering::SeqCst), 96);
    }
}
