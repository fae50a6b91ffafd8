use crate::metrics::{record_chunk_received, TransferMetrics};
use crate::protocol::{ChunkMessage, FileMetadata, PeerChannel, ProtocolError, TimeoutError};
use crate::transfer::error::{ApplicationError, TransferError, TransferResult};
use crate::transfer::sink::{ArtifactStream, StreamProvider};
use crate::transfer::state_machine::{PhaseEvent, TransferPhase, TransferStateMachine};
use crate::transfer::types::{
    concat_parts, ArtifactBody, ReceivedArtifact, TransferConfig, TransferEvent, TransferProgress,
};
use crate::transport::TransportError;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Reassembles one file at a time from `metadata`, `chunk` and `complete`
/// messages, acknowledging every chunk as it arrives.
///
/// Chunks may arrive in any order. Contiguous runs are merged into larger
/// parts as soon as `merge_batch_size` of them are present, so the chunk map
/// never holds much more than one batch. Large files go to a stream from the
/// [`StreamProvider`] instead of memory.
pub struct ChunkedReceiver {
    config: TransferConfig,
    streams: Option<Arc<dyn StreamProvider>>,
    machine: TransferStateMachine,
    events: Option<mpsc::UnboundedSender<TransferEvent>>,
    incoming: Option<IncomingFile>,
}

struct IncomingFile {
    transfer_id: String,
    metadata: FileMetadata,
    total_chunks: u32,
    chunks: HashMap<u32, Bytes>,
    received: u32,
    bytes_received: u64,
    next_merge_index: u32,
    merged_parts: Vec<Bytes>,
    stream: Option<ArtifactStream>,
    location: Option<PathBuf>,
    streamed_bytes: u64,
    fell_back: bool,
    metrics: Option<TransferMetrics>,
}

impl IncomingFile {
    fn is_duplicate(&self, index: u32) -> bool {
        index < self.next_merge_index || self.chunks.contains_key(&index)
    }

    /// Merge every full contiguous batch starting at `next_merge_index`.
    async fn merge_ready(&mut self, batch_size: u32) {
        while self.next_merge_index < self.total_chunks {
            let remaining = self.total_chunks - self.next_merge_index;
            let batch = batch_size.max(1).min(remaining);
            let run = (self.next_merge_index..self.next_merge_index + batch)
                .take_while(|index| self.chunks.contains_key(index))
                .count() as u32;
            if run < batch {
                break;
            }
            self.merge_run(run).await;
        }
    }

    async fn merge_run(&mut self, run: u32) {
        let start = self.next_merge_index;
        let parts: Vec<Bytes> = (start..start + run)
            .filter_map(|index| self.chunks.remove(&index))
            .collect();
        self.next_merge_index += run;
        let part = concat_parts(parts);

        if let Some(stream) = self.stream.as_mut() {
            match stream.write_all(&part).await {
                Ok(()) => {
                    self.streamed_bytes += part.len() as u64;
                    debug!(
                        file = %self.metadata.name,
                        first = start,
                        count = run,
                        "Streamed merged batch"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        file = %self.metadata.name,
                        streamed = self.streamed_bytes,
                        error = %e,
                        "Stream write failed, buffering the rest in memory"
                    );
                    self.stream = None;
                    self.fell_back = true;
                }
            }
        }

        self.merged_parts.push(part);
    }

    fn first_missing(&self) -> Option<u32> {
        (self.next_merge_index..self.total_chunks).find(|index| !self.chunks.contains_key(index))
    }

    async fn finish(mut self) -> TransferResult<ReceivedArtifact> {
        // Trailing partial batch
        let remaining = self.total_chunks - self.next_merge_index;
        if remaining > 0 {
            if let Some(index) = self.first_missing() {
                return Err(ProtocolError::MissingChunk {
                    index,
                    total: self.total_chunks,
                }
                .into());
            }
            self.merge_run(remaining).await;
        }

        if let Some(mut stream) = self.stream.take() {
            let flushed = match stream.flush().await {
                Ok(()) => stream.shutdown().await,
                Err(e) => Err(e),
            };
            if let Err(e) = flushed {
                return Err(ApplicationError::Sink(e.to_string()).into());
            }
            let body = ArtifactBody::Streamed {
                location: self.location.take(),
                bytes_written: self.streamed_bytes,
            };
            return Ok(self.into_artifact(body));
        }

        let remainder = concat_parts(std::mem::take(&mut self.merged_parts));
        let body = if self.fell_back && self.streamed_bytes > 0 {
            ArtifactBody::Mixed {
                location: self.location.take(),
                streamed_bytes: self.streamed_bytes,
                remainder,
            }
        } else {
            ArtifactBody::Memory(remainder)
        };
        Ok(self.into_artifact(body))
    }

    fn into_artifact(self, body: ArtifactBody) -> ReceivedArtifact {
        ReceivedArtifact {
            metadata: self.metadata,
            body,
        }
    }
}

impl ChunkedReceiver {
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            streams: None,
            machine: TransferStateMachine::new(),
            events: None,
            incoming: None,
        }
    }

    pub fn with_streams(mut self, streams: Arc<dyn StreamProvider>) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<TransferEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn phase(&self) -> TransferPhase {
        self.machine.current()
    }

    pub fn state(&self) -> TransferStateMachine {
        self.machine.clone()
    }

    /// Metadata of the file currently being received.
    pub fn in_progress(&self) -> Option<&FileMetadata> {
        self.incoming.as_ref().map(|file| &file.metadata)
    }

    /// Drop any partially received file. Returns its metadata if there was one.
    pub fn reset(&mut self) -> Option<FileMetadata> {
        let dropped = self.incoming.take().map(|file| {
            if let Some(metrics) = file.metrics {
                metrics.fail("reset");
            }
            file.metadata
        });
        let _ = self.machine.transition(PhaseEvent::Reset);
        dropped
    }

    /// Process one inbound message. Returns the artifact once `complete`
    /// finalizes a file.
    pub async fn handle_message(
        &mut self,
        message: ChunkMessage,
        channel: &PeerChannel,
    ) -> TransferResult<Option<ReceivedArtifact>> {
        let result = match message {
            ChunkMessage::Metadata(metadata) => self.begin(metadata, channel).map(|_| None),
            ChunkMessage::Chunk { index, data } => {
                self.accept_chunk(index, data, channel).await.map(|_| None)
            }
            ChunkMessage::Complete => self.finalize(channel).await.map(Some),
            other => Err(ProtocolError::UnexpectedMessage {
                message: other.kind(),
                state: self.describe(),
            }
            .into()),
        };

        if let Err(e) = &result {
            self.fail(e, channel);
        }
        result
    }

    /// Receive messages until one file completes.
    pub async fn receive(&mut self, channel: &PeerChannel) -> TransferResult<ReceivedArtifact> {
        loop {
            let next = tokio::time::timeout(self.config.inactivity_timeout, channel.recv()).await;
            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => return Err(self.failed(e.into(), channel)),
                Ok(None) => {
                    let e = TransportError::SessionClosed(channel.peer_id().to_string());
                    return Err(self.failed(e.into(), channel));
                }
                Err(_) => {
                    let e = TimeoutError::Inactivity(self.config.inactivity_timeout);
                    return Err(self.failed(e.into(), channel));
                }
            };

            if let Some(artifact) = self.handle_message(message, channel).await? {
                return Ok(artifact);
            }
        }
    }

    fn begin(&mut self, metadata: FileMetadata, channel: &PeerChannel) -> TransferResult<()> {
        if let Some(previous) = self.reset() {
            warn!(
                peer = %channel.peer_id(),
                file = %previous.name,
                "New metadata arrived mid-file, discarding partial data"
            );
        }

        let total_chunks = metadata
            .total_chunks
            .ok_or_else(|| ProtocolError::MissingTotalChunks(metadata.name.clone()))?;
        self.machine.transition(PhaseEvent::Announce)?;

        let (stream, location) = self.open_stream(&metadata);
        let transfer_id = uuid::Uuid::new_v4().to_string();
        info!(
            transfer_id = %transfer_id,
            peer = %channel.peer_id(),
            file = %metadata.name,
            size = metadata.size,
            total_chunks,
            streaming = stream.is_some(),
            "Receiving file"
        );

        self.emit(TransferEvent::Started {
            transfer_id: transfer_id.clone(),
            peer_id: channel.peer_id().to_string(),
            metadata: metadata.clone(),
        });

        self.incoming = Some(IncomingFile {
            transfer_id,
            metrics: Some(TransferMetrics::start("receive", metadata.size)),
            metadata,
            total_chunks,
            chunks: HashMap::new(),
            received: 0,
            bytes_received: 0,
            next_merge_index: 0,
            merged_parts: Vec::new(),
            stream,
            location,
            streamed_bytes: 0,
            fell_back: false,
        });
        Ok(())
    }

    fn open_stream(&self, metadata: &FileMetadata) -> (Option<ArtifactStream>, Option<PathBuf>) {
        let Some(streams) = &self.streams else {
            return (None, None);
        };
        if metadata.size < self.config.stream_threshold {
            return (None, None);
        }

        match streams.open(metadata) {
            Ok(target) => (Some(target.writer), target.location),
            Err(e) => {
                warn!(
                    file = %metadata.name,
                    error = %e,
                    "Could not open artifact stream, buffering in memory"
                );
                (None, None)
            }
        }
    }

    async fn accept_chunk(
        &mut self,
        index: u32,
        data: Bytes,
        channel: &PeerChannel,
    ) -> TransferResult<()> {
        let state = self.describe();
        let Some(file) = self.incoming.as_mut() else {
            return Err(ProtocolError::UnexpectedMessage {
                message: "chunk",
                state,
            }
            .into());
        };

        if index >= file.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total: file.total_chunks,
            }
            .into());
        }

        if file.is_duplicate(index) {
            debug!(peer = %channel.peer_id(), index, "Duplicate chunk, acknowledging again");
            channel.send(&ChunkMessage::Ack { index })?;
            return Ok(());
        }

        let len = data.len();
        file.chunks.insert(index, data);
        file.received += 1;
        file.bytes_received += len as u64;
        if let Some(metrics) = file.metrics.as_mut() {
            metrics.add_bytes(len as u64);
        }
        record_chunk_received(channel.peer_id(), len);

        channel.send(&ChunkMessage::Ack { index })?;
        self.machine.transition(PhaseEvent::ChunkReceived {
            received: file.received,
        })?;

        let received = file.received;
        let total = file.total_chunks;
        if received % self.config.progress_interval.max(1) == 0 || received == total {
            let progress = TransferProgress {
                transfer_id: file.transfer_id.clone(),
                peer_id: channel.peer_id().to_string(),
                file_name: file.metadata.name.clone(),
                completed_chunks: received,
                total_chunks: total,
                bytes_confirmed: file.bytes_received,
                total_bytes: file.metadata.size,
                progress_percent: TransferProgress::fraction(received, total) * 100.0,
            };
            if let Some(events) = &self.events {
                let _ = events.send(TransferEvent::Progress(progress));
            }
        }

        file.merge_ready(self.config.merge_batch_size).await;
        Ok(())
    }

    async fn finalize(&mut self, channel: &PeerChannel) -> TransferResult<ReceivedArtifact> {
        let state = self.describe();
        let Some(mut file) = self.incoming.take() else {
            return Err(ProtocolError::UnexpectedMessage {
                message: "complete",
                state,
            }
            .into());
        };

        let transfer_id = file.transfer_id.clone();
        let metrics = file.metrics.take();
        let finished = match self.machine.transition(PhaseEvent::Finalize) {
            Ok(_) => file.finish().await.and_then(|artifact| {
                if artifact.size() == artifact.metadata.size {
                    Ok(artifact)
                } else {
                    Err(ProtocolError::Malformed(format!(
                        "{} reassembled to {} bytes, announced {}",
                        artifact.metadata.name,
                        artifact.size(),
                        artifact.metadata.size
                    ))
                    .into())
                }
            }),
            Err(e) => Err(e),
        };

        let artifact = match finished {
            Ok(artifact) => artifact,
            Err(e) => {
                if let Some(metrics) = metrics {
                    metrics.fail(e.category());
                }
                return Err(e);
            }
        };

        self.machine.transition(PhaseEvent::Complete)?;
        if let Some(metrics) = metrics {
            metrics.complete();
        }
        info!(
            transfer_id = %transfer_id,
            peer = %channel.peer_id(),
            file = %artifact.metadata.name,
            bytes = artifact.size(),
            "Receive completed"
        );
        self.emit(TransferEvent::Completed {
            transfer_id,
            peer_id: channel.peer_id().to_string(),
            bytes: artifact.size(),
        });
        Ok(artifact)
    }

    fn failed(&mut self, error: TransferError, channel: &PeerChannel) -> TransferError {
        self.fail(&error, channel);
        error
    }

    fn fail(&mut self, error: &TransferError, channel: &PeerChannel) {
        let transfer_id = match self.incoming.take() {
            Some(file) => {
                if let Some(metrics) = file.metrics {
                    metrics.fail(error.category());
                }
                file.transfer_id
            }
            None => String::new(),
        };
        warn!(peer = %channel.peer_id(), error = %error, "Receive failed");
        let _ = self.machine.transition(PhaseEvent::Fail {
            error: error.to_string(),
        });
        self.emit(TransferEvent::Failed {
            transfer_id,
            peer_id: channel.peer_id().to_string(),
            error: error.to_string(),
        });
    }

    fn describe(&self) -> String {
        match &self.incoming {
            Some(file) => format!("receiving {}", file.metadata.name),
            None => "no file announced".to_string(),
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Receive a single file and close the session if the transfer fails.
pub async fn receive_file(
    channel: &PeerChannel,
    config: TransferConfig,
    streams: Option<Arc<dyn StreamProvider>>,
) -> TransferResult<ReceivedArtifact> {
    let mut receiver = ChunkedReceiver::new(config);
    if let Some(streams) = streams {
        receiver = receiver.with_streams(streams);
    }
    let result = receiver.receive(channel).await;
    if let Err(e) = &result {
        channel.cancel(&e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::sink::StreamTarget;
    use crate::transport::{memory_pair, LinkProfile};
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use tokio::io::AsyncWrite;

    fn channel_pair() -> (PeerChannel, PeerChannel) {
        let (a, b) = memory_pair("alice", "bob", LinkProfile::instant());
        (
            PeerChannel::new(a.session, a.events),
            PeerChannel::new(b.session, b.events),
        )
    }

    fn metadata(size: u64, chunk_size: usize) -> ChunkMessage {
        ChunkMessage::Metadata(
            FileMetadata::new("data.bin", size, "application/octet-stream")
                .chunked(chunk_size)
                .unwrap(),
        )
    }

    fn chunk(index: u32, byte: u8, len: usize) -> ChunkMessage {
        ChunkMessage::Chunk {
            index,
            data: Bytes::from(vec![byte; len]),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_reassemble() {
        let (_alice, bob) = channel_pair();
        let mut receiver =
            ChunkedReceiver::new(TransferConfig::default().with_merge_batch_size(2));

        receiver.handle_message(metadata(10, 4), &bob).await.unwrap();
        receiver.handle_message(chunk(2, 3, 2), &bob).await.unwrap();
        receiver.handle_message(chunk(0, 1, 4), &bob).await.unwrap();
        receiver.handle_message(chunk(1, 2, 4), &bob).await.unwrap();

        let artifact = receiver
            .handle_message(ChunkMessage::Complete, &bob)
            .await
            .unwrap()
            .unwrap();
        let bytes = artifact.bytes().unwrap();
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..], &[1, 1, 1, 1, 2, 2, 2, 2, 3, 3]);
        assert_eq!(receiver.phase(), TransferPhase::Completed);
    }

    #[tokio::test]
    async fn test_merged_chunks_are_released() {
        let (_alice, bob) = channel_pair();
        let batch = 4u32;
        let total = 2 * batch + 1;
        let mut receiver =
            ChunkedReceiver::new(TransferConfig::default().with_merge_batch_size(batch));

        receiver
            .handle_message(metadata(total as u64 * 8, 8), &bob)
            .await
            .unwrap();
        for index in 0..total - 1 {
            receiver.handle_message(chunk(index, index as u8, 8), &bob).await.unwrap();
            let incoming = receiver.incoming.as_ref().unwrap();
            assert!(incoming.chunks.len() < batch as usize, "after chunk {index}");
            assert_eq!(incoming.next_merge_index, (index + 1) / batch * batch);
        }

        // The short trailing batch merges as soon as it is whole
        receiver.handle_message(chunk(total - 1, 0xff, 8), &bob).await.unwrap();
        let incoming = receiver.incoming.as_ref().unwrap();
        assert!(incoming.chunks.is_empty());
        assert_eq!(incoming.next_merge_index, total);
        assert_eq!(incoming.merged_parts.len(), 3);

        let artifact = receiver
            .handle_message(ChunkMessage::Complete, &bob)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(artifact.size(), total as u64 * 8);
    }

    #[tokio::test]
    async fn test_gap_holds_merge_until_filled() {
        let (_alice, bob) = channel_pair();
        let mut receiver =
            ChunkedReceiver::new(TransferConfig::default().with_merge_batch_size(2));

        receiver.handle_message(metadata(24, 4), &bob).await.unwrap();
        for index in [1, 2, 3] {
            receiver.handle_message(chunk(index, index as u8, 4), &bob).await.unwrap();
        }
        let incoming = receiver.incoming.as_ref().unwrap();
        assert_eq!(incoming.chunks.len(), 3);
        assert_eq!(incoming.next_merge_index, 0);
        assert!(incoming.merged_parts.is_empty());

        receiver.handle_message(chunk(0, 0, 4), &bob).await.unwrap();
        let incoming = receiver.incoming.as_ref().unwrap();
        assert!(incoming.chunks.is_empty());
        assert_eq!(incoming.next_merge_index, 4);
        assert_eq!(incoming.merged_parts.len(), 2);
    }

    #[tokio::test]
    async fn test_acks_every_chunk_including_duplicates() {
        let (alice, bob) = channel_pair();
        let mut receiver = ChunkedReceiver::new(TransferConfig::default());

        receiver.handle_message(metadata(8, 4), &bob).await.unwrap();
        let first = alice.expect_ack(0);
        receiver.handle_message(chunk(0, 1, 4), &bob).await.unwrap();
        first.received().await.unwrap();

        // Duplicate is acknowledged again and otherwise ignored
        let again = alice.expect_ack(0);
        receiver.handle_message(chunk(0, 9, 4), &bob).await.unwrap();
        again.received().await.unwrap();

        receiver.handle_message(chunk(1, 2, 4), &bob).await.unwrap();
        let artifact = receiver
            .handle_message(ChunkMessage::Complete, &bob)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&artifact.bytes().unwrap()[..4], &[1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_missing_chunk_at_finalize() {
        let (_alice, bob) = channel_pair();
        let mut receiver = ChunkedReceiver::new(TransferConfig::default());

        receiver.handle_message(metadata(12, 4), &bob).await.unwrap();
        receiver.handle_message(chunk(0, 1, 4), &bob).await.unwrap();
        receiver.handle_message(chunk(2, 1, 4), &bob).await.unwrap();

        let err = receiver
            .handle_message(ChunkMessage::Complete, &bob)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Protocol(ProtocolError::MissingChunk { index: 1, total: 3 })
        );
        assert!(matches!(receiver.phase(), TransferPhase::Failed { .. }));
    }

    #[tokio::test]
    async fn test_chunk_before_metadata_rejected() {
        let (_alice, bob) = channel_pair();
        let mut receiver = ChunkedReceiver::new(TransferConfig::default());
        let err = receiver
            .handle_message(chunk(0, 1, 4), &bob)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolError::UnexpectedMessage { .. })
        ));
    }

    #[tokio::test]
    async fn test_out_of_range_and_missing_total() {
        let (_alice, bob) = channel_pair();
        let mut receiver = ChunkedReceiver::new(TransferConfig::default());

        let bare = FileMetadata::new("x", 4, "text/plain");
        let err = receiver
            .handle_message(ChunkMessage::Metadata(bare), &bob)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::Protocol(ProtocolError::MissingTotalChunks("x".into()))
        );

        receiver.handle_message(metadata(4, 4), &bob).await.unwrap();
        let err = receiver
            .handle_message(chunk(1, 0, 4), &bob)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Protocol(ProtocolError::ChunkOutOfRange { index: 1, total: 1 })
        ));
    }

    #[tokio::test]
    async fn test_inactivity_timeout() {
        let (_alice, bob) = channel_pair();
        let config =
            TransferConfig::default().with_inactivity_timeout(std::time::Duration::from_millis(30));
        let mut receiver = ChunkedReceiver::new(config);
        let err = receiver.receive(&bob).await.unwrap_err();
        assert!(matches!(
            err,
            TransferError::Timeout(TimeoutError::Inactivity(_))
        ));
    }

    /// Accepts a fixed number of writes, then fails every later one.
    struct BrokenAfter {
        writes_left: Arc<AtomicUsize>,
        written: Arc<parking_lot::Mutex<Vec<u8>>>,
    }

    impl AsyncWrite for BrokenAfter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.writes_left.load(Ordering::SeqCst) == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.writes_left.fetch_sub(1, Ordering::SeqCst);
            self.written.lock().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    struct BrokenProvider {
        written: Arc<parking_lot::Mutex<Vec<u8>>>,
    }

    impl StreamProvider for BrokenProvider {
        fn open(&self, _metadata: &FileMetadata) -> io::Result<StreamTarget> {
            Ok(StreamTarget::new(Box::new(BrokenAfter {
                writes_left: Arc::new(AtomicUsize::new(1)),
                written: self.written.clone(),
            })))
        }
    }

    #[tokio::test]
    async fn test_stream_failure_falls_back_to_memory() {
        let (_alice, bob) = channel_pair();
        let written = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let config = TransferConfig::default()
            .with_merge_batch_size(2)
            .with_stream_threshold(0);
        let mut receiver = ChunkedReceiver::new(config).with_streams(Arc::new(BrokenProvider {
            written: written.clone(),
        }));

        receiver.handle_message(metadata(16, 4), &bob).await.unwrap();
        for index in 0..4 {
            receiver
                .handle_message(chunk(index, index as u8, 4), &bob)
                .await
                .unwrap();
        }
        let artifact = receiver
            .handle_message(ChunkMessage::Complete, &bob)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(artifact.size(), 16);
        match artifact.body {
            ArtifactBody::Mixed {
                streamed_bytes,
                remainder,
                ..
            } => {
                assert_eq!(streamed_bytes, 8);
                assert_eq!(&remainder[..], &[2, 2, 2, 2, 3, 3, 3, 3]);
            }
            other => panic!("Expected mixed body, got {other:?}"),
        }
        assert_eq!(&written.lock()[..], &[0, 0, 0, 0, 1, 1, 1, 1]);
    }
}
