//! Multi-file exchanges over one peer channel.
//!
//! Push flow: the sender offers a `file-list`, the receiver answers with a
//! `file-selection`, then every selected file goes through the single-file
//! sender wrapped in `start-file`, and `queue-complete` closes the exchange.
//! A failed file is recorded and the queue moves on to the next one.
//!
//! Pull flow: a room member asks for one file index and the host answers with
//! a standalone single-file transfer, see [`serve_file_request`].

use crate::metrics::record_queue_item;
use crate::protocol::{ChunkMessage, FileMetadata, PeerChannel, ProtocolError, TimeoutError};
use crate::queue::error::{QueueError, QueueResult};
use crate::queue::types::{QueueConfig, QueueEvent, QueueItem, QueueItemStatus, QueueSummary};
use crate::transfer::{
    send_file, ByteSource, ChunkedReceiver, ChunkedSender, SendReport, StreamProvider,
    TransferConfig, TransferError, TransferEvent,
};
use crate::transport::TransportError;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

fn emit(events: &Option<mpsc::UnboundedSender<QueueEvent>>, event: QueueEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}

/// Fold a single-file progress event into its queue item.
fn apply_progress(
    item: &mut QueueItem,
    events: &Option<mpsc::UnboundedSender<QueueEvent>>,
    event: TransferEvent,
) {
    if let TransferEvent::Progress(progress) = event {
        item.set_progress(progress.progress_percent);
        emit(
            events,
            QueueEvent::ItemProgress {
                file_index: item.file_index,
                progress: item.progress,
            },
        );
    }
}

/// Push side: offers files, waits for the selection, sends each selected one.
pub struct QueueSender {
    config: QueueConfig,
    sources: Vec<Box<dyn ByteSource>>,
    items: Vec<QueueItem>,
    events: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl QueueSender {
    pub fn new(sources: Vec<Box<dyn ByteSource>>, config: QueueConfig) -> Self {
        let items = sources
            .iter()
            .enumerate()
            .map(|(index, source)| QueueItem::new(index as u32, source.metadata().clone()))
            .collect();
        Self {
            config,
            sources,
            items,
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<QueueEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Run the push exchange. Per-file failures are recorded in the items;
    /// only failures of the exchange itself (no selection, closed session
    /// before the list was sent) are returned as errors.
    ///
    /// The session is not closed here: the receiver closes it once it has
    /// read `queue-complete`, so that frame is never dropped in flight.
    pub async fn run(&mut self, channel: &PeerChannel) -> QueueResult<QueueSummary> {
        if self.sources.is_empty() {
            return Err(QueueError::Empty);
        }

        let entries: Vec<FileMetadata> = self.items.iter().map(|i| i.metadata.clone()).collect();
        let total_size = entries.iter().map(|m| m.size).sum();
        channel.send(&ChunkMessage::FileList {
            entries,
            total_size,
        })?;
        info!(
            peer = %channel.peer_id(),
            files = self.items.len(),
            total_size,
            "Offered file list"
        );
        emit(
            &self.events,
            QueueEvent::Listed {
                files: self.items.len(),
                total_size,
            },
        );

        let selected = self.await_selection(channel).await?;
        self.apply_selection(&selected)?;

        for file_index in selected {
            self.send_item(file_index, channel).await;
        }

        channel.send(&ChunkMessage::QueueComplete)?;
        let summary = QueueSummary::from_items(&self.items);
        info!(
            peer = %channel.peer_id(),
            success = summary.success_count,
            failed = summary.failed_count,
            "Queue finished"
        );
        emit(&self.events, QueueEvent::Finished(summary));
        Ok(summary)
    }

    async fn await_selection(&self, channel: &PeerChannel) -> QueueResult<Vec<u32>> {
        let timeout = self.config.selection_timeout;
        let message = tokio::time::timeout(timeout, channel.recv())
            .await
            .map_err(|_| TimeoutError::Selection(timeout))?;

        match message {
            Some(Ok(ChunkMessage::FileSelection { selected_indices })) => Ok(selected_indices),
            Some(Ok(other)) => Err(ProtocolError::UnexpectedMessage {
                message: other.kind(),
                state: "awaiting file selection".to_string(),
            }
            .into()),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::SessionClosed(channel.peer_id().to_string()).into()),
        }
    }

    fn apply_selection(&mut self, selected: &[u32]) -> QueueResult<()> {
        let count = self.items.len();
        if let Some(&index) = selected.iter().find(|&&i| i as usize >= count) {
            return Err(ProtocolError::FileIndexOutOfRange { index, count }.into());
        }

        for item in &mut self.items {
            item.selected = selected.contains(&item.file_index);
            if !item.selected {
                item.advance(QueueItemStatus::Skipped)?;
                emit(
                    &self.events,
                    QueueEvent::ItemSkipped {
                        file_index: item.file_index,
                    },
                );
            }
        }
        emit(
            &self.events,
            QueueEvent::Selected {
                indices: selected.to_vec(),
            },
        );
        Ok(())
    }

    async fn send_item(&mut self, file_index: u32, channel: &PeerChannel) {
        let position = file_index as usize;
        let (Some(source), Some(item)) = (self.sources.get(position), self.items.get_mut(position))
        else {
            return;
        };
        // Repeated indices in the selection send the file once
        if item.status != QueueItemStatus::Pending {
            return;
        }

        let _ = item.advance(QueueItemStatus::Transferring);
        let announced = source
            .metadata()
            .chunked(self.config.transfer.chunk_size)
            .map_err(TransferError::from)
            .and_then(|metadata| {
                emit(
                    &self.events,
                    QueueEvent::ItemStarted {
                        file_index,
                        metadata: metadata.clone(),
                    },
                );
                channel
                    .send(&ChunkMessage::StartFile {
                        file_index,
                        metadata,
                    })
                    .map_err(TransferError::from)
            });

        let result = match announced {
            Ok(()) => {
                let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
                let sender =
                    ChunkedSender::new(self.config.transfer.clone()).with_events(progress_tx);
                let send = sender.send(source.as_ref(), channel);
                tokio::pin!(send);

                let result = loop {
                    tokio::select! {
                        result = &mut send => break result,
                        Some(event) = progress_rx.recv() => {
                            apply_progress(item, &self.events, event);
                        }
                    }
                };
                while let Ok(event) = progress_rx.try_recv() {
                    apply_progress(item, &self.events, event);
                }
                result.map(|_| ())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let _ = item.advance(QueueItemStatus::Completed);
                record_queue_item("completed");
                debug!(file_index, file = %item.metadata.name, "Queue item sent");
                emit(&self.events, QueueEvent::ItemCompleted { file_index });
            }
            Err(e) => {
                item.fail(e.to_string());
                record_queue_item("failed");
                warn!(file_index, file = %item.metadata.name, error = %e, "Queue item failed, continuing");
                emit(
                    &self.events,
                    QueueEvent::ItemFailed {
                        file_index,
                        error: e.to_string(),
                    },
                );
            }
        }
    }
}

/// Push side receiver: answers the file list and reassembles each file.
pub struct QueueReceiver {
    config: QueueConfig,
    receiver: ChunkedReceiver,
    progress: mpsc::UnboundedReceiver<TransferEvent>,
    items: Vec<QueueItem>,
    current: Option<u32>,
    events: Option<mpsc::UnboundedSender<QueueEvent>>,
}

impl QueueReceiver {
    pub fn new(config: QueueConfig) -> Self {
        let (progress_tx, progress) = mpsc::unbounded_channel();
        let receiver = ChunkedReceiver::new(config.transfer.clone()).with_events(progress_tx);
        Self {
            config,
            receiver,
            progress,
            items: Vec::new(),
            current: None,
            events: None,
        }
    }

    pub fn with_streams(mut self, streams: Arc<dyn StreamProvider>) -> Self {
        self.receiver = self.receiver.with_streams(streams);
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<QueueEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<QueueItem> {
        self.items
    }

    /// Index of the file whose chunks are currently arriving.
    pub fn current_index(&self) -> Option<u32> {
        self.current
    }

    /// Run until `queue-complete`, then close the session. `select` picks
    /// which offered files to receive.
    pub async fn run<F>(&mut self, channel: &PeerChannel, mut select: F) -> QueueResult<QueueSummary>
    where
        F: FnMut(&[FileMetadata]) -> Vec<u32>,
    {
        let inactivity = self.config.transfer.inactivity_timeout;
        loop {
            let next = tokio::time::timeout(inactivity, channel.recv()).await;
            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => return Err(self.abort(e.into())),
                Ok(None) => {
                    let e = TransportError::SessionClosed(channel.peer_id().to_string());
                    return Err(self.abort(e.into()));
                }
                Err(_) => return Err(self.abort(TimeoutError::Inactivity(inactivity).into())),
            };

            match message {
                ChunkMessage::FileList {
                    entries,
                    total_size,
                } => {
                    let selected = select(&entries);
                    self.offer_received(entries, total_size, &selected);
                    channel.send(&ChunkMessage::FileSelection {
                        selected_indices: selected,
                    })?;
                }
                ChunkMessage::StartFile {
                    file_index,
                    metadata,
                } => self.start_file(file_index, metadata)?,
                ChunkMessage::QueueComplete => {
                    // Nothing follows queue-complete, so the exchange ends here
                    channel.close();
                    return Ok(self.finish());
                }
                message @ (ChunkMessage::Metadata(_)
                | ChunkMessage::Chunk { .. }
                | ChunkMessage::Complete) => self.route(message, channel).await,
                other => {
                    let e = ProtocolError::UnexpectedMessage {
                        message: other.kind(),
                        state: "receiving queue".to_string(),
                    };
                    return Err(self.abort(e.into()));
                }
            }
        }
    }

    fn offer_received(&mut self, entries: Vec<FileMetadata>, total_size: u64, selected: &[u32]) {
        self.items = entries
            .into_iter()
            .enumerate()
            .map(|(index, metadata)| {
                let mut item = QueueItem::new(index as u32, metadata);
                item.selected = selected.contains(&item.file_index);
                item
            })
            .collect();
        self.current = None;

        for item in &mut self.items {
            if !item.selected {
                let _ = item.advance(QueueItemStatus::Skipped);
            }
        }

        info!(files = self.items.len(), total_size, selected = ?selected, "Received file list");
        emit(
            &self.events,
            QueueEvent::Listed {
                files: self.items.len(),
                total_size,
            },
        );
        emit(
            &self.events,
            QueueEvent::Selected {
                indices: selected.to_vec(),
            },
        );
    }

    fn start_file(&mut self, file_index: u32, metadata: FileMetadata) -> QueueResult<()> {
        let count = self.items.len();
        if file_index as usize >= count {
            return Err(ProtocolError::FileIndexOutOfRange {
                index: file_index,
                count,
            }
            .into());
        }

        self.interrupt_current("superseded by the next file");
        self.receiver.reset();
        self.current = Some(file_index);

        let item = &mut self.items[file_index as usize];
        item.advance(QueueItemStatus::Transferring)?;
        debug!(file_index, file = %metadata.name, "Queue item starting");
        emit(
            &self.events,
            QueueEvent::ItemStarted {
                file_index,
                metadata,
            },
        );
        Ok(())
    }

    /// Hand a per-file message to the single-file receiver. Failures end
    /// only the current item.
    async fn route(&mut self, message: ChunkMessage, channel: &PeerChannel) {
        let outcome = self.receiver.handle_message(message, channel).await;
        let mut updates = Vec::new();
        while let Ok(event) = self.progress.try_recv() {
            updates.push(event);
        }
        let Some(file_index) = self.current else {
            if let Err(e) = outcome {
                warn!(error = %e, "Message outside any queue item");
            }
            return;
        };
        let item = &mut self.items[file_index as usize];
        for event in updates {
            apply_progress(item, &self.events, event);
        }

        match outcome {
            Ok(None) => {}
            Ok(Some(artifact)) => {
                item.received_artifact = Some(artifact);
                let _ = item.advance(QueueItemStatus::Completed);
                self.current = None;
                record_queue_item("completed");
                emit(&self.events, QueueEvent::ItemCompleted { file_index });
            }
            Err(e) => {
                self.current = None;
                if item.fail(e.to_string()) {
                    record_queue_item("failed");
                    emit(
                        &self.events,
                        QueueEvent::ItemFailed {
                            file_index,
                            error: e.to_string(),
                        },
                    );
                }
            }
        }
    }

    fn interrupt_current(&mut self, reason: &str) {
        let Some(file_index) = self.current.take() else {
            return;
        };
        if let Some(item) = self.items.get_mut(file_index as usize) {
            if item.fail(reason) {
                warn!(file_index, reason, "Queue item interrupted");
                record_queue_item("failed");
                emit(
                    &self.events,
                    QueueEvent::ItemFailed {
                        file_index,
                        error: reason.to_string(),
                    },
                );
            }
        }
    }

    fn finish(&mut self) -> QueueSummary {
        self.interrupt_current("queue ended mid-file");
        self.receiver.reset();
        for item in &mut self.items {
            if item.selected && item.status == QueueItemStatus::Pending {
                item.fail("never started");
            }
        }

        let summary = QueueSummary::from_items(&self.items);
        info!(
            success = summary.success_count,
            failed = summary.failed_count,
            "Queue received"
        );
        emit(&self.events, QueueEvent::Finished(summary));
        summary
    }

    fn abort(&mut self, error: QueueError) -> QueueError {
        self.interrupt_current(&error.to_string());
        self.receiver.reset();
        error
    }
}

/// Answer one pull request with a standalone transfer of the requested file.
pub async fn serve_file_request(
    sources: &[Box<dyn ByteSource>],
    file_index: u32,
    channel: &PeerChannel,
    config: TransferConfig,
) -> QueueResult<SendReport> {
    let source = sources
        .get(file_index as usize)
        .ok_or(ProtocolError::FileIndexOutOfRange {
            index: file_index,
            count: sources.len(),
        })?;

    info!(peer = %channel.peer_id(), file_index, file = %source.metadata().name, "Serving file request");
    Ok(send_file(source.as_ref(), channel, config).await?)
}
