mod support;

use p2p_transfer::protocol::ChunkMessage;
use p2p_transfer::transfer::{
    receive_file, send_file, ArtifactBody, ChunkedSender, DirectoryStreamProvider, FileSource,
    MemorySource, StreamProvider, TransferConfig, TransferEvent,
};
use p2p_transfer::transport::LinkProfile;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use support::{channel_pair, pattern, recorded_pair};
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Files of every awkward size arrive byte-for-byte.
#[tokio::test]
async fn test_sizes_around_chunk_boundaries() {
    let cs = 64;
    let config = TransferConfig::default().with_chunk_size(cs);

    for size in [0, 1, cs - 1, cs, cs + 1, cs * 37 + 5] {
        let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());
        let data = pattern(size);
        let source = MemorySource::new("sample.bin", "application/octet-stream", data.clone());

        let (sent, received) = tokio::join!(
            send_file(&source, &alice, config.clone()),
            receive_file(&bob, config.clone(), None),
        );

        let report = sent.unwrap();
        let artifact = received.unwrap();
        assert_eq!(report.bytes_sent, size as u64, "size {size}");
        assert_eq!(artifact.size(), size as u64);
        assert_eq!(artifact.bytes().unwrap().as_ref(), &data[..], "size {size}");
        println!("✓ {size} bytes in {} chunks", report.chunks_sent);
    }
}

#[tokio::test]
async fn test_random_payloads_survive() {
    let mut rng = rand::thread_rng();
    for _ in 0..5 {
        let cs = rng.gen_range(1..512);
        let size = rng.gen_range(0..20_000);
        let mut data = vec![0u8; size];
        rng.fill(&mut data[..]);

        let config = TransferConfig::default()
            .with_chunk_size(cs)
            .with_merge_batch_size(rng.gen_range(1..8));
        let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());
        let source = MemorySource::new("noise.bin", "application/octet-stream", data.clone());

        let (sent, received) = tokio::join!(
            send_file(&source, &alice, config.clone()),
            receive_file(&bob, config, None),
        );
        sent.unwrap();
        let artifact = received.unwrap();
        assert_eq!(artifact.bytes().unwrap().as_ref(), &data[..], "chunk size {cs}, size {size}");
    }
}

/// 10 MB in 1 MB chunks: exactly ten chunk messages, acks 0 through 9.
#[tokio::test]
async fn test_ten_megabytes_ten_chunks() {
    let mb = 1_000_000;
    let config = TransferConfig::default()
        .with_chunk_size(mb)
        .with_max_buffered_bytes(4 * mb);
    let (alice, alice_log, bob, bob_log) = recorded_pair("alice", "bob", LinkProfile::instant());
    let data = pattern(10 * mb);
    let source = MemorySource::new("movie.mp4", "video/mp4", data.clone());

    let (sent, received) = tokio::join!(
        send_file(&source, &alice, config.clone()),
        receive_file(&bob, config, None),
    );
    let report = sent.unwrap();
    let artifact = received.unwrap();

    assert_eq!(report.chunks_sent, 10);
    assert_eq!(artifact.metadata.mime_type, "video/mp4");
    assert_eq!(artifact.metadata.total_chunks, Some(10));
    assert_eq!(artifact.size(), 10_000_000);
    assert_eq!(artifact.bytes().unwrap().as_ref(), &data[..]);

    let chunks: Vec<u32> = alice_log
        .sent()
        .iter()
        .filter_map(|m| match m {
            ChunkMessage::Chunk { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, (0..10).collect::<Vec<_>>());

    let acks: Vec<u32> = bob_log
        .sent()
        .iter()
        .filter_map(|m| match m {
            ChunkMessage::Ack { index } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(acks, (0..10).collect::<Vec<_>>());
}

/// Acknowledging every chunk twice changes nothing for the sender.
#[tokio::test]
async fn test_duplicate_acks_are_harmless() {
    let config = TransferConfig::default().with_chunk_size(16);
    let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());
    let source = MemorySource::new("notes.txt", "text/plain", pattern(100));

    let peer = tokio::spawn(async move {
        while let Some(Ok(message)) = bob.recv().await {
            match message {
                ChunkMessage::Chunk { index, .. } => {
                    bob.send(&ChunkMessage::Ack { index }).unwrap();
                    bob.send(&ChunkMessage::Ack { index }).unwrap();
                }
                ChunkMessage::Complete => break,
                _ => {}
            }
        }
        bob
    });

    let report = ChunkedSender::new(config).send(&source, &alice).await.unwrap();
    assert_eq!(report.chunks_sent, 7);
    assert_eq!(report.bytes_sent, 100);
    let _bob = peer.await.unwrap();
    assert_eq!(alice.outstanding_acks(), 0);
}

#[tokio::test]
async fn test_progress_never_goes_backwards() {
    let config = TransferConfig::default()
        .with_chunk_size(10)
        .with_progress_interval(1);
    let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());
    let source = MemorySource::new("log.txt", "text/plain", pattern(95));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let sender = ChunkedSender::new(config.clone()).with_events(tx);
    let (sent, received) = tokio::join!(
        sender.send(&source, &alice),
        receive_file(&bob, config, None),
    );
    sent.unwrap();
    received.unwrap();
    drop(sender);

    let mut confirmed = Vec::new();
    while let Some(event) = rx.recv().await {
        if let TransferEvent::Progress(progress) = event {
            confirmed.push((progress.bytes_confirmed, progress.progress_percent));
        }
    }

    assert_eq!(confirmed.len(), 10);
    assert!(confirmed.windows(2).all(|w| w[0].0 <= w[1].0 && w[0].1 <= w[1].1));
    assert_eq!(confirmed.last().unwrap().0, 95);
    assert_eq!(confirmed.last().unwrap().1, 100.0);
}

/// With a slowly draining link no chunk is handed to the transport while
/// its buffer is at or over the threshold.
#[tokio::test]
async fn test_backpressure_holds_sends() {
    let threshold = 100;
    let config = TransferConfig::default()
        .with_chunk_size(256)
        .with_max_buffered_bytes(threshold);
    let profile = LinkProfile::instant().with_drain_delay(Duration::from_millis(5));
    let (alice, alice_log, bob, _) = recorded_pair("alice", "bob", profile);
    let source = MemorySource::new("burst.bin", "application/octet-stream", pattern(256 * 8));

    let (sent, received) = tokio::join!(
        send_file(&source, &alice, config.clone()),
        receive_file(&bob, config, None),
    );
    let report = sent.unwrap();
    received.unwrap();

    assert!(report.backpressure_waits > 0);
    // First send is metadata and the last is complete; the rest are chunks.
    let observed = alice_log.inner().pending_at_send();
    assert_eq!(observed.len(), 10);
    for pending in &observed[1..9] {
        assert!(*pending < threshold, "chunk sent with {pending} bytes pending");
    }
}

#[tokio::test]
async fn test_file_to_file_through_stream_sink() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.csv");
    let data = pattern(5_000);
    tokio::fs::write(&input, &data).await.unwrap();

    let config = TransferConfig::default()
        .with_chunk_size(512)
        .with_merge_batch_size(3)
        .with_stream_threshold(1);
    let source = FileSource::open(&input).await.unwrap();
    let streams: Arc<dyn StreamProvider> =
        Arc::new(DirectoryStreamProvider::new(dir.path().join("downloads")));
    let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());

    let (sent, received) = tokio::join!(
        send_file(&source, &alice, config.clone()),
        receive_file(&bob, config, Some(streams)),
    );
    sent.unwrap();
    let artifact = received.unwrap();
    assert_eq!(artifact.metadata.mime_type, "text/csv");

    match artifact.body {
        ArtifactBody::Streamed {
            location: Some(path),
            bytes_written,
        } => {
            assert_eq!(bytes_written, 5_000);
            assert_eq!(tokio::fs::read(path).await.unwrap(), data);
        }
        other => panic!("expected a streamed artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn test_closed_session_fails_both_sides() {
    let config = TransferConfig::default()
        .with_chunk_size(8)
        .with_ack_timeout(Duration::from_secs(2));
    let (alice, bob) = channel_pair("alice", "bob", LinkProfile::instant());
    let source = MemorySource::new("a.bin", "application/octet-stream", pattern(64));

    // Take metadata and the first chunk, then hang up.
    let peer = tokio::spawn(async move {
        let _ = bob.recv().await;
        let _ = bob.recv().await;
        bob.close();
    });

    let err = send_file(&source, &alice, config).await.unwrap_err();
    peer.await.unwrap();
    assert!(!alice.is_open(), "unexpected error {err}");
}
