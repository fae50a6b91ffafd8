use p2p_transfer::metrics::init_metrics;
use p2p_transfer::protocol::PeerChannel;
use p2p_transfer::transfer::{
    receive_file, send_file, DirectoryStreamProvider, FileSource, StreamProvider, TransferConfig,
};
use p2p_transfer::transport::{memory_pair, LinkProfile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Loopback demo: push a file through an in-process link and write the
/// received copy into a directory.
///
/// Usage: p2p_transfer <file> [output-dir]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        eprintln!("usage: p2p_transfer <file> [output-dir]");
        std::process::exit(2);
    };
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("downloads"));

    init_metrics();

    println!("P2P Transfer - loopback demo");
    println!("============================\n");

    let config = TransferConfig::default().with_stream_threshold(0);
    let profile = LinkProfile::instant()
        .with_latency(Duration::from_millis(2))
        .with_drain_delay(Duration::from_millis(1));
    let (a, b) = memory_pair("sender", "receiver", profile);
    let sender = PeerChannel::new(a.session, a.events);
    let receiver = PeerChannel::new(b.session, b.events);

    let source = FileSource::open(&input).await?;
    let streams: Arc<dyn StreamProvider> = Arc::new(DirectoryStreamProvider::new(&output));

    let (sent, received) = tokio::join!(
        send_file(&source, &sender, config.clone()),
        receive_file(&receiver, config, Some(streams)),
    );
    let report = sent?;
    let artifact = received?;

    println!("✓ Sent {} ({})", report.metadata.name, report.metadata.mime_type);
    println!("  - Chunks: {}", report.chunks_sent);
    println!("  - Bytes: {}", report.bytes_sent);
    println!("  - Backpressure waits: {}", report.backpressure_waits);
    println!("  - Elapsed: {:?}", report.elapsed);
    println!("✓ Received {} bytes into {}", artifact.size(), output.display());

    Ok(())
}
