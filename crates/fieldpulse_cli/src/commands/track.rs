//! Track command implementation.

use crate::probe::ProbeConnectivityMonitor;
use crate::source::{JsonLinesSource, LineReader};
use fieldpulse_core::{JournalConfig, JournalQueue, MemoryQueue, PositionQueue};
use fieldpulse_protocol::OsmAndFormatter;
use fieldpulse_tracker::{
    DeliveryStats, HttpTransport, HttpTransportConfig, TrackerConfig, TrackerHandle,
    TrackingController,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::info;

const SETTLE_POLL: Duration = Duration::from_millis(200);

/// Options for the track command.
pub struct TrackOptions {
    /// Collector endpoint.
    pub url: String,
    /// Device identifier.
    pub device: String,
    /// Whether fixes go through the queue.
    pub buffering: bool,
    /// Retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Fix input file, `-` for stdin.
    pub fixes: String,
    /// Pause between fixes in milliseconds.
    pub interval_ms: u64,
    /// Connectivity probe interval in milliseconds.
    pub probe_interval_ms: u64,
    /// Stop once the input is exhausted and everything is settled.
    pub exit_on_eof: bool,
    /// Journal path; positions are kept in memory without one.
    pub queue: Option<PathBuf>,
}

/// Runs the tracker until interrupted.
pub fn run(options: TrackOptions) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let stats = runtime.block_on(track(options))?;

    println!("Delivery summary:");
    println!("  Fixes received:  {}", stats.fixes_received);
    println!("  Fix errors:      {}", stats.fix_errors);
    println!("  Written:         {}", stats.written);
    println!("  Write failures:  {}", stats.write_failures);
    println!("  Sent:            {}", stats.sent);
    println!("  Send failures:   {}", stats.send_failures);
    println!("  Purged (stale):  {}", stats.purged_stale);
    println!("  Purged (bad):    {}", stats.purged_unencodable);
    println!("  Retries:         {}", stats.retries_armed);
    println!("  Dropped:         {}", stats.dropped);

    Ok(())
}

async fn track(options: TrackOptions) -> Result<DeliveryStats, Box<dyn std::error::Error>> {
    match options.queue.clone() {
        Some(path) => {
            let queue = JournalQueue::open_path(&path, JournalConfig::default())?;
            info!(
                path = %path.display(),
                pending = queue.pending_count(),
                next_id = queue.next_id(),
                "journal opened"
            );
            drive(Arc::new(queue), options).await
        }
        None => drive(Arc::new(MemoryQueue::new()), options).await,
    }
}

async fn drive<Q: PositionQueue>(
    queue: Arc<Q>,
    options: TrackOptions,
) -> Result<DeliveryStats, Box<dyn std::error::Error>> {
    let config = TrackerConfig::new(options.url.clone(), options.device.clone())
        .with_buffering(options.buffering)
        .with_retry_delay(Duration::from_millis(options.retry_delay_ms));
    let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
    let controller =
        TrackingController::new(config, Arc::clone(&queue), transport, OsmAndFormatter)?;

    let reader: LineReader = if options.fixes == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(&options.fixes).await?))
    };
    let source = Arc::new(
        JsonLinesSource::new(reader).with_interval(Duration::from_millis(options.interval_ms)),
    );

    let monitor = ProbeConnectivityMonitor::new(
        &options.url,
        Duration::from_millis(options.probe_interval_ms.max(1)),
    )
    .ok_or_else(|| format!("Cannot probe endpoint: {}", options.url))?;
    let online = monitor.probe_now().await;
    info!(
        target = monitor.target(),
        online,
        buffering = options.buffering,
        "tracking started"
    );

    let handle = controller.start(source.clone(), Arc::new(monitor));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupted, stopping");
        }
        () = settled(queue.as_ref(), &source, &handle, options.buffering), if options.exit_on_eof => {
            info!("input exhausted, stopping");
        }
    }

    Ok(handle.stop().await?)
}

/// Resolves once the input has ended and every fix has been dealt with.
async fn settled<Q: PositionQueue>(
    queue: &Q,
    source: &JsonLinesSource,
    handle: &TrackerHandle,
    buffering: bool,
) {
    source.finished().await;
    loop {
        let stats = handle.stats();
        let handled = if buffering {
            stats.written + stats.write_failures
        } else {
            stats.sent + stats.dropped
        };
        if stats.fixes_received >= source.delivered()
            && handled >= stats.fixes_received
            && queue.is_empty().await.unwrap_or(false)
        {
            return;
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}
