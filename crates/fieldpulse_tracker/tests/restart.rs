//! Positions persisted by one run are delivered by the next.

use chrono::{TimeZone, Utc};
use fieldpulse_core::{JournalConfig, JournalQueue, Position};
use fieldpulse_protocol::OsmAndFormatter;
use fieldpulse_tracker::{
    ChannelPositionSource, ManualConnectivity, MockTransport, TrackerConfig, TrackingController,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn fix(minute: u32) -> Position {
    let time = Utc.with_ymd_and_hms(2024, 5, 17, 9, minute, 0).unwrap();
    Position::new("pulse-01", time, -33.8688, 151.2093)
}

async fn run_offline(path: &Path) {
    let queue = Arc::new(JournalQueue::open_path(path, JournalConfig::default()).unwrap());
    let controller = TrackingController::new(
        TrackerConfig::new("http://collector.example:5055", "pulse-01"),
        Arc::clone(&queue),
        Arc::new(MockTransport::new()),
        OsmAndFormatter,
    )
    .unwrap();

    let source = Arc::new(ChannelPositionSource::new());
    let handle = controller.start(source.clone(), Arc::new(ManualConnectivity::new(false)));
    wait_for(|| source.is_started()).await;

    for minute in 0..3 {
        assert!(source.push(fix(minute)));
    }
    wait_for(|| queue.pending_count() == 3).await;

    let stats = handle.stop().await.unwrap();
    assert_eq!(stats.written, 3);
    assert_eq!(stats.sent, 0);

    // The journal lock is released once the last queue handle is gone.
    drop(controller);
    wait_for(|| Arc::strong_count(&queue) == 1).await;
}

#[tokio::test]
async fn queued_positions_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("positions.journal");

    run_offline(&path).await;

    let queue = Arc::new(JournalQueue::open_path(&path, JournalConfig::default()).unwrap());
    assert_eq!(queue.pending_count(), 3);

    let transport = Arc::new(MockTransport::new());
    let controller = TrackingController::new(
        TrackerConfig::new("http://collector.example:5055", "pulse-01"),
        Arc::clone(&queue),
        Arc::clone(&transport),
        OsmAndFormatter,
    )
    .unwrap();
    let handle = controller.start(
        Arc::new(ChannelPositionSource::new()),
        Arc::new(ManualConnectivity::new(true)),
    );
    wait_for(|| queue.pending_count() == 0).await;
    handle.stop().await.unwrap();

    let times: Vec<String> = transport
        .delivered()
        .iter()
        .map(|r| r.get("timestamp").unwrap().to_string())
        .collect();
    let expected: Vec<String> = (0..3).map(|m| fix(m).time.timestamp().to_string()).collect();
    assert_eq!(times, expected);
    assert_eq!(queue.next_id(), 4);
}
