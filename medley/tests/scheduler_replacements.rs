//! Integration tests for the track replacement scheduler.
//!
//! A mock gateway records the dispatched batches and can acknowledge
//! them on the same event broadcast the real gateway uses, so the
//! batching, admission, and collection isolation rules are observable
//! end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use medley::domain::{ExportedTrack, ReplacedTracks, Track, TrackRef};
use medley::gateway::GatewayEvent;
use medley::net::RequestId;
use medley::scheduler::{
    ReplacementGateway, ReplacementProgress, SchedulerConfig, TrackLoadFuture, TrackLoader,
    TrackReplacementScheduler,
};

/// Gateway mock recording each batch as (collection uid, size, id).
struct MockGateway {
    events_tx: broadcast::Sender<GatewayEvent>,
    auto_ack: bool,
    batches: Mutex<Vec<(String, usize, RequestId)>>,
}

impl MockGateway {
    fn new(events_tx: broadcast::Sender<GatewayEvent>, auto_ack: bool) -> Self {
        Self {
            events_tx,
            auto_ack,
            batches: Mutex::new(Vec::new()),
        }
    }

    fn batches(&self) -> Vec<(String, usize, RequestId)> {
        self.batches.lock().unwrap().clone()
    }

    fn ack(&self, request_id: RequestId, result: ReplacedTracks) {
        let _ = self.events_tx.send(GatewayEvent::ReplaceTracksResult {
            request_id,
            result,
        });
    }
}

impl ReplacementGateway for MockGateway {
    fn export_track(&self, collection_uid: &str, track: &Track) -> ExportedTrack {
        medley::domain::export_track(collection_uid, track)
    }

    fn invoke_replace_tracks(&self, collection_uid: &str, tracks: Vec<ExportedTrack>) -> RequestId {
        let request_id = RequestId::next_valid();
        let batch_size = tracks.len();
        self.batches
            .lock()
            .unwrap()
            .push((collection_uid.to_string(), batch_size, request_id));
        if self.auto_ack {
            self.ack(
                request_id,
                ReplacedTracks {
                    created: vec![Value::Null; batch_size],
                    ..Default::default()
                },
            );
        }
        request_id
    }
}

/// Loader that resolves every reference after a short pause, tracking
/// the peak number of concurrent loads.
struct CountingLoader {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl CountingLoader {
    fn new() -> Self {
        Self {
            current: Arc::new(AtomicUsize::new(0)),
            max: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

impl TrackLoader for CountingLoader {
    fn load_track(&self, track_ref: TrackRef) -> TrackLoadFuture {
        let current = Arc::clone(&self.current);
        let max = Arc::clone(&self.max);
        Box::pin(async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            Some(Track {
                media_uri: track_ref.location,
                metadata: json!({}),
            })
        })
    }
}

struct Harness {
    scheduler: TrackReplacementScheduler,
    gateway: Arc<MockGateway>,
    shutdown: CancellationToken,
}

impl Harness {
    fn spawn(auto_ack: bool, loader: Arc<dyn TrackLoader>) -> Self {
        let (events_tx, events_rx) = broadcast::channel(1024);
        let gateway = Arc::new(MockGateway::new(events_tx, auto_ack));
        let (scheduler, actor) = TrackReplacementScheduler::new(
            gateway.clone(),
            loader,
            SchedulerConfig::default(),
        );
        let shutdown = CancellationToken::new();
        tokio::spawn(actor.run(events_rx, shutdown.clone()));
        Self {
            scheduler,
            gateway,
            shutdown,
        }
    }

    async fn await_batches(&self, count: usize) -> Vec<(String, usize, RequestId)> {
        for _ in 0..5000 {
            let batches = self.gateway.batches();
            if batches.len() >= count {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!(
            "timed out waiting for {} batch(es), got {:?}",
            count,
            self.gateway.batches()
        );
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn track_refs(prefix: &str, count: usize) -> Vec<TrackRef> {
    (0..count)
        .map(|i| TrackRef::new(format!("file:///{}/{}.mp3", prefix, i)))
        .collect()
}

async fn wait_for_progress(
    progress_rx: &mut broadcast::Receiver<ReplacementProgress>,
    predicate: impl Fn(&ReplacementProgress) -> bool,
) -> ReplacementProgress {
    loop {
        let result = tokio::time::timeout(Duration::from_secs(5), progress_rx.recv()).await;
        match result.expect("timed out waiting for a progress snapshot") {
            Ok(progress) if predicate(&progress) => return progress,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                panic!("progress channel closed before the expected snapshot")
            }
        }
    }
}

/// Observes progress snapshots until `pending` reaches the ceiling,
/// returning the highest value seen on the way.
async fn max_pending_until_stalled(
    progress_rx: &mut broadcast::Receiver<ReplacementProgress>,
    ceiling: usize,
) -> usize {
    let mut max_pending = 0;
    loop {
        let result = tokio::time::timeout(Duration::from_secs(5), progress_rx.recv()).await;
        match result.expect("timed out waiting for the admission ceiling") {
            Ok(progress) => {
                max_pending = max_pending.max(progress.pending);
                if progress.pending >= ceiling {
                    return max_pending;
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                panic!("progress channel closed before the ceiling was reached")
            }
        }
    }
}

#[tokio::test]
async fn full_library_is_replaced_in_full_batches_plus_remainder() {
    let harness = Harness::spawn(true, Arc::new(CountingLoader::new()));
    let mut progress_rx = harness.scheduler.progress();

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 200));

    let batches = harness.await_batches(4).await;
    let sizes: Vec<usize> = batches.iter().map(|(_, size, _)| *size).collect();
    assert_eq!(sizes, vec![64, 64, 64, 8]);
    assert!(batches.iter().all(|(uid, _, _)| uid == "uid-1"));

    // All tracks are accounted for before the counters reset
    let totals = wait_for_progress(&mut progress_rx, |p| p.pending == 0 && p.queued == 0).await;
    assert_eq!(totals.succeeded + totals.failed, 200);
    assert_eq!(totals.failed, 0);
    // Draining resets the counters for the next collection
    wait_for_progress(&mut progress_rx, |p| *p == ReplacementProgress::default()).await;
}

#[tokio::test]
async fn remainder_batch_is_flushed_on_drain() {
    let harness = Harness::spawn(true, Arc::new(CountingLoader::new()));

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 65));

    let batches = harness.await_batches(2).await;
    let sizes: Vec<usize> = batches.iter().map(|(_, size, _)| *size).collect();
    assert_eq!(sizes, vec![64, 1]);
}

#[tokio::test]
async fn concurrent_loads_stay_within_the_limit() {
    let loader = Arc::new(CountingLoader::new());
    let harness = Harness::spawn(true, loader.clone() as Arc<dyn TrackLoader>);
    let mut progress_rx = harness.scheduler.progress();

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 50));

    wait_for_progress(&mut progress_rx, |p| *p == ReplacementProgress::default()).await;
    let max = loader.max_concurrent();
    assert!(max >= 1, "no loads were observed");
    assert!(max <= 8, "observed {} concurrent loads", max);
}

#[tokio::test]
async fn admission_stalls_at_the_pending_ceiling_until_a_batch_is_acknowledged() {
    let harness = Harness::spawn(false, Arc::new(CountingLoader::new()));
    let mut progress_rx = harness.scheduler.progress();
    let ceiling = SchedulerConfig::default().max_pending;

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 300));

    // Unacknowledged work builds up to the ceiling and never beyond
    let max_pending = max_pending_until_stalled(&mut progress_rx, ceiling).await;
    assert_eq!(max_pending, ceiling);

    // While every batch is unacknowledged nothing further is admitted
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(progress) = progress_rx.try_recv() {
        assert!(
            progress.pending <= ceiling,
            "pending exceeded the ceiling: {:?}",
            progress
        );
    }
    let stalled = harness.gateway.batches();
    let dispatched: usize = stalled.iter().map(|(_, size, _)| *size).sum();
    assert!(
        dispatched <= ceiling,
        "dispatched {} tracks while only {} may be pending",
        dispatched,
        ceiling
    );

    // Acknowledging one batch releases capacity and work resumes up to
    // the ceiling again
    harness.gateway.ack(
        stalled[0].2,
        ReplacedTracks {
            created: vec![Value::Null; stalled[0].1],
            ..Default::default()
        },
    );
    let resumed = harness.await_batches(stalled.len() + 1).await;
    assert!(resumed.len() > stalled.len());
    let max_pending = max_pending_until_stalled(&mut progress_rx, ceiling).await;
    assert_eq!(max_pending, ceiling);
}

#[tokio::test]
async fn replacements_for_another_collection_are_deferred() {
    let harness = Harness::spawn(false, Arc::new(CountingLoader::new()));

    harness
        .scheduler
        .invoke_replace_tracks("uid-a".to_string(), track_refs("a", 3));
    let batches = harness.await_batches(1).await;
    assert_eq!(batches[0].0, "uid-a");
    assert_eq!(batches[0].1, 3);

    // The second collection must wait for the first to drain
    harness
        .scheduler
        .invoke_replace_tracks("uid-b".to_string(), track_refs("b", 2));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.gateway.batches().len(), 1);

    harness.gateway.ack(
        batches[0].2,
        ReplacedTracks {
            created: vec![Value::Null; 3],
            ..Default::default()
        },
    );

    let batches = harness.await_batches(2).await;
    assert_eq!(batches[1].0, "uid-b");
    assert_eq!(batches[1].1, 2);
}

#[tokio::test]
async fn partial_batch_results_are_counted_per_track() {
    let harness = Harness::spawn(false, Arc::new(CountingLoader::new()));
    let mut progress_rx = harness.scheduler.progress();

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 3));
    let batches = harness.await_batches(1).await;
    assert_eq!(batches[0].1, 3);

    // Two tracks replaced, one rejected by the server
    harness.gateway.ack(
        batches[0].2,
        ReplacedTracks {
            created: vec![Value::Null],
            updated: vec![Value::Null],
            rejected: vec![Value::Null],
            ..Default::default()
        },
    );

    let totals = wait_for_progress(&mut progress_rx, |p| p.pending == 0 && p.queued == 0).await;
    assert_eq!(totals.succeeded, 2);
    assert_eq!(totals.failed, 1);
    wait_for_progress(&mut progress_rx, |p| *p == ReplacementProgress::default()).await;
}

#[tokio::test]
async fn network_failure_fails_the_whole_batch() {
    let harness = Harness::spawn(false, Arc::new(CountingLoader::new()));
    let mut progress_rx = harness.scheduler.progress();

    harness
        .scheduler
        .invoke_replace_tracks("uid-1".to_string(), track_refs("lib", 5));
    let batches = harness.await_batches(1).await;
    assert_eq!(batches[0].1, 5);

    let _ = harness
        .gateway
        .events_tx
        .send(GatewayEvent::NetworkRequestFailed {
            request_id: batches[0].2,
            error_message: "connection refused".to_string(),
        });

    let totals = wait_for_progress(&mut progress_rx, |p| p.pending == 0 && p.queued == 0).await;
    assert_eq!(totals.succeeded, 0);
    assert_eq!(totals.failed, 5);
}

#[tokio::test]
async fn cancel_discards_queued_and_deferred_work() {
    let harness = Harness::spawn(false, Arc::new(CountingLoader::new()));
    let mut progress_rx = harness.scheduler.progress();

    harness
        .scheduler
        .invoke_replace_tracks("uid-a".to_string(), track_refs("a", 40));
    harness
        .scheduler
        .invoke_replace_tracks("uid-b".to_string(), track_refs("b", 10));
    harness.scheduler.invoke_cancel();

    // In-flight loads drain without dispatching anything, and the
    // deferred collection is never promoted
    wait_for_progress(&mut progress_rx, |p| p.pending == 0 && p.queued == 0).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.gateway.batches().is_empty());
}
