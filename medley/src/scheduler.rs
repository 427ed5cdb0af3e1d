//! Background scheduler for batched track replacement.
//!
//! Synchronizing a whole library means loading thousands of tracks and
//! uploading them as replacements. The scheduler bounds the number of
//! concurrently loading tracks, buffers exported tracks into batches,
//! and keeps at most a couple of batches in flight towards the gateway.
//! Replacement requests for a different collection than the active one
//! are deferred until the active collection has drained.
//!
//! # Architecture
//!
//! ```text
//! invoke_replace_tracks ──> SchedulerActor ──> TrackLoader (spawned loads)
//!                                │   ▲
//!                                │   └── loaded tracks (mpsc)
//!                                ├──> ReplacementGateway::invoke_replace_tracks
//!                                ├──< GatewayEvent broadcast (results, failures)
//!                                └──> ReplacementProgress (broadcast)
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::domain::{ExportedTrack, ReplacedTracks, Track, TrackRef};
use crate::gateway::{Gateway, GatewayEvent};
use crate::net::RequestId;

/// Boxed future returned by [`TrackLoader::load_track`].
pub type TrackLoadFuture = Pin<Box<dyn Future<Output = Option<Track>> + Send + 'static>>;

/// Asynchronously loads tracks by reference.
///
/// Returns `None` when the track cannot be loaded; the scheduler counts
/// such tracks as failed.
pub trait TrackLoader: Send + Sync + 'static {
    fn load_track(&self, track_ref: TrackRef) -> TrackLoadFuture;
}

/// The gateway operations the scheduler depends on.
///
/// Implemented by [`Gateway`]; tests substitute mocks.
pub trait ReplacementGateway: Send + Sync + 'static {
    fn export_track(&self, collection_uid: &str, track: &Track) -> ExportedTrack;

    fn invoke_replace_tracks(
        &self,
        collection_uid: &str,
        tracks: Vec<ExportedTrack>,
    ) -> RequestId;
}

impl ReplacementGateway for Gateway {
    fn export_track(&self, collection_uid: &str, track: &Track) -> ExportedTrack {
        Gateway::export_track(self, collection_uid, track)
    }

    fn invoke_replace_tracks(
        &self,
        collection_uid: &str,
        tracks: Vec<ExportedTrack>,
    ) -> RequestId {
        Gateway::invoke_replace_tracks(self, collection_uid, tracks)
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently loading tracks.
    pub max_loading: usize,
    /// Number of exported tracks per replacement batch. Batching
    /// reduces request overhead; individual tracks can still be
    /// rejected or skipped by the server without failing the batch.
    pub batch_size: usize,
    /// Admission ceiling for unfinished work: loading plus buffered
    /// plus unacknowledged batches. No new loads start at or above
    /// this limit.
    pub max_pending: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let max_loading = 8;
        let batch_size = 64;
        Self {
            max_loading,
            batch_size,
            // Two full batches plus the loading slots
            max_pending: 2 * (max_loading + batch_size),
        }
    }
}

/// Snapshot of the scheduler's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplacementProgress {
    /// Track references waiting to be loaded.
    pub queued: usize,
    /// Tracks loading, buffered, or part of an unacknowledged batch.
    pub pending: usize,
    /// Tracks replaced since the current collection became active.
    pub succeeded: usize,
    /// Tracks that failed to load or were rejected by the server.
    pub failed: usize,
}

enum SchedulerMsg {
    ReplaceTracks {
        collection_uid: String,
        track_refs: Vec<TrackRef>,
    },
    Cancel,
}

/// Cloneable handle to the scheduler actor.
#[derive(Clone)]
pub struct TrackReplacementScheduler {
    msg_tx: mpsc::UnboundedSender<SchedulerMsg>,
    progress_tx: broadcast::Sender<ReplacementProgress>,
}

impl TrackReplacementScheduler {
    /// Creates the scheduler handle and its actor.
    ///
    /// The actor must be driven on a spawned task with a subscription
    /// to the gateway's event broadcast:
    ///
    /// ```ignore
    /// let (scheduler, actor) = TrackReplacementScheduler::new(
    ///     Arc::new(gateway.clone()), loader, SchedulerConfig::default());
    /// tokio::spawn(actor.run(gateway.subscribe(), shutdown_token));
    /// ```
    pub fn new(
        gateway: Arc<dyn ReplacementGateway>,
        loader: Arc<dyn TrackLoader>,
        config: SchedulerConfig,
    ) -> (Self, SchedulerActor) {
        debug_assert!(config.max_loading <= config.max_pending);
        debug_assert!(config.batch_size <= config.max_pending);
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        let (progress_tx, _) = broadcast::channel(1024);
        let handle = Self {
            msg_tx,
            progress_tx: progress_tx.clone(),
        };
        let actor = SchedulerActor {
            config,
            gateway,
            loader,
            msg_rx,
            loaded_tx,
            loaded_rx,
            progress_tx,
            deferred_requests: VecDeque::new(),
            collection_uid: None,
            queued_track_refs: VecDeque::new(),
            loading_track_refs: Vec::new(),
            buffered_requests: Vec::new(),
            pending_requests: HashMap::new(),
            pending_counter: 0,
            succeeded_counter: 0,
            failed_counter: 0,
        };
        (handle, actor)
    }

    /// Schedules replacement of the given tracks within a collection.
    ///
    /// Requests for a different collection than the active one are
    /// deferred until the active collection has drained.
    pub fn invoke_replace_tracks(&self, collection_uid: String, track_refs: Vec<TrackRef>) {
        if self
            .msg_tx
            .send(SchedulerMsg::ReplaceTracks {
                collection_uid,
                track_refs,
            })
            .is_err()
        {
            warn!("Scheduler actor is gone, dropping replacement request");
        }
    }

    /// Cancels all queued and deferred work. In-flight loads and writes
    /// complete but their results are no longer tracked.
    pub fn invoke_cancel(&self) {
        if self.msg_tx.send(SchedulerMsg::Cancel).is_err() {
            warn!("Scheduler actor is gone, dropping cancel request");
        }
    }

    /// Subscribes to progress snapshots, emitted after every state
    /// transition.
    pub fn progress(&self) -> broadcast::Receiver<ReplacementProgress> {
        self.progress_tx.subscribe()
    }
}

/// The scheduler's single-task state machine.
pub struct SchedulerActor {
    config: SchedulerConfig,
    gateway: Arc<dyn ReplacementGateway>,
    loader: Arc<dyn TrackLoader>,
    msg_rx: mpsc::UnboundedReceiver<SchedulerMsg>,
    loaded_tx: mpsc::UnboundedSender<(TrackRef, Option<Track>)>,
    loaded_rx: mpsc::UnboundedReceiver<(TrackRef, Option<Track>)>,
    progress_tx: broadcast::Sender<ReplacementProgress>,

    /// Replacement requests for other collections, in arrival order.
    deferred_requests: VecDeque<(String, Vec<TrackRef>)>,
    /// The collection all current work belongs to.
    collection_uid: Option<String>,
    queued_track_refs: VecDeque<TrackRef>,
    loading_track_refs: Vec<TrackRef>,
    buffered_requests: Vec<ExportedTrack>,
    /// Unacknowledged replace requests with their batch sizes.
    pending_requests: HashMap<RequestId, usize>,
    pending_counter: usize,
    succeeded_counter: usize,
    failed_counter: usize,
}

impl SchedulerActor {
    /// Runs the actor until the shutdown token is cancelled or all
    /// scheduler handles are dropped.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<GatewayEvent>,
        shutdown: CancellationToken,
    ) {
        info!(
            max_loading = self.config.max_loading,
            batch_size = self.config.batch_size,
            max_pending = self.config.max_pending,
            "Track replacement scheduler started"
        );
        let mut events_closed = false;
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Scheduler shutting down");
                    break;
                }

                msg = self.msg_rx.recv() => {
                    match msg {
                        Some(SchedulerMsg::ReplaceTracks { collection_uid, track_refs }) => {
                            self.replace_tracks(collection_uid, track_refs);
                        }
                        Some(SchedulerMsg::Cancel) => self.cancel(),
                        None => break,
                    }
                }

                Some((track_ref, track)) = self.loaded_rx.recv() => {
                    self.on_track_loaded(track_ref, track);
                }

                event = events.recv(), if !events_closed => {
                    match event {
                        Ok(GatewayEvent::ReplaceTracksResult { request_id, result }) => {
                            self.on_replace_tracks_result(request_id, result);
                        }
                        Ok(GatewayEvent::NetworkRequestFailed { request_id, error_message }) => {
                            self.on_network_request_failed(request_id, error_message);
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Scheduler lagged behind gateway events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events_closed = true;
                        }
                    }
                }
            }
        }
        info!("Track replacement scheduler stopped");
    }

    fn is_loading(&self, track_ref: &TrackRef) -> bool {
        self.loading_track_refs.contains(track_ref)
    }

    fn enter_loading(&mut self, track_ref: TrackRef) -> bool {
        if self.is_loading(&track_ref) {
            return false;
        }
        self.loading_track_refs.push(track_ref);
        true
    }

    fn leave_loading(&mut self, track_ref: &TrackRef) -> bool {
        match self.loading_track_refs.iter().position(|r| r == track_ref) {
            Some(index) => {
                self.loading_track_refs.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn replace_tracks(&mut self, collection_uid: String, track_refs: Vec<TrackRef>) {
        if collection_uid.is_empty() {
            warn!(
                count = track_refs.len(),
                "Cannot replace tracks without a collection UID"
            );
            return;
        }
        match &self.collection_uid {
            None => {
                self.collection_uid = Some(collection_uid);
                self.queued_track_refs.extend(track_refs);
                self.make_progress();
            }
            Some(active) if *active == collection_uid => {
                self.queued_track_refs.extend(track_refs);
                self.make_progress();
            }
            Some(_) => {
                debug!(
                    collection_uid = %collection_uid,
                    count = track_refs.len(),
                    "Deferring replacement of tracks in different collection"
                );
                self.deferred_requests
                    .push_back((collection_uid, track_refs));
            }
        }
    }

    fn cancel(&mut self) {
        self.deferred_requests.clear();
        self.collection_uid = None;
        self.queued_track_refs.clear();
        // In-flight loads finish on their own and are discarded as they
        // arrive. Buffered tracks and unacknowledged batches are no
        // longer tracked, so their pending contribution is released.
        self.pending_counter = self
            .pending_counter
            .saturating_sub(self.buffered_requests.len());
        self.buffered_requests.clear();
        for (_, batch_size) in self.pending_requests.drain() {
            self.pending_counter = self.pending_counter.saturating_sub(batch_size);
        }
        self.make_progress();
    }

    fn on_track_loaded(&mut self, track_ref: TrackRef, track: Option<Track>) {
        if !self.leave_loading(&track_ref) {
            debug!(location = %track_ref.location, "Ignoring loaded track");
            return;
        }
        let Some(track) = track else {
            warn!(location = %track_ref.location, "Failed to load track");
            self.pending_counter = self.pending_counter.saturating_sub(1);
            self.failed_counter += 1;
            self.emit_progress();
            return;
        };
        let Some(collection_uid) = self.collection_uid.clone() else {
            // Cancelled while the track was loading
            warn!(location = %track_ref.location, "Skipping loaded track");
            self.pending_counter = self.pending_counter.saturating_sub(1);
            self.failed_counter += 1;
            self.emit_progress();
            return;
        };

        self.buffered_requests
            .push(self.gateway.export_track(&collection_uid, &track));
        if self.buffered_requests.len() >= self.config.batch_size
            || (self.queued_track_refs.is_empty() && self.loading_track_refs.is_empty())
        {
            let batch = std::mem::take(&mut self.buffered_requests);
            let batch_size = batch.len();
            let request_id = self
                .gateway
                .invoke_replace_tracks(&collection_uid, batch);
            debug!(
                request_id = %request_id,
                batch_size,
                "Dispatched replacement batch"
            );
            debug_assert!(!self.pending_requests.contains_key(&request_id));
            self.pending_requests.insert(request_id, batch_size);
        }

        self.make_progress();
    }

    fn on_replace_tracks_result(&mut self, request_id: RequestId, result: ReplacedTracks) {
        if self.pending_requests.remove(&request_id).is_none() {
            trace!(request_id = %request_id, "Ignoring result of untracked request");
            return;
        }
        let replaced = result.replaced_count();
        let failed = result.failed_count();
        self.pending_counter = self.pending_counter.saturating_sub(replaced + failed);
        self.succeeded_counter += replaced;
        self.failed_counter += failed;
        debug!(
            request_id = %request_id,
            created = result.created.len(),
            updated = result.updated.len(),
            skipped = result.skipped.len(),
            "Replaced {} track(s)",
            replaced
        );
        if failed > 0 {
            warn!(request_id = %request_id, "Failed to replace {} track(s)", failed);
        }
        self.emit_progress();
        self.make_progress();
    }

    fn on_network_request_failed(&mut self, request_id: RequestId, error_message: String) {
        let Some(batch_size) = self.pending_requests.remove(&request_id) else {
            return;
        };
        warn!(
            request_id = %request_id,
            error = %error_message,
            batch_size,
            "Failed to replace batch of tracks"
        );
        // The whole batch is lost
        self.pending_counter = self.pending_counter.saturating_sub(batch_size);
        self.failed_counter += batch_size;
        self.emit_progress();
        self.make_progress();
    }

    /// The scheduling pump: starts loads within the admission limits,
    /// detects the drained state, and promotes deferred collections.
    fn make_progress(&mut self) {
        while self.collection_uid.is_some() {
            while !self.queued_track_refs.is_empty()
                && self.loading_track_refs.len() < self.config.max_loading
                && self.pending_counter < self.config.max_pending
            {
                let Some(track_ref) = self.queued_track_refs.pop_front() else {
                    break;
                };
                if self.enter_loading(track_ref.clone()) {
                    self.pending_counter += 1;
                    let loader = Arc::clone(&self.loader);
                    let loaded_tx = self.loaded_tx.clone();
                    tokio::spawn(async move {
                        let track = loader.load_track(track_ref.clone()).await;
                        let _ = loaded_tx.send((track_ref, track));
                    });
                } else {
                    // Duplicate reference, safe to drop
                    debug!(location = %track_ref.location, "Track is already loading");
                }
            }
            if self.queued_track_refs.is_empty() && self.pending_counter == 0 {
                // Idle, reset for the next collection
                self.collection_uid = None;
                self.succeeded_counter = 0;
                self.failed_counter = 0;
            }
            self.emit_progress();
            if self.collection_uid.is_none() {
                let Some((collection_uid, track_refs)) = self.deferred_requests.pop_front()
                else {
                    return;
                };
                debug_assert!(self.queued_track_refs.is_empty());
                self.collection_uid = Some(collection_uid);
                self.queued_track_refs.extend(track_refs);
            } else {
                // Wait for loads or results
                return;
            }
        }
        self.emit_progress();
    }

    fn emit_progress(&self) {
        let progress = ReplacementProgress {
            queued: self.queued_track_refs.len(),
            pending: self.pending_counter,
            succeeded: self.succeeded_counter,
            failed: self.failed_counter,
        };
        trace!(?progress, "Emitting progress");
        let _ = self.progress_tx.send(progress);
    }
}
