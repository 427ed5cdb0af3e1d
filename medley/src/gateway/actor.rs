//! Gateway actor: message loop, write queue, and reply dispatch.
//!
//! The actor owns the [`JsonWebClient`] and all mutable gateway state.
//! Write operations are queued and dispatched strictly one at a time in
//! FIFO order; read operations are dispatched immediately and may run
//! concurrently. Each dispatched exchange is spawned as its own task
//! that races the transport against the exchange's cancellation token
//! and reports back with a `ReplyReceived` message.

use std::collections::VecDeque;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{
    CollectionEntity, EntityHeader, PlaylistBriefEntity, ReplacedTracks, TagCount, TagFacetCount,
};
use crate::net::task::resource_url;
use crate::net::{
    status, HttpMethod, JsonWebClient, RequestId, TransportError, TransportHandle,
    TransportRequest, TransportResponse,
};

use super::events::GatewayEvent;
use super::GatewayConfig;

/// Kinds of server operations, used to dispatch reply handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Shutdown,
    ListCollections,
    CreateCollection,
    UpdateCollection,
    DeleteCollection,
    ReplaceTracks,
    RelocateTracks,
    PurgeTracks,
    ListTagFacets,
    ListTags,
    CreatePlaylist,
    DeletePlaylist,
    LoadPlaylistBriefs,
}

impl Operation {
    /// Operations that go through the serialized write queue.
    fn is_write(self) -> bool {
        matches!(
            self,
            Operation::CreateCollection
                | Operation::UpdateCollection
                | Operation::DeleteCollection
                | Operation::ReplaceTracks
                | Operation::RelocateTracks
                | Operation::PurgeTracks
                | Operation::CreatePlaylist
                | Operation::DeletePlaylist
        )
    }

    /// Operations whose replies carry a JSON payload.
    fn expects_json(self) -> bool {
        matches!(
            self,
            Operation::ListCollections
                | Operation::CreateCollection
                | Operation::UpdateCollection
                | Operation::ReplaceTracks
                | Operation::ListTagFacets
                | Operation::ListTags
                | Operation::CreatePlaylist
                | Operation::LoadPlaylistBriefs
        )
    }

    /// The status code the server responds with on success.
    fn expected_status(self) -> status::HttpStatusCode {
        match self {
            Operation::Shutdown => status::ACCEPTED,
            Operation::CreateCollection | Operation::CreatePlaylist => status::CREATED,
            Operation::DeleteCollection
            | Operation::RelocateTracks
            | Operation::PurgeTracks
            | Operation::DeletePlaylist => status::NO_CONTENT,
            _ => status::OK,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Operation::Shutdown => "shutdown",
            Operation::ListCollections => "list collections",
            Operation::CreateCollection => "create collection",
            Operation::UpdateCollection => "update collection",
            Operation::DeleteCollection => "delete collection",
            Operation::ReplaceTracks => "replace tracks",
            Operation::RelocateTracks => "relocate tracks",
            Operation::PurgeTracks => "purge tracks",
            Operation::ListTagFacets => "list tag facets",
            Operation::ListTags => "list tags",
            Operation::CreatePlaylist => "create playlist",
            Operation::DeletePlaylist => "delete playlist",
            Operation::LoadPlaylistBriefs => "load playlist briefs",
        }
    }
}

/// A read operation, dispatched immediately as GET.
#[derive(Debug)]
pub(crate) struct ReadRequest {
    pub(crate) request_id: RequestId,
    pub(crate) op: Operation,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
}

/// A write operation, queued and dispatched one at a time.
#[derive(Debug)]
pub(crate) struct WriteRequest {
    pub(crate) request_id: RequestId,
    pub(crate) op: Operation,
    pub(crate) method: HttpMethod,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
}

/// Messages processed by the gateway actor.
pub(crate) enum GatewayMsg {
    Shutdown(RequestId),
    Read(ReadRequest),
    Write(WriteRequest),
    ReplyReceived {
        op: Operation,
        handle: TransportHandle,
        outcome: Result<TransportResponse, TransportError>,
    },
}

/// The gateway's single-task state machine.
///
/// Created by [`super::Gateway::new`]; drive it with
/// [`GatewayActor::run`] on a spawned task.
pub struct GatewayActor {
    config: GatewayConfig,
    client: JsonWebClient,
    msg_tx: mpsc::UnboundedSender<GatewayMsg>,
    msg_rx: mpsc::UnboundedReceiver<GatewayMsg>,
    failed_rx: mpsc::UnboundedReceiver<(RequestId, String)>,
    timeout_rx: mpsc::UnboundedReceiver<RequestId>,
    events: broadcast::Sender<GatewayEvent>,
    queued_write_requests: VecDeque<WriteRequest>,
    pending_write_request_id: RequestId,
    shutdown_request_id: RequestId,
}

impl GatewayActor {
    pub(crate) fn new(
        config: GatewayConfig,
        client: JsonWebClient,
        msg_tx: mpsc::UnboundedSender<GatewayMsg>,
        msg_rx: mpsc::UnboundedReceiver<GatewayMsg>,
        failed_rx: mpsc::UnboundedReceiver<(RequestId, String)>,
        timeout_rx: mpsc::UnboundedReceiver<RequestId>,
        events: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            config,
            client,
            msg_tx,
            msg_rx,
            failed_rx,
            timeout_rx,
            events,
            queued_write_requests: VecDeque::new(),
            pending_write_request_id: RequestId::INVALID,
            shutdown_request_id: RequestId::INVALID,
        }
    }

    /// Runs the actor until the shutdown token is cancelled.
    ///
    /// Dropping the gateway handles does not stop the actor: it keeps
    /// its own sender for the `ReplyReceived` loopback, so the message
    /// channel stays open until the actor itself is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(base_url = %self.config.base_url, "Gateway started");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("Gateway shutting down");
                    break;
                }

                Some(request_id) = self.timeout_rx.recv() => {
                    debug!(request_id = %request_id, "Request timed out");
                    self.client.cancel_request(request_id);
                }

                Some((request_id, error_message)) = self.failed_rx.recv() => {
                    self.on_network_request_failed(request_id, error_message);
                }

                msg = self.msg_rx.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg),
                        None => break,
                    }
                }
            }
        }
        self.client.cancel_all_requests();
        info!("Gateway stopped");
    }

    fn handle_message(&mut self, msg: GatewayMsg) {
        match msg {
            GatewayMsg::Shutdown(request_id) => self.shutdown_server(request_id),
            GatewayMsg::Read(read) => {
                self.send_request(
                    read.request_id,
                    read.op,
                    HttpMethod::Get,
                    read.path,
                    read.query,
                    None,
                );
            }
            GatewayMsg::Write(write) => self.enqueue_write_request(write),
            GatewayMsg::ReplyReceived {
                op,
                handle,
                outcome,
            } => self.on_reply_received(op, &handle, outcome),
        }
    }

    /// Requests server shutdown, deferring while writes are outstanding.
    fn shutdown_server(&mut self, request_id: RequestId) {
        if self.shutdown_request_id.is_valid() && self.shutdown_request_id != request_id {
            warn!(
                request_id = %request_id,
                pending = %self.shutdown_request_id,
                "Shutdown already requested"
            );
            return;
        }
        if self.pending_write_request_id.is_valid() || !self.queued_write_requests.is_empty() {
            debug!(
                request_id = %request_id,
                "Deferring shutdown until all write requests have finished"
            );
            self.shutdown_request_id = request_id;
            return;
        }
        if self.shutdown_request_id.is_valid() {
            info!(request_id = %request_id, "Resuming deferred shutdown");
            self.shutdown_request_id = RequestId::INVALID;
        }
        self.send_request(
            request_id,
            Operation::Shutdown,
            HttpMethod::Post,
            "/shutdown".to_string(),
            Vec::new(),
            None,
        );
    }

    fn enqueue_write_request(&mut self, write: WriteRequest) {
        self.queued_write_requests.push_back(write);
        // Dispatch immediately when no other write is in flight
        self.finish_write_request(RequestId::INVALID);
    }

    /// Settles the pending write slot and dispatches the next queued
    /// write, if any.
    ///
    /// Must be called exactly once per completed write request with its
    /// id, or with the invalid id to poke the queue after enqueueing.
    fn finish_write_request(&mut self, finished_request_id: RequestId) {
        if finished_request_id.is_valid() {
            if self.pending_write_request_id != finished_request_id {
                warn!(
                    finished = %finished_request_id,
                    pending = %self.pending_write_request_id,
                    "Mismatch between finished and pending write request"
                );
                return;
            }
            self.pending_write_request_id = RequestId::INVALID;
        } else if self.pending_write_request_id.is_valid() {
            // A write is still in flight, the queued request has to wait
            return;
        }

        let Some(write) = self.queued_write_requests.pop_front() else {
            if self.shutdown_request_id.is_valid() {
                let shutdown_request_id = self.shutdown_request_id;
                self.shutdown_server(shutdown_request_id);
            }
            return;
        };
        debug_assert!(!(write.method == HttpMethod::Delete && write.body.is_some()));
        self.pending_write_request_id = write.request_id;
        self.send_request(
            write.request_id,
            write.op,
            write.method,
            write.path,
            write.query,
            write.body,
        );
    }

    /// Dispatches an HTTP exchange as an independent task.
    ///
    /// The spawned task races the transport future against the
    /// exchange's cancellation token and reports the outcome back as a
    /// `ReplyReceived` message. Transport access failures surface as a
    /// failure event for the request id.
    fn send_request(
        &mut self,
        request_id: RequestId,
        op: Operation,
        method: HttpMethod,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) {
        let Some(transport) = self.client.access_network(request_id) else {
            return;
        };
        let url = resource_url(&self.config.base_url, &path, &query);
        let json_body = match body {
            Some(body) => match serde_json::to_vec(&body) {
                Ok(json_body) => Some(json_body),
                Err(e) => {
                    warn!(request_id = %request_id, error = %e, "Failed to serialize request body");
                    self.on_network_request_failed(
                        request_id,
                        format!("failed to serialize request body: {}", e),
                    );
                    return;
                }
            },
            None => None,
        };
        debug!(request_id = %request_id, method = %method, url = %url, "Dispatching request");

        let handle = TransportHandle::new();
        self.client
            .after_request_sent(request_id, handle.clone(), self.config.request_timeout);

        let cancel = handle.cancel_token();
        let send_future = transport.send(TransportRequest {
            method,
            url,
            json_body,
        });
        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Aborted),
                outcome = send_future => outcome,
            };
            handle.mark_finished();
            let _ = msg_tx.send(GatewayMsg::ReplyReceived {
                op,
                handle,
                outcome,
            });
        });
    }

    /// Handles a completed exchange: settles the reply bookkeeping,
    /// advances the write queue, and emits the typed result event.
    fn on_reply_received(
        &mut self,
        op: Operation,
        handle: &TransportHandle,
        outcome: Result<TransportResponse, TransportError>,
    ) {
        let (request_id, status_code, content) =
            self.client.receive_reply(handle, outcome, op.expects_json());
        if !request_id.is_valid() {
            return;
        }
        // The write slot is settled for every terminal outcome,
        // including HTTP failures, network failures, and stale replies
        if op.is_write() {
            self.finish_write_request(request_id);
        }
        if status_code != op.expected_status() {
            warn!(
                request_id = %request_id,
                status_code,
                expected = op.expected_status(),
                "Request '{}' failed",
                op.describe()
            );
            return;
        }
        self.emit_result(op, request_id, content);
    }

    fn emit_result(&mut self, op: Operation, request_id: RequestId, content: Option<Value>) {
        let event = match op {
            Operation::Shutdown => {
                info!(request_id = %request_id, "Server accepted shutdown request");
                return;
            }
            Operation::ListCollections => GatewayEvent::ListCollectionsResult {
                request_id,
                collections: decode_content::<Vec<CollectionEntity>>(op, content)
                    .unwrap_or_default(),
            },
            Operation::CreateCollection => {
                let Some(header) = decode_content::<EntityHeader>(op, content) else {
                    return;
                };
                GatewayEvent::CreateCollectionResult { request_id, header }
            }
            Operation::UpdateCollection => {
                let Some(header) = decode_content::<EntityHeader>(op, content) else {
                    return;
                };
                GatewayEvent::UpdateCollectionResult { request_id, header }
            }
            Operation::DeleteCollection => GatewayEvent::DeleteCollectionResult { request_id },
            Operation::ReplaceTracks => {
                let Some(result) = decode_content::<ReplacedTracks>(op, content) else {
                    return;
                };
                GatewayEvent::ReplaceTracksResult { request_id, result }
            }
            Operation::RelocateTracks => GatewayEvent::RelocateTracksResult { request_id },
            Operation::PurgeTracks => GatewayEvent::PurgeTracksResult { request_id },
            Operation::ListTagFacets => GatewayEvent::ListTagFacetsResult {
                request_id,
                facets: decode_content::<Vec<TagFacetCount>>(op, content).unwrap_or_default(),
            },
            Operation::ListTags => GatewayEvent::ListTagsResult {
                request_id,
                tags: decode_content::<Vec<TagCount>>(op, content).unwrap_or_default(),
            },
            Operation::CreatePlaylist => {
                let Some(playlist) = decode_content::<PlaylistBriefEntity>(op, content) else {
                    return;
                };
                GatewayEvent::CreatePlaylistResult {
                    request_id,
                    playlist,
                }
            }
            Operation::DeletePlaylist => GatewayEvent::DeletePlaylistResult { request_id },
            Operation::LoadPlaylistBriefs => GatewayEvent::LoadPlaylistBriefsResult {
                request_id,
                playlists: decode_content::<Vec<PlaylistBriefEntity>>(op, content)
                    .unwrap_or_default(),
            },
        };
        let _ = self.events.send(event);
    }

    /// Settles the write slot for failed dispatches and forwards the
    /// failure event to subscribers.
    fn on_network_request_failed(&mut self, request_id: RequestId, error_message: String) {
        if self.pending_write_request_id.is_valid()
            && self.pending_write_request_id == request_id
        {
            self.finish_write_request(request_id);
        }
        let _ = self.events.send(GatewayEvent::NetworkRequestFailed {
            request_id,
            error_message,
        });
    }
}

/// Decodes a typed result payload, logging and discarding undecodable
/// content.
fn decode_content<T: serde::de::DeserializeOwned>(op: Operation, content: Option<Value>) -> Option<T> {
    let Some(content) = content else {
        warn!("Missing JSON content in '{}' reply", op.describe());
        return None;
    };
    match serde_json::from_value(content) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(error = %e, "Failed to decode '{}' result", op.describe());
            None
        }
    }
}
