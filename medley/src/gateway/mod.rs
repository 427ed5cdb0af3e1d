//! Gateway facade for the library server API.
//!
//! The [`Gateway`] handle is cheap to clone and can be used from any
//! task. Each `invoke_*` method draws a fresh [`RequestId`], sends the
//! operation to the gateway actor, and returns the id immediately; the
//! corresponding [`GatewayEvent`] is delivered later on the broadcast
//! channel obtained from [`Gateway::subscribe`].
//!
//! Mutating operations (collections, playlists, track replacement,
//! relocation, purging) are serialized through a FIFO write queue with
//! at most one request in flight. Read operations and the search/resolve
//! tasks bypass the queue.

mod actor;
mod events;
pub mod resolve;
pub mod search;

pub use actor::GatewayActor;
pub use events::GatewayEvent;
pub use resolve::{ResolveTracksByUrlOutcome, ResolveTracksByUrlTask, ResolvedTrackUrl};
pub use search::{SearchTracksOutcome, SearchTracksTask};

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use url::Url;

use crate::domain::{
    export_track, Collection, CollectionEntity, ExportedTrack, Pagination, Playlist, Track,
};
use crate::net::{HttpMethod, HttpTransport, JsonWebClient, RequestId, DEFAULT_REQUEST_TIMEOUT};

use actor::{GatewayMsg, Operation, ReadRequest, WriteRequest};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the library server, e.g. `http://127.0.0.1:8080`.
    pub base_url: Url,
    /// Timeout applied to every dispatched request.
    pub request_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl GatewayConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            event_capacity: 256,
        }
    }
}

/// Appends a trailing slash so prefix predicates only match whole
/// directory components.
fn dir_prefix(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Cloneable handle to the gateway actor.
pub struct Gateway {
    msg_tx: mpsc::UnboundedSender<GatewayMsg>,
    events: broadcast::Sender<GatewayEvent>,
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
}

impl Clone for Gateway {
    fn clone(&self) -> Self {
        Self {
            msg_tx: self.msg_tx.clone(),
            events: self.events.clone(),
            transport: Arc::clone(&self.transport),
            base_url: self.base_url.clone(),
        }
    }
}

impl Gateway {
    /// Creates the gateway handle and its actor.
    ///
    /// The actor must be driven on a spawned task:
    ///
    /// ```ignore
    /// let (gateway, actor) = Gateway::new(config, transport);
    /// tokio::spawn(actor.run(shutdown_token));
    /// ```
    pub fn new(config: GatewayConfig, transport: Arc<dyn HttpTransport>) -> (Self, GatewayActor) {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (failed_tx, failed_rx) = mpsc::unbounded_channel();
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let client = JsonWebClient::new(Some(Arc::clone(&transport)), failed_tx, timeout_tx);
        let gateway = Self {
            msg_tx: msg_tx.clone(),
            events: events.clone(),
            transport,
            base_url: config.base_url.clone(),
        };
        let actor = GatewayActor::new(
            config, client, msg_tx, msg_rx, failed_rx, timeout_rx, events,
        );
        (gateway, actor)
    }

    /// Subscribes to result and failure events.
    ///
    /// Subscribe before invoking operations; events emitted earlier are
    /// not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events.subscribe()
    }

    fn send(&self, msg: GatewayMsg) {
        if self.msg_tx.send(msg).is_err() {
            warn!("Gateway actor is gone, dropping request");
        }
    }

    fn invoke_read(
        &self,
        op: Operation,
        path: String,
        query: Vec<(String, String)>,
    ) -> RequestId {
        let request_id = RequestId::next_valid();
        self.send(GatewayMsg::Read(ReadRequest {
            request_id,
            op,
            path,
            query,
        }));
        request_id
    }

    fn invoke_write(
        &self,
        op: Operation,
        method: HttpMethod,
        path: String,
        query: Vec<(String, String)>,
        body: Option<Value>,
    ) -> RequestId {
        let request_id = RequestId::next_valid();
        self.send(GatewayMsg::Write(WriteRequest {
            request_id,
            op,
            method,
            path,
            query,
            body,
        }));
        request_id
    }

    /// Requests a graceful server shutdown.
    ///
    /// Deferred until all queued and pending write requests have
    /// finished; repeated requests while one is parked are ignored.
    pub fn invoke_shutdown(&self) -> RequestId {
        let request_id = RequestId::next_valid();
        self.send(GatewayMsg::Shutdown(request_id));
        request_id
    }

    pub fn invoke_list_collections(&self, pagination: Pagination) -> RequestId {
        let mut query = Vec::new();
        pagination.add_to_query(&mut query);
        self.invoke_read(Operation::ListCollections, "/collections".to_string(), query)
    }

    pub fn invoke_create_collection(&self, collection: Collection) -> RequestId {
        self.invoke_write(
            Operation::CreateCollection,
            HttpMethod::Post,
            "/collections".to_string(),
            Vec::new(),
            serde_json::to_value(collection).ok(),
        )
    }

    pub fn invoke_update_collection(&self, collection_entity: CollectionEntity) -> RequestId {
        let path = format!("/collections/{}", collection_entity.header.uid);
        self.invoke_write(
            Operation::UpdateCollection,
            HttpMethod::Put,
            path,
            Vec::new(),
            serde_json::to_value(collection_entity).ok(),
        )
    }

    pub fn invoke_delete_collection(&self, collection_uid: &str) -> RequestId {
        self.invoke_write(
            Operation::DeleteCollection,
            HttpMethod::Delete,
            format!("/collections/{}", collection_uid),
            Vec::new(),
            None,
        )
    }

    /// Replaces or creates the given tracks within a collection.
    pub fn invoke_replace_tracks(
        &self,
        collection_uid: &str,
        tracks: Vec<ExportedTrack>,
    ) -> RequestId {
        let replacements: Vec<Value> = tracks
            .into_iter()
            .map(ExportedTrack::into_replacement)
            .collect();
        self.invoke_write(
            Operation::ReplaceTracks,
            HttpMethod::Post,
            "/tracks/replace".to_string(),
            vec![("collectionUid".to_string(), collection_uid.to_string())],
            Some(json!({
                "mode": "update-or-create",
                "replacements": replacements,
            })),
        )
    }

    /// Relocates individual tracks from old to new media URIs.
    pub fn invoke_relocate_tracks(
        &self,
        collection_uid: &str,
        relocated_locations: Vec<(String, String)>,
    ) -> RequestId {
        let body: Vec<Value> = relocated_locations
            .into_iter()
            .map(|(old_location, new_location)| {
                json!({
                    "predicate": {"exact": old_location},
                    "replacement": new_location,
                })
            })
            .collect();
        self.invoke_write(
            Operation::RelocateTracks,
            HttpMethod::Post,
            "/tracks/relocate".to_string(),
            vec![("collectionUid".to_string(), collection_uid.to_string())],
            Some(Value::Array(body)),
        )
    }

    /// Relocates all tracks under a directory prefix.
    pub fn invoke_relocate_all_tracks(
        &self,
        collection_uid: &str,
        old_dir: &str,
        new_dir: &str,
    ) -> RequestId {
        let body = vec![json!({
            "predicate": {"prefix": dir_prefix(old_dir)},
            "replacement": dir_prefix(new_dir),
        })];
        self.invoke_write(
            Operation::RelocateTracks,
            HttpMethod::Post,
            "/tracks/relocate".to_string(),
            vec![("collectionUid".to_string(), collection_uid.to_string())],
            Some(Value::Array(body)),
        )
    }

    /// Purges the given tracks from a collection.
    pub fn invoke_purge_tracks(
        &self,
        collection_uid: &str,
        track_locations: Vec<String>,
    ) -> RequestId {
        let body: Vec<Value> = track_locations
            .into_iter()
            .map(|location| json!({"exact": location}))
            .collect();
        self.invoke_write(
            Operation::PurgeTracks,
            HttpMethod::Post,
            "/tracks/purge".to_string(),
            vec![("collectionUid".to_string(), collection_uid.to_string())],
            Some(Value::Array(body)),
        )
    }

    /// Purges all tracks under a directory prefix.
    pub fn invoke_purge_all_tracks(&self, collection_uid: &str, root_dir: &str) -> RequestId {
        let body = vec![json!({"prefix": dir_prefix(root_dir)})];
        self.invoke_write(
            Operation::PurgeTracks,
            HttpMethod::Post,
            "/tracks/purge".to_string(),
            vec![("collectionUid".to_string(), collection_uid.to_string())],
            Some(Value::Array(body)),
        )
    }

    pub fn invoke_list_tag_facets(
        &self,
        collection_uid: &str,
        facets: Option<&[String]>,
        pagination: Pagination,
    ) -> RequestId {
        let mut query = vec![("collectionUid".to_string(), collection_uid.to_string())];
        if let Some(facets) = facets {
            query.push(("facet".to_string(), facets.join(",")));
        }
        pagination.add_to_query(&mut query);
        self.invoke_read(Operation::ListTagFacets, "/tags/facets".to_string(), query)
    }

    pub fn invoke_list_tags(
        &self,
        collection_uid: &str,
        facets: Option<&[String]>,
        pagination: Pagination,
    ) -> RequestId {
        let mut query = vec![("collectionUid".to_string(), collection_uid.to_string())];
        if let Some(facets) = facets {
            query.push(("facets".to_string(), facets.join(",")));
        }
        pagination.add_to_query(&mut query);
        self.invoke_read(Operation::ListTags, "/tags".to_string(), query)
    }

    pub fn invoke_create_playlist(&self, playlist: Playlist) -> RequestId {
        self.invoke_write(
            Operation::CreatePlaylist,
            HttpMethod::Post,
            "/playlists".to_string(),
            Vec::new(),
            serde_json::to_value(playlist).ok(),
        )
    }

    pub fn invoke_delete_playlist(&self, playlist_uid: &str) -> RequestId {
        self.invoke_write(
            Operation::DeletePlaylist,
            HttpMethod::Delete,
            format!("/playlists/{}", playlist_uid),
            Vec::new(),
            None,
        )
    }

    pub fn invoke_load_playlist_briefs(&self) -> RequestId {
        self.invoke_read(
            Operation::LoadPlaylistBriefs,
            "/playlists".to_string(),
            Vec::new(),
        )
    }

    /// Exports a loaded track for replacement within a collection.
    pub fn export_track(&self, collection_uid: &str, track: &Track) -> ExportedTrack {
        export_track(collection_uid, track)
    }

    /// Creates a search task. The task bypasses the write queue and
    /// runs with its own timeout and abort handle.
    pub fn search_tracks(
        &self,
        collection_uid: &str,
        base_query: &Value,
        search_terms: &[String],
        pagination: Pagination,
    ) -> SearchTracksTask {
        SearchTracksTask::new(
            Arc::clone(&self.transport),
            self.base_url.clone(),
            collection_uid,
            base_query,
            search_terms,
            pagination,
        )
    }

    /// Creates a task resolving track URLs to entity headers.
    pub fn resolve_tracks_by_url(
        &self,
        collection_uid: &str,
        track_urls: Vec<String>,
    ) -> ResolveTracksByUrlTask {
        ResolveTracksByUrlTask::new(
            Arc::clone(&self.transport),
            self.base_url.clone(),
            collection_uid,
            track_urls,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_prefix_appends_slash_once() {
        assert_eq!(dir_prefix("file:///music"), "file:///music/");
        assert_eq!(dir_prefix("file:///music/"), "file:///music/");
    }

    #[test]
    fn test_config_defaults() {
        let config = GatewayConfig::new("http://localhost:8080".parse().unwrap());
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert!(config.event_capacity > 0);
    }
}
