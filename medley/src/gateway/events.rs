//! Typed gateway events.
//!
//! Every asynchronous operation resolves to exactly one event carrying
//! the request id it was invoked with. Events are multicast on a
//! broadcast channel; subscribe before invoking to observe results.

use crate::domain::{
    CollectionEntity, EntityHeader, PlaylistBriefEntity, ReplacedTracks, TagCount, TagFacetCount,
};
use crate::net::RequestId;

/// Result and failure events emitted by the gateway.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// A request failed at the transport level before an HTTP status
    /// was available.
    NetworkRequestFailed {
        request_id: RequestId,
        error_message: String,
    },

    ListCollectionsResult {
        request_id: RequestId,
        collections: Vec<CollectionEntity>,
    },
    CreateCollectionResult {
        request_id: RequestId,
        header: EntityHeader,
    },
    UpdateCollectionResult {
        request_id: RequestId,
        header: EntityHeader,
    },
    DeleteCollectionResult {
        request_id: RequestId,
    },

    ReplaceTracksResult {
        request_id: RequestId,
        result: ReplacedTracks,
    },
    RelocateTracksResult {
        request_id: RequestId,
    },
    PurgeTracksResult {
        request_id: RequestId,
    },

    ListTagFacetsResult {
        request_id: RequestId,
        facets: Vec<TagFacetCount>,
    },
    ListTagsResult {
        request_id: RequestId,
        tags: Vec<TagCount>,
    },

    CreatePlaylistResult {
        request_id: RequestId,
        playlist: PlaylistBriefEntity,
    },
    DeletePlaylistResult {
        request_id: RequestId,
    },
    LoadPlaylistBriefsResult {
        request_id: RequestId,
        playlists: Vec<PlaylistBriefEntity>,
    },
}

impl GatewayEvent {
    /// The request id this event resolves.
    pub fn request_id(&self) -> RequestId {
        match self {
            GatewayEvent::NetworkRequestFailed { request_id, .. }
            | GatewayEvent::ListCollectionsResult { request_id, .. }
            | GatewayEvent::CreateCollectionResult { request_id, .. }
            | GatewayEvent::UpdateCollectionResult { request_id, .. }
            | GatewayEvent::DeleteCollectionResult { request_id }
            | GatewayEvent::ReplaceTracksResult { request_id, .. }
            | GatewayEvent::RelocateTracksResult { request_id }
            | GatewayEvent::PurgeTracksResult { request_id }
            | GatewayEvent::ListTagFacetsResult { request_id, .. }
            | GatewayEvent::ListTagsResult { request_id, .. }
            | GatewayEvent::CreatePlaylistResult { request_id, .. }
            | GatewayEvent::DeletePlaylistResult { request_id }
            | GatewayEvent::LoadPlaylistBriefsResult { request_id, .. } => *request_id,
        }
    }
}
