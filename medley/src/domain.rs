//! Wire-level value types for the library server API.
//!
//! These are deliberately thin: only the fields the client subsystem
//! itself needs are modeled, everything else stays as raw JSON values.
//! Entities are serialized as two-element arrays `[header, body]` with
//! the header itself being `[uid, rev]`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Header identifying a versioned entity: unique id plus revision.
///
/// Wire format: `[uid, rev]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, Value)", into = "(String, Value)")]
pub struct EntityHeader {
    pub uid: String,
    pub rev: Value,
}

impl From<(String, Value)> for EntityHeader {
    fn from((uid, rev): (String, Value)) -> Self {
        Self { uid, rev }
    }
}

impl From<EntityHeader> for (String, Value) {
    fn from(header: EntityHeader) -> Self {
        (header.uid, header.rev)
    }
}

/// Collection properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Collection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A collection with its entity header.
///
/// Wire format: `[[uid, rev], body]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(EntityHeader, Collection)", into = "(EntityHeader, Collection)")]
pub struct CollectionEntity {
    pub header: EntityHeader,
    pub body: Collection,
}

impl From<(EntityHeader, Collection)> for CollectionEntity {
    fn from((header, body): (EntityHeader, Collection)) -> Self {
        Self { header, body }
    }
}

impl From<CollectionEntity> for (EntityHeader, Collection) {
    fn from(entity: CollectionEntity) -> Self {
        (entity.header, entity.body)
    }
}

/// Playlist properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Playlist {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// Summary of a playlist as returned by listing endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistBrief {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entries_count: u64,
}

/// A playlist summary with its entity header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(EntityHeader, PlaylistBrief)",
    into = "(EntityHeader, PlaylistBrief)"
)]
pub struct PlaylistBriefEntity {
    pub header: EntityHeader,
    pub body: PlaylistBrief,
}

impl From<(EntityHeader, PlaylistBrief)> for PlaylistBriefEntity {
    fn from((header, body): (EntityHeader, PlaylistBrief)) -> Self {
        Self { header, body }
    }
}

impl From<PlaylistBriefEntity> for (EntityHeader, PlaylistBrief) {
    fn from(entity: PlaylistBriefEntity) -> Self {
        (entity.header, entity.body)
    }
}

/// A track entity as returned by search. The track body stays raw JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(EntityHeader, Value)", into = "(EntityHeader, Value)")]
pub struct TrackEntity {
    pub header: EntityHeader,
    pub body: Value,
}

impl From<(EntityHeader, Value)> for TrackEntity {
    fn from((header, body): (EntityHeader, Value)) -> Self {
        Self { header, body }
    }
}

impl From<TrackEntity> for (EntityHeader, Value) {
    fn from(entity: TrackEntity) -> Self {
        (entity.header, entity.body)
    }
}

/// Count of tracks per tag facet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagFacetCount {
    pub facet: String,
    pub count: u64,
}

/// Count of tracks per tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagCount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub count: u64,
}

/// Per-track breakdown of a replace-tracks operation.
///
/// The server reports each track in exactly one of the five arrays.
/// Created, updated, and skipped tracks count as replaced; rejected and
/// discarded tracks count as failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplacedTracks {
    pub created: Vec<Value>,
    pub updated: Vec<Value>,
    pub skipped: Vec<Value>,
    pub rejected: Vec<Value>,
    pub discarded: Vec<Value>,
}

impl ReplacedTracks {
    pub fn replaced_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.skipped.len()
    }

    pub fn failed_count(&self) -> usize {
        self.rejected.len() + self.discarded.len()
    }

    pub fn total_count(&self) -> usize {
        self.replaced_count() + self.failed_count()
    }
}

/// Reference to a track by its canonical media URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef {
    pub location: String,
}

impl TrackRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }
}

/// A loaded track ready for export: media URI plus raw metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub media_uri: String,
    pub metadata: Value,
}

/// A track exported for a specific collection, ready to be sent as a
/// replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedTrack {
    pub media_uri: String,
    pub track: Value,
}

impl ExportedTrack {
    /// Builds the replacement object for the replace-tracks body.
    pub fn into_replacement(self) -> Value {
        json!({
            "mediaUri": self.media_uri,
            "track": self.track,
        })
    }
}

/// Exports a loaded track for replacement within a collection.
pub fn export_track(collection_uid: &str, track: &Track) -> ExportedTrack {
    let mut body = match &track.metadata {
        Value::Object(object) => object.clone(),
        _ => Map::new(),
    };
    body.insert(
        "collectionUid".to_string(),
        Value::String(collection_uid.to_string()),
    );
    ExportedTrack {
        media_uri: track.media_uri.clone(),
        track: Value::Object(body),
    }
}

/// Offset/limit pagination for listing endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Pagination {
    /// Appends the pagination parameters to a query string.
    pub fn add_to_query(&self, query: &mut Vec<(String, String)>) {
        if let Some(offset) = self.offset {
            query.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            query.push(("limit".to_string(), limit.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_header_roundtrip() {
        let json = json!(["collection-uid-1", [3, 1234567890]]);
        let header: EntityHeader = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(header.uid, "collection-uid-1");
        assert_eq!(header.rev, json!([3, 1234567890]));
        assert_eq!(serde_json::to_value(&header).unwrap(), json);
    }

    #[test]
    fn test_collection_entity_decoding() {
        let json = json!([
            ["uid-1", [1, 1000]],
            {"name": "My Library", "notes": "all my music"}
        ]);
        let entity: CollectionEntity = serde_json::from_value(json).unwrap();
        assert_eq!(entity.header.uid, "uid-1");
        assert_eq!(entity.body.name, "My Library");
        assert_eq!(entity.body.notes.as_deref(), Some("all my music"));
        assert!(entity.body.kind.is_none());
    }

    #[test]
    fn test_track_entity_keeps_raw_body() {
        let json = json!([["track-uid", [7, 42]], {"title": "Song", "artists": []}]);
        let entity: TrackEntity = serde_json::from_value(json).unwrap();
        assert_eq!(entity.header.uid, "track-uid");
        assert_eq!(entity.body["title"], "Song");
    }

    #[test]
    fn test_replaced_tracks_counts() {
        let result: ReplacedTracks = serde_json::from_value(json!({
            "created": [1, 2],
            "updated": [3],
            "skipped": [],
            "rejected": [4],
        }))
        .unwrap();
        assert_eq!(result.replaced_count(), 3);
        assert_eq!(result.failed_count(), 1);
        assert_eq!(result.total_count(), 4);
        // Missing arrays decode as empty
        assert!(result.discarded.is_empty());
    }

    #[test]
    fn test_export_track_attaches_collection() {
        let track = Track {
            media_uri: "file:///music/song.mp3".to_string(),
            metadata: json!({"title": "Song"}),
        };
        let exported = export_track("uid-1", &track);
        assert_eq!(exported.media_uri, "file:///music/song.mp3");
        assert_eq!(exported.track["collectionUid"], "uid-1");
        assert_eq!(exported.track["title"], "Song");

        let replacement = exported.into_replacement();
        assert_eq!(replacement["mediaUri"], "file:///music/song.mp3");
        assert_eq!(replacement["track"]["title"], "Song");
    }

    #[test]
    fn test_pagination_query() {
        let mut query = Vec::new();
        Pagination::default().add_to_query(&mut query);
        assert!(query.is_empty());

        let pagination = Pagination {
            offset: Some(100),
            limit: Some(50),
        };
        pagination.add_to_query(&mut query);
        assert_eq!(
            query,
            vec![
                ("offset".to_string(), "100".to_string()),
                ("limit".to_string(), "50".to_string()),
            ]
        );
    }
}
