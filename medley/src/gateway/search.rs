//! Track search task.
//!
//! Builds the server's search request from a base query, free-text
//! search terms, and pagination, then runs it as an independent
//! [`JsonWebTask`]. Each search term must match either a phrase in any
//! string field or a tag label, and all terms must match at once.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::warn;
use url::Url;

use crate::domain::{Pagination, TrackEntity};
use crate::net::{
    HttpTransport, JsonWebRequest, JsonWebResponse, JsonWebTask, JsonWebTaskOutcome,
    TaskAbortHandle,
};

/// Terminal outcome of a search task.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchTracksOutcome {
    /// The server answered with a track list.
    Finished(Vec<TrackEntity>),
    /// The server answered with an HTTP error status.
    Failed(JsonWebResponse),
    /// The exchange failed at the transport level.
    NetworkRequestFailed(String),
    /// The task was aborted or timed out.
    Aborted,
}

/// Builds the filter for one free-text search term.
fn term_filter(term: &str) -> Value {
    json!({
        "any": [
            // Match the term as a phrase in any string field
            {"phrase": [[], [term]]},
            // ...or as part of a tag label
            {"tag": {"label": {"contains": term}}},
        ]
    })
}

/// Parses the ordering from the base query's sort string.
///
/// Comma-separated field names with an optional `+` (ascending) or `-`
/// (descending) prefix, e.g. `"-artist,+title"`.
fn parse_ordering(sort: &str) -> Vec<Value> {
    sort.split(',')
        .filter_map(|field| {
            let field = field.trim();
            if field.is_empty() {
                return None;
            }
            let (field, direction) = if let Some(rest) = field.strip_prefix('-') {
                (rest, "dsc")
            } else if let Some(rest) = field.strip_prefix('+') {
                (rest, "asc")
            } else {
                (field, "asc")
            };
            if field.is_empty() {
                warn!(sort, "Ignoring empty sort field");
                return None;
            }
            Some(json!([field, direction]))
        })
        .collect()
}

/// Builds the search request body and query parameters.
pub(crate) fn search_tracks_request(
    collection_uid: &str,
    base_query: &Value,
    search_terms: &[String],
    pagination: Pagination,
) -> JsonWebRequest {
    let mut all_filters: Vec<Value> = Vec::new();
    if let Some(base_filter) = base_query.get("filter") {
        if !base_filter.is_null() {
            all_filters.push(base_filter.clone());
        }
    }
    for term in search_terms {
        let term = term.trim();
        if !term.is_empty() {
            all_filters.push(term_filter(term));
        }
    }

    let mut params = Map::new();
    if !all_filters.is_empty() {
        params.insert("filter".to_string(), json!({"all": all_filters}));
    }
    if let Some(sort) = base_query.get("sort").and_then(Value::as_str) {
        let ordering = parse_ordering(sort);
        if !ordering.is_empty() {
            params.insert("ordering".to_string(), Value::Array(ordering));
        }
    }

    let mut query = vec![("collectionUid".to_string(), collection_uid.to_string())];
    pagination.add_to_query(&mut query);
    JsonWebRequest::post("/tracks/search", Value::Object(params)).with_query(query)
}

/// Searches tracks within a collection.
pub struct SearchTracksTask {
    inner: JsonWebTask,
}

impl SearchTracksTask {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: Url,
        collection_uid: &str,
        base_query: &Value,
        search_terms: &[String],
        pagination: Pagination,
    ) -> Self {
        let request = search_tracks_request(collection_uid, base_query, search_terms, pagination);
        Self {
            inner: JsonWebTask::new(transport, base_url, request),
        }
    }

    /// Returns a handle that aborts the search when invoked.
    pub fn abort_handle(&self) -> TaskAbortHandle {
        self.inner.abort_handle()
    }

    /// Starts the search; exactly one outcome is delivered.
    pub fn start(
        self,
        timeout: Option<std::time::Duration>,
    ) -> oneshot::Receiver<SearchTracksOutcome> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let inner_rx = self.inner.start(timeout);
        tokio::spawn(async move {
            let outcome = match inner_rx.await {
                Ok(JsonWebTaskOutcome::Finished(response)) => decode_search_response(response),
                Ok(JsonWebTaskOutcome::NetworkRequestFailed(error_message)) => {
                    SearchTracksOutcome::NetworkRequestFailed(error_message)
                }
                Ok(JsonWebTaskOutcome::Aborted) => SearchTracksOutcome::Aborted,
                Err(_) => {
                    SearchTracksOutcome::NetworkRequestFailed("search task dropped".to_string())
                }
            };
            let _ = outcome_tx.send(outcome);
        });
        outcome_rx
    }
}

fn decode_search_response(response: JsonWebResponse) -> SearchTracksOutcome {
    if !response.is_status_code_success() {
        return SearchTracksOutcome::Failed(response);
    }
    let Some(content) = response.content.clone() else {
        warn!("Missing JSON content in search reply");
        return SearchTracksOutcome::Failed(response);
    };
    match serde_json::from_value::<Vec<TrackEntity>>(content) {
        Ok(tracks) => SearchTracksOutcome::Finished(tracks),
        Err(e) => {
            warn!(error = %e, "Failed to decode search result");
            SearchTracksOutcome::Failed(response)
        }
    }
}
