//! Resolve track URLs to entity headers.
//!
//! Posts a list of media URLs and reports which of them the server
//! could resolve to existing track entities. URLs missing from the
//! server's answer are reported as unresolved.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;
use url::Url;

use crate::domain::EntityHeader;
use crate::net::{
    HttpTransport, JsonWebRequest, JsonWebResponse, JsonWebTask, JsonWebTaskOutcome,
    TaskAbortHandle,
};

/// A resolved track: its media URL and the entity header it maps to.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ResolvedTrackUrl(pub String, pub EntityHeader);

/// Terminal outcome of a resolve task.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveTracksByUrlOutcome {
    Finished {
        resolved: Vec<ResolvedTrackUrl>,
        unresolved: Vec<String>,
    },
    Failed(JsonWebResponse),
    NetworkRequestFailed(String),
    Aborted,
}

/// Resolves media URLs to track entity headers within a collection.
pub struct ResolveTracksByUrlTask {
    inner: JsonWebTask,
    track_urls: Vec<String>,
}

impl ResolveTracksByUrlTask {
    pub(crate) fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: Url,
        collection_uid: &str,
        track_urls: Vec<String>,
    ) -> Self {
        let content = Value::Array(
            track_urls
                .iter()
                .map(|url| Value::String(url.clone()))
                .collect(),
        );
        let request = JsonWebRequest::post("/tracks/resolve", content).with_query(vec![(
            "collectionUid".to_string(),
            collection_uid.to_string(),
        )]);
        Self {
            inner: JsonWebTask::new(transport, base_url, request),
            track_urls,
        }
    }

    /// Returns a handle that aborts the task when invoked.
    pub fn abort_handle(&self) -> TaskAbortHandle {
        self.inner.abort_handle()
    }

    /// Starts the task; exactly one outcome is delivered.
    pub fn start(
        self,
        timeout: Option<std::time::Duration>,
    ) -> oneshot::Receiver<ResolveTracksByUrlOutcome> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let track_urls = self.track_urls;
        let inner_rx = self.inner.start(timeout);
        tokio::spawn(async move {
            let outcome = match inner_rx.await {
                Ok(JsonWebTaskOutcome::Finished(response)) => {
                    decode_resolve_response(response, track_urls)
                }
                Ok(JsonWebTaskOutcome::NetworkRequestFailed(error_message)) => {
                    ResolveTracksByUrlOutcome::NetworkRequestFailed(error_message)
                }
                Ok(JsonWebTaskOutcome::Aborted) => ResolveTracksByUrlOutcome::Aborted,
                Err(_) => ResolveTracksByUrlOutcome::NetworkRequestFailed(
                    "resolve task dropped".to_string(),
                ),
            };
            let _ = outcome_tx.send(outcome);
        });
        outcome_rx
    }
}

fn decode_resolve_response(
    response: JsonWebResponse,
    track_urls: Vec<String>,
) -> ResolveTracksByUrlOutcome {
    if !response.is_status_code_success() {
        return ResolveTracksByUrlOutcome::Failed(response);
    }
    let Some(content) = response.content.clone() else {
        warn!("Missing JSON content in resolve reply");
        return ResolveTracksByUrlOutcome::Failed(response);
    };
    let resolved: Vec<ResolvedTrackUrl> = match serde_json::from_value(content) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!(error = %e, "Failed to decode resolve result");
            return ResolveTracksByUrlOutcome::Failed(response);
        }
    };
    let unresolved = track_urls
        .into_iter()
        .filter(|url| !resolved.iter().any(|entry| &entry.0 == url))
        .collect();
    ResolveTracksByUrlOutcome::Finished {
        resolved,
        unresolved,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::mock::FixedTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_partitions_resolved_and_unresolved() {
        let transport = Arc::new(FixedTransport::json(
            200,
            json!([["file:///a.mp3", ["track-a", [1, 10]]]]),
        ));
        let task = ResolveTracksByUrlTask::new(
            transport.clone(),
            "http://localhost:8080".parse().unwrap(),
            "uid-1",
            vec!["file:///a.mp3".to_string(), "file:///b.mp3".to_string()],
        );
        match task.start(None).await.unwrap() {
            ResolveTracksByUrlOutcome::Finished {
                resolved,
                unresolved,
            } => {
                assert_eq!(resolved.len(), 1);
                assert_eq!(resolved[0].0, "file:///a.mp3");
                assert_eq!(resolved[0].1.uid, "track-a");
                assert_eq!(unresolved, vec!["file:///b.mp3".to_string()]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // The request body is the URL list itself
        let requests = transport.requests.lock().unwrap();
        let body: Value = serde_json::from_slice(requests[0].json_body.as_ref().unwrap()).unwrap();
        assert_eq!(body, json!(["file:///a.mp3", "file:///b.mp3"]));
    }

    #[tokio::test]
    async fn test_resolve_failure_reports_response() {
        let transport = Arc::new(FixedTransport::empty(400));
        let task = ResolveTracksByUrlTask::new(
            transport,
            "http://localhost:8080".parse().unwrap(),
            "uid-1",
            vec!["file:///a.mp3".to_string()],
        );
        match task.start(None).await.unwrap() {
            ResolveTracksByUrlOutcome::Failed(response) => {
                assert_eq!(response.status_code, 400);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
