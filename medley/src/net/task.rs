//! Self-contained JSON web tasks.
//!
//! A [`JsonWebTask`] performs exactly one HTTP exchange independently of
//! the gateway's request bookkeeping. It is used for search-like
//! operations where the caller wants its own timeout and abort handle
//! instead of a shared write queue. Exactly one terminal outcome is
//! delivered on the oneshot receiver returned by [`JsonWebTask::start`]:
//! finished, failed, or aborted.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::status::{self, HttpStatusCode};
use super::transport::{
    HttpMethod, HttpTransport, TransportError, TransportRequest, TransportResponse,
};

/// Default timeout for web tasks.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Declarative description of a single JSON/HTTP request.
#[derive(Debug, Clone)]
pub struct JsonWebRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// JSON body for PUT/POST requests. Must be `None` for GET/DELETE.
    pub content: Option<Value>,
}

impl JsonWebRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            content: None,
        }
    }

    pub fn put(path: impl Into<String>, content: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            path: path.into(),
            query: Vec::new(),
            content: Some(content),
        }
    }

    pub fn post(path: impl Into<String>, content: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            query: Vec::new(),
            content: Some(content),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            query: Vec::new(),
            content: None,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }
}

/// Response of a finished web task.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonWebResponse {
    pub status_code: HttpStatusCode,
    pub content: Option<Value>,
}

impl JsonWebResponse {
    pub fn is_status_code_success(&self) -> bool {
        status::is_success(self.status_code)
    }
}

/// Terminal outcome of a web task.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonWebTaskOutcome {
    /// The exchange completed; the response may still carry an HTTP
    /// error status.
    Finished(JsonWebResponse),
    /// The exchange failed at the transport level.
    NetworkRequestFailed(String),
    /// The task was aborted or timed out before completion.
    Aborted,
}

/// Cloneable handle to abort a running task.
#[derive(Debug, Clone)]
pub struct TaskAbortHandle {
    cancel: CancellationToken,
}

impl TaskAbortHandle {
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Builds the absolute request URL from the base URL, path and query.
pub(crate) fn resource_url(base_url: &Url, path: &str, query: &[(String, String)]) -> Url {
    let mut url = base_url.clone();
    url.set_path(path);
    if query.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(query);
    }
    url
}

/// One independent HTTP exchange with its own timeout and abort handle.
pub struct JsonWebTask {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    request: JsonWebRequest,
    cancel: CancellationToken,
}

impl JsonWebTask {
    pub fn new(transport: Arc<dyn HttpTransport>, base_url: Url, request: JsonWebRequest) -> Self {
        Self {
            transport,
            base_url,
            request,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a handle that aborts the task when invoked.
    ///
    /// Aborting after completion has no effect. If abort races the
    /// transport completing, the task still reports `Aborted`.
    pub fn abort_handle(&self) -> TaskAbortHandle {
        TaskAbortHandle {
            cancel: self.cancel.clone(),
        }
    }

    /// Starts the exchange on a spawned task.
    ///
    /// A timeout of `None` applies [`DEFAULT_TASK_TIMEOUT`]; expiry
    /// aborts the exchange. Exactly one outcome is delivered on the
    /// returned receiver.
    pub fn start(self, timeout: Option<Duration>) -> oneshot::Receiver<JsonWebTaskOutcome> {
        let timeout = timeout.unwrap_or(DEFAULT_TASK_TIMEOUT);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run(timeout).await;
            let _ = outcome_tx.send(outcome);
        });
        outcome_rx
    }

    async fn run(self, timeout: Duration) -> JsonWebTaskOutcome {
        let url = resource_url(&self.base_url, &self.request.path, &self.request.query);
        debug_assert!(
            self.request.content.is_none()
                || matches!(self.request.method, HttpMethod::Put | HttpMethod::Post)
        );
        let json_body = match &self.request.content {
            Some(content) => match serde_json::to_vec(content) {
                Ok(body) => Some(body),
                Err(e) => {
                    return JsonWebTaskOutcome::NetworkRequestFailed(format!(
                        "failed to serialize request body: {}",
                        e
                    ));
                }
            },
            None => None,
        };
        debug!(method = %self.request.method, url = %url, "Starting web task");

        let send_future = self.transport.send(TransportRequest {
            method: self.request.method,
            url,
            json_body,
        });
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return JsonWebTaskOutcome::Aborted;
            }
            _ = tokio::time::sleep(timeout) => {
                debug!("Web task timed out");
                return JsonWebTaskOutcome::Aborted;
            }
            result = send_future => result,
        };
        // An abort that raced the completing transport still wins
        if self.cancel.is_cancelled() {
            return JsonWebTaskOutcome::Aborted;
        }

        match result {
            Err(TransportError::Aborted) => JsonWebTaskOutcome::Aborted,
            Err(e) => JsonWebTaskOutcome::NetworkRequestFailed(e.to_string()),
            Ok(response) => JsonWebTaskOutcome::Finished(decode_response(response)),
        }
    }
}

fn decode_response(response: TransportResponse) -> JsonWebResponse {
    let status_code = match response.status {
        Some(code) if status::is_valid(code.into()) => code.into(),
        other => {
            warn!(status = ?other, "Invalid or missing status code");
            status::INVALID
        }
    };
    if status_code != status::INVALID && !status::is_success(status_code) {
        warn!(status_code, "Web task reply failed with HTTP error status");
    }

    let content = if status_code != status::INVALID {
        let is_json = response
            .content_type
            .as_deref()
            .and_then(|content_type| content_type.split(';').next())
            .map(|mime_type| mime_type.trim().eq_ignore_ascii_case("application/json"))
            .unwrap_or(false);
        if is_json {
            match serde_json::from_slice(&response.body) {
                Ok(json) => Some(json),
                Err(e) => {
                    warn!(error = %e, "Failed to parse JSON response body");
                    None
                }
            }
        } else {
            if !response.body.is_empty() {
                warn!("Reply has no JSON content");
            }
            None
        }
    } else {
        None
    };
    JsonWebResponse {
        status_code,
        content,
    }
}
