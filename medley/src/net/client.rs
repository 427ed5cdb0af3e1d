//! JSON web client for one-shot server calls.
//!
//! The client binds each outgoing HTTP exchange to a caller-supplied
//! [`RequestId`], delegates in-flight bookkeeping to the
//! [`RequestReplyManager`], and turns completed exchanges into a status
//! code plus optional JSON payload. Failures are reported as events on
//! the failure channel handed in at construction, which the owning actor
//! loops back into its own message stream.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::reply_manager::{RequestReplyManager, TransportHandle};
use super::request_id::RequestId;
use super::status::{self, HttpStatusCode};
use super::transport::{HttpTransport, TransportError, TransportResponse};

/// Default timeout applied when a request is dispatched without one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Returns the parsed JSON body if the content type is JSON.
///
/// Parameters after the first `;` in the content type are ignored.
fn read_json_content(response: &TransportResponse) -> Option<Value> {
    let content_type = match &response.content_type {
        Some(content_type) => content_type,
        None => {
            warn!("Missing content type header");
            return None;
        }
    };
    let mime_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if !mime_type.eq_ignore_ascii_case("application/json") {
        warn!(content_type = %content_type, "Unexpected content type, expected JSON");
        return None;
    }
    match serde_json::from_slice(&response.body) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to parse JSON response body");
            None
        }
    }
}

/// Client for JSON/HTTP calls correlated by request id.
pub struct JsonWebClient {
    transport: Option<Arc<dyn HttpTransport>>,
    reply_manager: RequestReplyManager,
    failed_tx: mpsc::UnboundedSender<(RequestId, String)>,
}

impl JsonWebClient {
    /// Creates a client.
    ///
    /// # Arguments
    ///
    /// * `transport` - The shared HTTP transport, or `None` when detached
    /// * `failed_tx` - Channel for request failure events
    /// * `timeout_tx` - Channel on which request timeouts are delivered
    pub fn new(
        transport: Option<Arc<dyn HttpTransport>>,
        failed_tx: mpsc::UnboundedSender<(RequestId, String)>,
        timeout_tx: mpsc::UnboundedSender<RequestId>,
    ) -> Self {
        Self {
            transport,
            reply_manager: RequestReplyManager::new(timeout_tx),
            failed_tx,
        }
    }

    /// Number of requests whose replies are still expected.
    pub fn pending_request_count(&self) -> usize {
        self.reply_manager.pending_request_count()
    }

    /// Returns the transport for dispatching a request.
    ///
    /// When the client is detached from its transport the failure is
    /// reported as an event for `request_id` and `None` is returned.
    pub fn access_network(&self, request_id: RequestId) -> Option<Arc<dyn HttpTransport>> {
        match &self.transport {
            Some(transport) => Some(Arc::clone(transport)),
            None => {
                warn!(request_id = %request_id, "No network access");
                let _ = self
                    .failed_tx
                    .send((request_id, "No network access".to_string()));
                None
            }
        }
    }

    /// Registers a dispatched exchange with the reply bookkeeping.
    ///
    /// A zero timeout is replaced by [`DEFAULT_REQUEST_TIMEOUT`].
    pub fn after_request_sent(
        &mut self,
        request_id: RequestId,
        handle: TransportHandle,
        timeout: Duration,
    ) {
        let timeout = if timeout.is_zero() {
            DEFAULT_REQUEST_TIMEOUT
        } else {
            timeout
        };
        self.reply_manager
            .after_request_sent(request_id, handle, timeout);
    }

    /// Settles a completed exchange.
    ///
    /// Returns the originating request id, the HTTP status code (or the
    /// invalid sentinel), and the decoded JSON payload when
    /// `expect_json` is set and the response carried one.
    ///
    /// Stale replies are dropped with an invalid status. Transport
    /// errors emit a failure event for the request id and also yield an
    /// invalid status.
    pub fn receive_reply(
        &mut self,
        handle: &TransportHandle,
        outcome: Result<TransportResponse, TransportError>,
        expect_json: bool,
    ) -> (RequestId, HttpStatusCode, Option<Value>) {
        let (request_id, still_expected) = self.reply_manager.after_reply_received(handle);
        if !still_expected {
            info!(
                request_id = %request_id,
                "Ignoring stale reply for cancelled or timed out request"
            );
            return (request_id, status::INVALID, None);
        }

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                let error_message = e.to_string();
                warn!(
                    request_id = %request_id,
                    error = %error_message,
                    "Network request failed"
                );
                let _ = self.failed_tx.send((request_id, error_message));
                return (request_id, status::INVALID, None);
            }
        };

        let status_code = match response.status {
            Some(code) if status::is_valid(code.into()) => code.into(),
            other => {
                warn!(request_id = %request_id, status = ?other, "Invalid or missing status code");
                status::INVALID
            }
        };
        if status_code != status::INVALID && !status::is_success(status_code) {
            warn!(
                request_id = %request_id,
                status_code,
                "Reply failed with HTTP error status"
            );
        }

        let content = if expect_json && status_code != status::INVALID {
            read_json_content(&response)
        } else {
            None
        };
        debug!(request_id = %request_id, status_code, "Received reply");
        (request_id, status_code, content)
    }

    /// Cancels a pending request, aborting its exchange.
    pub fn cancel_request(&mut self, request_id: RequestId) {
        self.reply_manager.cancel_request(request_id);
    }

    /// Cancels all pending requests.
    pub fn cancel_all_requests(&mut self) {
        self.reply_manager.cancel_all_requests();
    }
}
