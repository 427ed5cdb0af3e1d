//! Bookkeeping for in-flight request/reply exchanges.
//!
//! The manager pairs every dispatched request id with the transport
//! handle of its in-flight HTTP exchange, arms a timeout for it, and
//! decides on completion whether the reply is still expected or stale.
//!
//! Timeouts are delivered as messages: when a timer fires, the request
//! id is sent on the timeout channel handed in at construction, and the
//! owning actor reacts by calling [`RequestReplyManager::cancel_request`].
//! This keeps all state mutation on the owning task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::request_id::RequestId;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to one in-flight HTTP exchange.
///
/// Stands in for the transport's reply object: cloneable, uniquely
/// identified, and abortable. The task driving the exchange races the
/// transport future against the cancellation token and marks the handle
/// finished once the outcome is known.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    id: u64,
    cancel: CancellationToken,
    finished: Arc<AtomicBool>,
}

impl TransportHandle {
    pub fn new() -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            cancel: CancellationToken::new(),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Unique id of this exchange.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Token the driving task races the transport future against.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Aborts the exchange. A no-op once the exchange has finished.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// True while the exchange has neither finished nor been aborted.
    pub fn is_running(&self) -> bool {
        !self.finished.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }

    /// Marks the exchange finished. Called by the driving task just
    /// before it reports the outcome.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

impl Default for TransportHandle {
    fn default() -> Self {
        Self::new()
    }
}

struct PendingReply {
    request_id: RequestId,
    timeout_task: Option<AbortHandle>,
}

/// Tracks which replies are still expected and for which request ids.
///
/// Owned by a single actor task. Maintains two maps: request id to
/// transport handle (requests whose replies are still expected) and
/// transport handle id to request id (exchanges that have not completed
/// yet). An entry present in the second map but absent from the first
/// marks a stale reply.
pub struct RequestReplyManager {
    pending_requests: HashMap<RequestId, TransportHandle>,
    pending_replies: HashMap<u64, PendingReply>,
    timeout_tx: mpsc::UnboundedSender<RequestId>,
}

impl RequestReplyManager {
    /// Creates a manager delivering timeout notifications on `timeout_tx`.
    pub fn new(timeout_tx: mpsc::UnboundedSender<RequestId>) -> Self {
        Self {
            pending_requests: HashMap::new(),
            pending_replies: HashMap::new(),
            timeout_tx,
        }
    }

    /// Number of requests whose replies are still expected.
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.len()
    }

    /// Registers a freshly dispatched exchange.
    ///
    /// A duplicate request id indicates a bookkeeping bug upstream; the
    /// previous entry is cancelled first so the maps stay consistent.
    /// A non-zero timeout arms a timer that delivers the request id on
    /// the timeout channel.
    pub fn after_request_sent(
        &mut self,
        request_id: RequestId,
        handle: TransportHandle,
        timeout: Duration,
    ) {
        debug_assert!(request_id.is_valid());
        if self.pending_requests.contains_key(&request_id) {
            error!(
                request_id = %request_id,
                "Duplicate request id, cancelling previous request"
            );
            self.cancel_request(request_id);
        }
        let timeout_task = if !timeout.is_zero() && handle.is_running() {
            let timeout_tx = self.timeout_tx.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = timeout_tx.send(request_id);
            });
            Some(task.abort_handle())
        } else {
            None
        };
        self.pending_replies.insert(
            handle.id(),
            PendingReply {
                request_id,
                timeout_task,
            },
        );
        self.pending_requests.insert(request_id, handle);
    }

    /// Cancels a pending request, aborting its exchange if still running.
    ///
    /// Unknown ids are a logged no-op; the request may have completed
    /// concurrently.
    pub fn cancel_request(&mut self, request_id: RequestId) {
        let Some(handle) = self.pending_requests.remove(&request_id) else {
            debug!(
                request_id = %request_id,
                "Cannot cancel request, already finished or cancelled"
            );
            return;
        };
        debug!(request_id = %request_id, "Cancelling request");
        if handle.is_running() {
            handle.abort();
        }
    }

    /// Cancels all pending requests.
    pub fn cancel_all_requests(&mut self) {
        while let Some(&request_id) = self.pending_requests.keys().next() {
            self.cancel_request(request_id);
        }
    }

    /// Settles the bookkeeping for a completed exchange.
    ///
    /// Returns the originating request id and whether the reply is still
    /// expected. Cancelled, timed-out, or superseded requests yield
    /// `false`, in which case the reply must be discarded.
    pub fn after_reply_received(&mut self, handle: &TransportHandle) -> (RequestId, bool) {
        let Some(pending_reply) = self.pending_replies.remove(&handle.id()) else {
            error!(handle_id = handle.id(), "Reply for unknown exchange");
            return (RequestId::INVALID, false);
        };
        if let Some(timeout_task) = pending_reply.timeout_task {
            timeout_task.abort();
        }
        let request_id = pending_reply.request_id;
        match self.pending_requests.get(&request_id) {
            None => {
                // Cancelled or timed out in the meantime
                (request_id, false)
            }
            Some(stored) if stored.id() != handle.id() => {
                warn!(
                    request_id = %request_id,
                    "Received reply for request that has been superseded"
                );
                (request_id, false)
            }
            Some(_) => {
                self.pending_requests.remove(&request_id);
                (request_id, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    fn new_manager() -> (RequestReplyManager, mpsc::UnboundedReceiver<RequestId>) {
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        (RequestReplyManager::new(timeout_tx), timeout_rx)
    }

    #[tokio::test]
    async fn test_reply_received_for_pending_request() {
        let (mut manager, _timeout_rx) = new_manager();
        let request_id = RequestId::next_valid();
        let handle = TransportHandle::new();
        manager.after_request_sent(request_id, handle.clone(), Duration::ZERO);

        let (received_id, still_expected) = manager.after_reply_received(&handle);
        assert_eq!(received_id, request_id);
        assert!(still_expected);
        assert_eq!(manager.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_yields_stale_reply() {
        let (mut manager, _timeout_rx) = new_manager();
        let request_id = RequestId::next_valid();
        let handle = TransportHandle::new();
        manager.after_request_sent(request_id, handle.clone(), Duration::ZERO);

        manager.cancel_request(request_id);
        assert!(handle.cancel_token().is_cancelled());

        let (received_id, still_expected) = manager.after_reply_received(&handle);
        assert_eq!(received_id, request_id);
        assert!(!still_expected);
    }

    #[tokio::test]
    async fn test_cancel_unknown_request_is_noop() {
        let (mut manager, _timeout_rx) = new_manager();
        manager.cancel_request(RequestId::next_valid());
        assert_eq!(manager.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_cancels_previous() {
        let (mut manager, _timeout_rx) = new_manager();
        let request_id = RequestId::next_valid();
        let first = TransportHandle::new();
        let second = TransportHandle::new();
        manager.after_request_sent(request_id, first.clone(), Duration::ZERO);
        manager.after_request_sent(request_id, second.clone(), Duration::ZERO);

        assert!(first.cancel_token().is_cancelled());
        assert!(!second.cancel_token().is_cancelled());

        // Reply for the superseded exchange is stale
        let (_, still_expected) = manager.after_reply_received(&first);
        assert!(!still_expected);

        // Reply for the replacement is expected
        let (received_id, still_expected) = manager.after_reply_received(&second);
        assert_eq!(received_id, request_id);
        assert!(still_expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_and_reply_becomes_stale() {
        let (mut manager, mut timeout_rx) = new_manager();
        let request_id = RequestId::next_valid();
        let handle = TransportHandle::new();
        manager.after_request_sent(request_id, handle.clone(), Duration::from_secs(5));

        advance(Duration::from_secs(6)).await;
        let timed_out = timeout_rx.recv().await.unwrap();
        assert_eq!(timed_out, request_id);

        // The owner reacts by cancelling the request
        manager.cancel_request(timed_out);
        assert!(handle.cancel_token().is_cancelled());

        // The late reply is reported stale and suppressed
        let (received_id, still_expected) = manager.after_reply_received(&handle);
        assert_eq!(received_id, request_id);
        assert!(!still_expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_disarms_timeout() {
        let (mut manager, mut timeout_rx) = new_manager();
        let request_id = RequestId::next_valid();
        let handle = TransportHandle::new();
        manager.after_request_sent(request_id, handle.clone(), Duration::from_secs(5));

        let (_, still_expected) = manager.after_reply_received(&handle);
        assert!(still_expected);

        advance(Duration::from_secs(10)).await;
        // Aborted timer must not deliver
        assert!(timeout_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_all_requests() {
        let (mut manager, _timeout_rx) = new_manager();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let request_id = RequestId::next_valid();
                let handle = TransportHandle::new();
                manager.after_request_sent(request_id, handle.clone(), Duration::ZERO);
                handle
            })
            .collect();

        manager.cancel_all_requests();
        assert_eq!(manager.pending_request_count(), 0);
        for handle in &handles {
            assert!(handle.cancel_token().is_cancelled());
        }
    }
}
