//! Low-level networking building blocks.
//!
//! This module provides the pieces shared by all server operations:
//! request correlation ids, HTTP status helpers, the transport
//! abstraction over reqwest, bookkeeping for in-flight replies, and the
//! JSON web client/task primitives built on top of them.
//!
//! # Architecture
//!
//! ```text
//! Gateway actor ──> JsonWebClient ──> RequestReplyManager
//!       │                │                  │
//!       │                └──> HttpTransport (reqwest or mock)
//!       │
//!       └──> JsonWebTask (self-contained, one exchange per task)
//! ```

pub mod client;
pub mod reply_manager;
pub mod request_id;
pub mod status;
pub mod task;
pub mod transport;

pub use client::{JsonWebClient, DEFAULT_REQUEST_TIMEOUT};
pub use reply_manager::{RequestReplyManager, TransportHandle};
pub use request_id::RequestId;
pub use status::HttpStatusCode;
pub use task::{
    JsonWebRequest, JsonWebResponse, JsonWebTask, JsonWebTaskOutcome, TaskAbortHandle,
    DEFAULT_TASK_TIMEOUT,
};
pub use transport::{
    HttpMethod, HttpTransport, ReqwestTransport, TransportError, TransportRequest,
    TransportResponse,
};
