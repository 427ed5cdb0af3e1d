//! Medley - Asynchronous JSON/HTTP client for a music library server
//!
//! This library provides the client-side plumbing for talking to a local
//! music library server over HTTP/JSON: request correlation, in-flight
//! reply tracking with timeouts, one-shot web tasks, a gateway facade
//! with a serialized write queue, and a background scheduler that batches
//! track replacement requests.
//!
//! # High-Level API
//!
//! ```ignore
//! use std::sync::Arc;
//! use medley::gateway::{Gateway, GatewayConfig};
//! use medley::net::ReqwestTransport;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = GatewayConfig::new("http://127.0.0.1:8080".parse()?);
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let (gateway, actor) = Gateway::new(config, transport);
//! let mut events = gateway.subscribe();
//!
//! let shutdown = CancellationToken::new();
//! tokio::spawn(actor.run(shutdown.clone()));
//!
//! let request_id = gateway.invoke_list_collections(Default::default());
//! ```

pub mod domain;
pub mod gateway;
pub mod logging;
pub mod net;
pub mod scheduler;

/// Version of the medley library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
