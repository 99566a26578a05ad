//! Coldfront - a liveness-aware forwarding layer for container backends
//!
//! This library fronts a single long-running backend process that is
//! started on demand and may be cold when traffic arrives. It:
//! - Forwards HTTP traffic to the backend transparently once it is warm
//! - Serves a self-polling waiting page to browsers during cold starts
//! - Returns a conventional retryable error to programmatic clients
//! - Watches the backend's internal event stream as a liveness signal,
//!   reconnecting forever with exponential backoff
//! - Renews the backend's idle-shutdown deadline on observed activity

pub mod config;
pub mod events;
pub mod gateway;
pub mod lifecycle;
pub mod responder;
pub mod server;
pub mod watcher;
