//! Per-request forwarding and cold-start classification
//!
//! [`ForwardingGateway::handle`] forwards one inbound request to the
//! backend and converts every failure mode into a response; nothing
//! propagates past it. The interesting part is telling a real backend
//! error from the serving layer answering for a backend that is not up
//! yet: the backend always produces structured error bodies, so an
//! empty-bodied 502/503 came from the infrastructure, not the
//! application.

use crate::lifecycle::{BackendHandle, GatewayBody, LifecycleAdapter};
use crate::responder;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use std::sync::Arc;
use tracing::{debug, error, warn};

const UNAVAILABLE_MESSAGE: &str = "The backend is starting, retry shortly";

/// Classification of one forward attempt. Lives only for the duration of a
/// single request.
pub enum ForwardOutcome {
    /// The backend answered; pass its response through
    Success(Response<GatewayBody>),
    /// Transport-level failure, the backend could not be reached
    Unreachable,
    /// Infra-level 502/503 with an empty body: the serving layer itself
    /// produced the status, the backend application never spoke
    InfraError(Response<GatewayBody>),
}

/// Orchestrates a single request against the singleton backend instance.
pub struct ForwardingGateway<A> {
    adapter: Arc<A>,
    instance_name: String,
    placement_hint: Option<String>,
}

impl<A: LifecycleAdapter> ForwardingGateway<A> {
    pub fn new(adapter: Arc<A>, instance_name: impl Into<String>, placement_hint: Option<String>) -> Self {
        Self {
            adapter,
            instance_name: instance_name.into(),
            placement_hint,
        }
    }

    /// Resolve the singleton handle. Deterministic, so per-request
    /// resolution is fine.
    pub fn resolve(&self) -> BackendHandle {
        self.adapter
            .resolve(&self.instance_name, self.placement_hint.as_deref())
    }

    /// Forward one request and convert the outcome into a response.
    /// Infallible from the caller's perspective.
    pub async fn handle(&self, req: Request<GatewayBody>) -> Response<GatewayBody> {
        let wants_html = wants_html(&req);
        let handle = self.resolve();

        debug!(
            instance = handle.id,
            method = %req.method(),
            uri = %req.uri(),
            "Forwarding request"
        );

        let outcome = match self.adapter.forward(&handle, req).await {
            Ok(response) => classify(response).await,
            Err(e) => {
                error!(instance = handle.id, error = %e, "Backend unreachable");
                ForwardOutcome::Unreachable
            }
        };

        match outcome {
            ForwardOutcome::Success(response) => response,
            ForwardOutcome::Unreachable => {
                responder::cold_start_response(wants_html, UNAVAILABLE_MESSAGE)
            }
            ForwardOutcome::InfraError(response) => {
                if wants_html {
                    warn!(
                        instance = handle.id,
                        status = %response.status(),
                        "Empty-bodied infra error, serving waiting page"
                    );
                    responder::waiting_page()
                } else {
                    // API clients already understand a raw 502/503; hand it
                    // back untouched so their own retry logic can act
                    response
                }
            }
        }
    }
}

/// Classify a forward result. Statuses other than 502/503 pass through;
/// those two get their body peeked without being consumed.
pub async fn classify(response: Response<GatewayBody>) -> ForwardOutcome {
    let status = response.status();
    if status != StatusCode::BAD_GATEWAY && status != StatusCode::SERVICE_UNAVAILABLE {
        return ForwardOutcome::Success(response);
    }

    // Buffer the body so it can be inspected and still returned intact
    let (parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(error = %e, "Failed to read 502/503 body, treating as unreachable");
            return ForwardOutcome::Unreachable;
        }
    };

    let empty = bytes.is_empty();
    let rebuilt = Response::from_parts(
        parts,
        Full::new(bytes).map_err(|never| match never {}).boxed(),
    );

    if empty {
        ForwardOutcome::InfraError(rebuilt)
    } else {
        ForwardOutcome::Success(rebuilt)
    }
}

/// Content negotiation: a request that prefers rendered markup is
/// human-facing.
pub fn wants_html<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(hyper::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false)
}
