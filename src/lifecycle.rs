//! The seam to the external backend lifecycle manager
//!
//! Everything the forwarding layer needs from the outside world goes through
//! [`LifecycleAdapter`]: handle resolution, the forwarding primitive, the
//! event-feed opener, and idle-timeout renewal. The production
//! implementation talks HTTP to the backend and to the manager's control
//! API through pooled clients.

use futures::future::ready;
use futures::{Stream, StreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

/// Body type used for everything that flows through the gateway.
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Raw bytes from the backend's event feed, before decoding.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ForwardError>> + Send>>;

/// Error type for lifecycle adapter operations
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The backend could not be reached
    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
    /// Error building the outbound request
    #[error("request build error: {0}")]
    RequestBuild(String),
    /// The event feed errored mid-stream
    #[error("stream error: {0}")]
    Stream(String),
}

/// Routable handle for the single logical backend instance.
///
/// Resolution is deterministic: the same name always yields the same
/// handle, so it is re-resolved per call rather than cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    /// Stable instance identifier
    pub id: String,
    /// Address hint used to reach the instance
    pub addr: String,
}

/// Interface to the external backend lifecycle manager.
///
/// Implementations must tolerate concurrent invocation;
/// [`renew_idle_timeout`](LifecycleAdapter::renew_idle_timeout) only ever
/// extends the idle deadline, never shortens it, so racing renewals are
/// harmless.
pub trait LifecycleAdapter: Send + Sync + 'static {
    /// Map the fixed singleton name to a routable handle. The placement
    /// hint may influence where the instance runs but not the result of
    /// resolution.
    fn resolve(&self, name: &str, placement_hint: Option<&str>) -> BackendHandle;

    /// Forward a full request to the backend. Errors only on
    /// unreachability; any HTTP status is a successful forward.
    fn forward(
        &self,
        handle: &BackendHandle,
        req: Request<GatewayBody>,
    ) -> impl Future<Output = Result<Response<GatewayBody>, ForwardError>> + Send;

    /// Open the backend's event feed. `Ok(None)` means there is nothing to
    /// read right now, which is not an error.
    fn open_event_stream(
        &self,
        handle: &BackendHandle,
        path: &str,
    ) -> impl Future<Output = Result<Option<ByteStream>, ForwardError>> + Send;

    /// Extend the backend's idle-shutdown deadline. Idempotent; failures
    /// are absorbed by the implementation.
    fn renew_idle_timeout(&self, handle: &BackendHandle) -> impl Future<Output = ()> + Send;

    /// Hand the one-time environment snapshot to the lifecycle manager so
    /// it can seed the backend's environment on the next cold start.
    /// Best-effort.
    fn register_environment(
        &self,
        handle: &BackendHandle,
        env: &BTreeMap<String, String>,
    ) -> impl Future<Output = ()> + Send;
}

/// Production adapter: pooled HTTP clients against the backend address and
/// the lifecycle manager's control address.
pub struct HttpLifecycleAdapter {
    /// Client for forwarding requests and opening the event feed
    client: Client<HttpConnector, GatewayBody>,
    /// Client for control-plane calls (renewal, environment registration)
    control_client: Client<HttpConnector, Full<Bytes>>,
    backend_addr: String,
    control_addr: String,
}

impl HttpLifecycleAdapter {
    pub fn new(backend_addr: impl Into<String>, control_addr: impl Into<String>) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(10)
            .build(connector.clone());

        let control_client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(2)
            .build(connector);

        Self {
            client,
            control_client,
            backend_addr: backend_addr.into(),
            control_addr: control_addr.into(),
        }
    }
}

impl LifecycleAdapter for HttpLifecycleAdapter {
    fn resolve(&self, name: &str, placement_hint: Option<&str>) -> BackendHandle {
        if let Some(hint) = placement_hint {
            debug!(name, hint, "Resolving backend handle with placement hint");
        }
        BackendHandle {
            id: name.to_string(),
            addr: self.backend_addr.clone(),
        }
    }

    async fn forward(
        &self,
        handle: &BackendHandle,
        req: Request<GatewayBody>,
    ) -> Result<Response<GatewayBody>, ForwardError> {
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let uri = format!("http://{}{}", handle.addr, path);

        let (parts, body) = req.into_parts();
        let mut builder = Request::builder().method(parts.method).uri(&uri);
        for (key, value) in parts.headers.iter() {
            builder = builder.header(key, value);
        }
        let backend_req = builder
            .body(body)
            .map_err(|e| ForwardError::RequestBuild(e.to_string()))?;

        let response = self.client.request(backend_req).await?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }

    async fn open_event_stream(
        &self,
        handle: &BackendHandle,
        path: &str,
    ) -> Result<Option<ByteStream>, ForwardError> {
        let uri = format!("http://{}{}", handle.addr, path);
        let req = Request::builder()
            .method("GET")
            .uri(&uri)
            .header(hyper::header::ACCEPT, "text/event-stream")
            .body(Full::new(Bytes::new()).map_err(|never| match never {}).boxed())
            .map_err(|e| ForwardError::RequestBuild(e.to_string()))?;

        let response = self.client.request(req).await?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), "Event feed not readable right now");
            return Ok(None);
        }

        let stream = BodyStream::new(response.into_body()).filter_map(|frame| {
            ready(match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(ForwardError::Stream(e.to_string()))),
            })
        });

        Ok(Some(Box::pin(stream)))
    }

    async fn renew_idle_timeout(&self, handle: &BackendHandle) {
        let uri = format!(
            "http://{}/v1/instances/{}/keepalive",
            self.control_addr, handle.id
        );
        let req = match Request::builder()
            .method("POST")
            .uri(&uri)
            .body(Full::new(Bytes::new()))
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to build keepalive request");
                return;
            }
        };

        match self.control_client.request(req).await {
            Ok(response) if response.status().is_success() => {
                debug!(instance = handle.id, "Idle timeout extended");
            }
            Ok(response) => {
                warn!(instance = handle.id, status = %response.status(), "Keepalive rejected");
            }
            Err(e) => {
                warn!(instance = handle.id, error = %e, "Keepalive call failed");
            }
        }
    }

    async fn register_environment(
        &self,
        handle: &BackendHandle,
        env: &BTreeMap<String, String>,
    ) {
        let body = match serde_json::to_vec(env) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Failed to serialize environment snapshot");
                return;
            }
        };

        let uri = format!("http://{}/v1/instances/{}/env", self.control_addr, handle.id);
        let req = match Request::builder()
            .method("PUT")
            .uri(&uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to build environment registration request");
                return;
            }
        };

        match self.control_client.request(req).await {
            Ok(response) if response.status().is_success() => {
                debug!(instance = handle.id, vars = env.len(), "Environment registered");
            }
            Ok(response) => {
                warn!(instance = handle.id, status = %response.status(), "Environment registration rejected");
            }
            Err(e) => {
                warn!(instance = handle.id, error = %e, "Environment registration failed");
            }
        }
    }
}
