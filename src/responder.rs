//! Substitute responses served while the backend is cold-starting
//!
//! Browsers get a self-polling waiting page; programmatic clients get a
//! conventional retryable error. Both builders are pure functions of the
//! branch taken.

use crate::config::RETRY_AFTER_SECS;
use crate::lifecycle::GatewayBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Marker header present on the waiting page and absent from real backend
/// responses. Its absence on a probe response tells the page's polling
/// script the backend is ready.
pub const CONTAINER_STARTING_HEADER: &str = "x-container-starting";

/// Embedded waiting page with its polling script
const WAITING_PAGE_HTML: &str = include_str!("../static/waiting.html");

/// JSON body for the machine-facing retry response
#[derive(Debug, Serialize)]
struct RetryBody {
    error: String,
}

/// The human-facing waiting page.
///
/// Served as 200 so it does not itself read as an error; the marker header
/// distinguishes it from real content.
pub fn waiting_page() -> Response<GatewayBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(hyper::header::CACHE_CONTROL, "no-store, no-cache")
        .header(CONTAINER_STARTING_HEADER, HeaderValue::from_static("1"))
        .body(
            Full::new(Bytes::from_static(WAITING_PAGE_HTML.as_bytes()))
                .map_err(|never| match never {})
                .boxed(),
        )
        .expect("valid response builder")
}

/// The machine-facing retryable error.
pub fn retry_response(message: impl Into<String>) -> Response<GatewayBody> {
    let body = RetryBody {
        error: message.into(),
    };
    let json = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"error":"backend is starting"}"#.to_string());

    Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(hyper::header::CACHE_CONTROL, "no-store")
        .header(hyper::header::RETRY_AFTER, RETRY_AFTER_SECS.to_string())
        .body(Full::new(Bytes::from(json)).map_err(|never| match never {}).boxed())
        .expect("valid response builder")
}

/// Produce the substitute response for a backend that cannot serve yet.
pub fn cold_start_response(wants_html: bool, message: &str) -> Response<GatewayBody> {
    if wants_html {
        waiting_page()
    } else {
        retry_response(message)
    }
}
