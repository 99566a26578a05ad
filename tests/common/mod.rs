//! Scripted mock lifecycle adapter shared by the integration tests
#![allow(dead_code)]

use coldfront::lifecycle::{
    BackendHandle, ByteStream, ForwardError, GatewayBody, LifecycleAdapter,
};
use futures::stream;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted outcome for one forward attempt
pub enum ForwardScript {
    /// Respond with this status and body
    Respond(StatusCode, &'static str),
    /// Fail as unreachable
    Unreachable,
}

/// Scripted outcome for one event-stream open attempt
pub enum StreamScript {
    /// The open call fails outright
    Fail,
    /// The call succeeds but yields no readable stream
    NoStream,
    /// A stream delivering these chunks, then ending cleanly
    Chunks(Vec<&'static [u8]>),
    /// A stream delivering these chunks, then erroring
    ChunksThenError(Vec<&'static [u8]>),
}

#[derive(Default)]
pub struct MockAdapter {
    forwards: Mutex<VecDeque<ForwardScript>>,
    streams: Mutex<VecDeque<StreamScript>>,
    renewals: AtomicUsize,
    stream_opens: AtomicUsize,
    open_times: Mutex<Vec<Instant>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_forward(&self, script: ForwardScript) {
        self.forwards.lock().push_back(script);
    }

    pub fn push_stream(&self, script: StreamScript) {
        self.streams.lock().push_back(script);
    }

    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }

    pub fn stream_opens(&self) -> usize {
        self.stream_opens.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive open attempts, for asserting backoff
    /// timing under a paused clock
    pub fn open_gaps(&self) -> Vec<Duration> {
        let times = self.open_times.lock();
        times.windows(2).map(|pair| pair[1] - pair[0]).collect()
    }
}

pub fn body_from(content: &'static str) -> GatewayBody {
    Full::new(Bytes::from_static(content.as_bytes()))
        .map_err(|never| match never {})
        .boxed()
}

fn chunk_stream(chunks: Vec<&'static [u8]>, then_error: bool) -> ByteStream {
    let mut items: Vec<Result<Bytes, ForwardError>> = chunks
        .into_iter()
        .map(|c| Ok(Bytes::from_static(c)))
        .collect();
    if then_error {
        items.push(Err(ForwardError::Stream("connection reset".to_string())));
    }
    Box::pin(stream::iter(items))
}

impl LifecycleAdapter for MockAdapter {
    fn resolve(&self, name: &str, _placement_hint: Option<&str>) -> BackendHandle {
        BackendHandle {
            id: name.to_string(),
            addr: "mock".to_string(),
        }
    }

    async fn forward(
        &self,
        _handle: &BackendHandle,
        _req: Request<GatewayBody>,
    ) -> Result<Response<GatewayBody>, ForwardError> {
        let script = self.forwards.lock().pop_front();
        match script {
            Some(ForwardScript::Respond(status, content)) => Ok(Response::builder()
                .status(status)
                .body(body_from(content))
                .expect("valid response builder")),
            Some(ForwardScript::Unreachable) | None => {
                Err(ForwardError::Stream("connection refused".to_string()))
            }
        }
    }

    async fn open_event_stream(
        &self,
        _handle: &BackendHandle,
        _path: &str,
    ) -> Result<Option<ByteStream>, ForwardError> {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        self.open_times.lock().push(Instant::now());
        let script = self.streams.lock().pop_front();
        match script {
            Some(StreamScript::Fail) => {
                Err(ForwardError::Stream("connection refused".to_string()))
            }
            Some(StreamScript::NoStream) | None => Ok(None),
            Some(StreamScript::Chunks(chunks)) => Ok(Some(chunk_stream(chunks, false))),
            Some(StreamScript::ChunksThenError(chunks)) => Ok(Some(chunk_stream(chunks, true))),
        }
    }

    async fn renew_idle_timeout(&self, _handle: &BackendHandle) {
        self.renewals.fetch_add(1, Ordering::SeqCst);
    }

    async fn register_environment(
        &self,
        _handle: &BackendHandle,
        _env: &BTreeMap<String, String>,
    ) {
    }
}
