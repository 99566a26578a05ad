//! Long-lived watcher over the backend's event feed
//!
//! The watcher keeps a best-effort connection to the feed for the lifetime
//! of the process and uses it purely as a liveness signal: activity events
//! renew the backend's idle-shutdown deadline. It returns nothing to any
//! caller and never escalates a failure; every disconnect feeds the
//! reconnect backoff.

use crate::config::{SSE_RETRY_INIT_MS, SSE_RETRY_MAX_MS};
use crate::events::{EventDecoder, StreamEvent, EVENT_KIND_OUTPUT_DELTA};
use crate::lifecycle::{BackendHandle, ByteStream, LifecycleAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Reconnect backoff: doubles on each failed attempt, capped, reset on a
/// successful stream acquisition.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(SSE_RETRY_INIT_MS),
        }
    }

    /// Delay to sleep before the next attempt; doubles the stored delay,
    /// capped at the maximum.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(Duration::from_millis(SSE_RETRY_MAX_MS));
        current
    }

    pub fn reset(&mut self) {
        self.delay = Duration::from_millis(SSE_RETRY_INIT_MS);
    }

    pub fn current(&self) -> Duration {
        self.delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Watches the backend's event feed and renews the idle timeout on
/// activity.
pub struct EventStreamWatcher<A> {
    adapter: Arc<A>,
    instance_name: String,
    placement_hint: Option<String>,
    event_path: String,
    shutdown_rx: watch::Receiver<bool>,
}

impl<A: LifecycleAdapter> EventStreamWatcher<A> {
    pub fn new(
        adapter: Arc<A>,
        instance_name: impl Into<String>,
        placement_hint: Option<String>,
        event_path: impl Into<String>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            adapter,
            instance_name: instance_name.into(),
            placement_hint,
            event_path: event_path.into(),
            shutdown_rx,
        }
    }

    /// Run the watch loop. Does not return until shutdown is signalled;
    /// communicates only through renewal calls and logging.
    pub async fn run(mut self) {
        info!(
            instance = self.instance_name,
            path = self.event_path,
            "Event stream watcher started"
        );

        let mut backoff = Backoff::new();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let handle = self
                .adapter
                .resolve(&self.instance_name, self.placement_hint.as_deref());

            match self.adapter.open_event_stream(&handle, &self.event_path).await {
                Ok(Some(stream)) => {
                    backoff.reset();
                    debug!(instance = handle.id, "Event stream connected");
                    self.stream_events(&handle, stream).await;
                }
                Ok(None) => {
                    debug!(instance = handle.id, "No event stream readable");
                }
                Err(e) => {
                    warn!(instance = handle.id, error = %e, "Failed to open event stream");
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = self.shutdown_rx.changed() => {
                    // A closed channel means the process is tearing down;
                    // treat it like a shutdown signal rather than spinning
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(instance = self.instance_name, "Event stream watcher shutting down");
    }

    /// Consume one stream until it ends or errors. The decoder (and the
    /// stream it owns) is dropped before the next attempt.
    async fn stream_events(&self, handle: &BackendHandle, stream: ByteStream) {
        let mut decoder = EventDecoder::new(stream);

        loop {
            match decoder.next_event().await {
                Ok(Some(event)) => self.observe(handle, event).await,
                Ok(None) => {
                    debug!(instance = handle.id, "Event stream ended");
                    break;
                }
                Err(e) => {
                    warn!(instance = handle.id, error = %e, "Event stream error");
                    break;
                }
            }
        }
    }

    async fn observe(&self, handle: &BackendHandle, event: StreamEvent) {
        if event.is_activity() {
            self.adapter.renew_idle_timeout(handle).await;
            info!(instance = handle.id, kind = event.kind, "Session activity, idle timeout renewed");
        } else if event.kind != EVENT_KIND_OUTPUT_DELTA {
            // output deltas are too chatty to log
            debug!(instance = handle.id, kind = event.kind, "Backend event");
        }
    }
}
