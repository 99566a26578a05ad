//! Decoded events from the backend's internal feed
//!
//! The feed is a server-sent-events byte stream. [`EventDecoder`] turns raw
//! chunks into discrete [`StreamEvent`]s; the watcher consumes them purely
//! as a liveness signal and never hands them to a caller.

use crate::lifecycle::{ByteStream, ForwardError};
use futures::StreamExt;
use tracing::warn;

/// Event kind that signals session activity. Each one renews the backend's
/// idle-shutdown deadline.
pub const EVENT_KIND_ACTIVITY: &str = "session_activity";

/// High-frequency incremental output updates. Suppressed from logging so
/// they do not flood the diagnostics.
pub const EVENT_KIND_OUTPUT_DELTA: &str = "output_delta";

/// Kind assigned when a record carries data but no explicit event field.
const DEFAULT_EVENT_KIND: &str = "message";

/// Upper bound on a single buffered record. A record that grows past this
/// without a terminating blank line is discarded wholesale so a misbehaving
/// feed cannot grow the buffer without bound.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// A decoded unit from the backend's event feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Event kind, an open string
    pub kind: String,
    /// Opaque payload; not interpreted by this layer
    pub payload: String,
}

impl StreamEvent {
    /// Whether this event renews the idle timeout
    pub fn is_activity(&self) -> bool {
        self.kind == EVENT_KIND_ACTIVITY
    }
}

/// Incremental SSE decoder over a raw byte stream.
///
/// One decoder per connection; the sequence of events is finite (it ends
/// when the stream ends or errors) and not restartable.
pub struct EventDecoder {
    stream: ByteStream,
    buffer: Vec<u8>,
    /// Bytes before this offset are already known to hold no blank line
    scan_from: usize,
    /// Set while skipping the tail of an oversized record
    discarding: bool,
    done: bool,
}

impl EventDecoder {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            scan_from: 0,
            discarding: false,
            done: false,
        }
    }

    /// Decode the next event. `Ok(None)` means the stream ended cleanly;
    /// an incomplete trailing record is discarded.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, ForwardError> {
        loop {
            if let Some(record) = self.take_record() {
                if self.discarding {
                    // Tail of a record that already overflowed the buffer
                    self.discarding = false;
                    continue;
                }
                if let Some(event) = parse_record(&record) {
                    return Ok(Some(event));
                }
                // Comment-only or empty record, keep going
                continue;
            }

            if self.buffer.len() > MAX_RECORD_BYTES {
                warn!(bytes = self.buffer.len(), "Discarding oversized event record");
                self.buffer.clear();
                self.scan_from = 0;
                self.discarding = true;
            }

            if self.done {
                return Ok(None);
            }

            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    // Normalize CRLF so record scanning only looks for \n\n
                    self.buffer.extend(chunk.iter().filter(|&&b| b != b'\r'));
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.done = true;
                }
            }
        }
    }

    /// Split a complete record (terminated by a blank line) out of the
    /// buffer, if one is present. Scanning resumes where the last failed
    /// scan left off, one byte back so a separator split across chunks is
    /// still seen.
    fn take_record(&mut self) -> Option<Vec<u8>> {
        let start = self.scan_from.saturating_sub(1);
        let pos = self.buffer[start..]
            .windows(2)
            .position(|window| window == b"\n\n")
            .map(|p| p + start);

        match pos {
            Some(pos) => {
                self.scan_from = 0;
                let mut record: Vec<u8> = self.buffer.drain(..pos + 2).collect();
                record.truncate(pos);
                Some(record)
            }
            None => {
                self.scan_from = self.buffer.len();
                None
            }
        }
    }
}

fn parse_record(record: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(record);
    let mut kind: Option<String> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => kind = Some(value.to_string()),
            "data" => data.push(value),
            // id and retry are not used as liveness signals
            _ => {}
        }
    }

    if kind.is_none() && data.is_empty() {
        return None;
    }

    Some(StreamEvent {
        kind: kind.unwrap_or_else(|| DEFAULT_EVENT_KIND.to_string()),
        payload: data.join("\n"),
    })
}
