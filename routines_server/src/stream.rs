//! The output side of one routine run.
//!
//! A [`Stream`] wraps the body of a single HTTP response. Every [`send`] is
//! pushed to the client as its own chunk as soon as it is written, so the
//! browser or console can render progress while the routine is still working.
//!
//! ```text
//! Stream::new ──► start(banner) ──► send / write! + flush ... ──► stop(banner)
//!                    │                                              │
//!               raise ceilings                               end the response
//! ```
//!
//! [`send`]: Stream::send

use crate::limits::{AmbientLimits, MemoryLimit, MemoryProbe, ProcessMemory, to_megabytes};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, ser::PrettyFormatter};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Where a [`Stream`]'s bytes go.
#[derive(Debug)]
pub enum Sink {
    /// The body of a live streaming response.
    Response(mpsc::Sender<Bytes>),
    /// No client is listening (batch or scheduled execution).
    Detached,
}

/// Content accepted by [`Stream::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Written verbatim.
    Text(String),
    /// Scalars are written as their plain value, anything else pretty-printed.
    Json(Value),
}

impl Payload {
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::Json)
    }

    fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(Value::String(text)) => text.clone(),
            Self::Json(scalar @ (Value::Bool(_) | Value::Number(_))) => scalar.to_string(),
            Self::Json(value) => pretty_json(value),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&String> for Payload {
    fn from(text: &String) -> Self {
        Self::Text(text.clone())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Four-space indentation, as the console has always shown JSON.
fn pretty_json(value: &Value) -> String {
    let mut out = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"    "));
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => value.to_string(),
    }
}

/// Chunked output channel for one routine run.
///
/// Task callbacks write through it with [`send`](Self::send), or accumulate text
/// with `write!` and push it with [`flush`](Self::flush). It is built once per
/// run and ends the response when stopped or dropped.
#[derive(Debug)]
pub struct Stream {
    sink: Option<mpsc::Sender<Bytes>>,
    interactive: bool,
    buffer: String,
    default_exec_time_secs: u64,
    default_memory_limit: MemoryLimit,
    ambient: Arc<AmbientLimits>,
    probe: Arc<dyn MemoryProbe>,
    started_at: Instant,
    killed: bool,
    stopped: bool,
}

impl Stream {
    /// A stream feeding `sink`. The two limits are only recorded here; they are
    /// applied by [`start`](Self::start).
    pub fn new(sink: Sink, exec_time_secs: u64, memory_limit: MemoryLimit) -> Self {
        let (sink, interactive) = match sink {
            Sink::Response(tx) => (Some(tx), true),
            Sink::Detached => (None, false),
        };
        Self {
            sink,
            interactive,
            buffer: String::new(),
            default_exec_time_secs: exec_time_secs,
            default_memory_limit: memory_limit,
            ambient: Arc::new(AmbientLimits::default()),
            probe: Arc::new(ProcessMemory),
            started_at: Instant::now(),
            killed: false,
            stopped: false,
        }
    }

    /// A stream with no client. Every send reports non-delivery.
    pub fn detached(exec_time_secs: u64, memory_limit: MemoryLimit) -> Self {
        Self::new(Sink::Detached, exec_time_secs, memory_limit)
    }

    pub fn with_ambient(mut self, ambient: Arc<AmbientLimits>) -> Self {
        self.ambient = ambient;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Measures elapsed time from `started_at` (usually when the request
    /// arrived) instead of from construction.
    pub fn with_start_time(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    /// Raises the ambient ceilings to at least this stream's defaults and, if
    /// `show_banner`, reports the effective limits.
    pub fn start(&mut self, show_banner: bool) {
        let memory = self.ambient.raise_memory_limit(self.default_memory_limit);
        let exec_secs = self.ambient.raise_exec_time(self.default_exec_time_secs);
        debug!(memory_limit = %memory, exec_time_secs = exec_secs, "Stream started");

        if show_banner {
            self.send(
                format!(
                    "Memory limit set: {memory}. Max execution time set: {exec_secs} seconds."
                ),
                2,
                0,
            );
        }
    }

    /// Reports peak memory and elapsed time if `show_banner`, then ends the
    /// response.
    pub fn stop(mut self, show_banner: bool) {
        if show_banner {
            let banner = format!(
                "Peak memory usage: {} MB. Execution time: {:.3} seconds.",
                self.peak_memory_mb(),
                self.time_elapsed().as_secs_f64()
            );
            self.send(banner, 2, 1);
        }
        self.stopped = true;
        debug!(
            elapsed_ms = self.time_elapsed().as_millis() as u64,
            "Stream stopped"
        );
    }

    /// Writes `before` newlines, the content, then `after` newlines, and pushes
    /// them to the client at once.
    ///
    /// Returns `false` when nothing was delivered: the stream is detached, the
    /// client has gone away, or a ceiling was exceeded. Detached streams also
    /// discard anything buffered with `write!`.
    pub fn send(&mut self, content: impl Into<Payload>, after: usize, before: usize) -> bool {
        if !self.interactive {
            self.buffer.clear();
            return false;
        }
        if self.sink.is_none() {
            return false;
        }
        if let Some(ceiling) = self.exceeded_ceiling() {
            self.kill(ceiling);
            return false;
        }

        let body = content.into().render();
        let mut frame = String::with_capacity(before + body.len() + after);
        frame.extend(std::iter::repeat_n('\n', before));
        frame.push_str(&body);
        frame.extend(std::iter::repeat_n('\n', after));

        let Some(tx) = self.sink.as_ref() else {
            return false;
        };
        match tx.blocking_send(Bytes::from(frame)) {
            Ok(()) => true,
            Err(_) => {
                debug!("Client went away, further output is discarded");
                self.sink = None;
                false
            }
        }
    }

    /// `send(content, 1, 0)`.
    pub fn send_line(&mut self, content: impl Into<Payload>) -> bool {
        self.send(content, 1, 0)
    }

    /// `send(content, 0, 0)`, for building a line piece by piece.
    pub fn send_inline(&mut self, content: impl Into<Payload>) -> bool {
        self.send(content, 0, 0)
    }

    /// Sends whatever was accumulated with `write!` since the last flush.
    pub fn flush(&mut self, after: usize, before: usize) -> bool {
        let pending = std::mem::take(&mut self.buffer);
        self.send(pending, after, before)
    }

    /// True unless this stream was built detached.
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// True once a ceiling was exceeded and the response was cut off.
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    pub fn time_elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Time left before the execution-time ceiling, or `None` when there is no
    /// ceiling. Saturates at zero.
    pub fn time_remaining(&self) -> Option<Duration> {
        let max = self.max_execution_time()?;
        Some(max.saturating_sub(self.time_elapsed()))
    }

    /// The effective execution-time ceiling, or `None` when unlimited.
    pub fn max_execution_time(&self) -> Option<Duration> {
        match self.ambient.exec_time_secs() {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn memory_limit(&self) -> MemoryLimit {
        self.ambient.memory_limit()
    }

    /// Current memory usage in bytes.
    pub fn memory_usage(&self) -> u64 {
        self.probe.current_bytes()
    }

    pub fn memory_usage_mb(&self) -> u64 {
        to_megabytes(self.memory_usage())
    }

    /// Peak memory usage in bytes.
    pub fn peak_memory(&self) -> u64 {
        self.probe.peak_bytes()
    }

    pub fn peak_memory_mb(&self) -> u64 {
        to_megabytes(self.peak_memory())
    }

    fn exceeded_ceiling(&self) -> Option<&'static str> {
        if self
            .time_remaining()
            .is_some_and(|remaining| remaining.is_zero())
        {
            return Some("execution time");
        }
        match self.memory_limit() {
            MemoryLimit::Bytes(limit) if self.memory_usage() > limit => Some("memory"),
            _ => None,
        }
    }

    fn kill(&mut self, ceiling: &str) {
        warn!(
            ceiling,
            elapsed_ms = self.time_elapsed().as_millis() as u64,
            memory_mb = self.memory_usage_mb(),
            "Routine exceeded its {ceiling} ceiling, ending the response"
        );
        self.killed = true;
        self.sink = None;
    }
}

impl fmt::Write for Stream {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buffer.push_str(s);
        Ok(())
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if !self.stopped && self.sink.is_some() {
            debug!("Stream dropped before stop, ending the response without a closing banner");
        }
    }
}
