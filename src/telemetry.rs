//! Structured events emitted by the bootstrap layer.
//!
//! Every component reports what it did through a [`TelemetrySink`]: poll attempts and outcomes,
//! region list resolution (including replays of a memoized failure), and retry decisions taken
//! by the response policy. Sinks are plain `tower::Service<BootstrapEvent>` values so they
//! compose with the rest of the tower ecosystem.
//!
//! ```rust
//! use cloudbind::telemetry::{BootstrapEvent, MemorySink, PollEvent, SharedSink};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let memory = MemorySink::new();
//! let sink = SharedSink::new(memory.clone());
//! sink.emit(BootstrapEvent::Poll(PollEvent::Attempt { policy: "running".into(), attempt: 1 }))
//!     .await;
//! assert_eq!(memory.len(), 1);
//! # }
//! ```

use crate::command::ResponseCategory;
use futures::future::BoxFuture;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// Boxed future returned by every sink.
pub type SinkFuture<E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send>>;

/// A telemetry sink that consumes bootstrap events.
pub trait TelemetrySink:
    Service<BootstrapEvent, Response = (), Error = Self::SinkError, Future = SinkFuture<Self::SinkError>>
    + Clone
    + Send
    + Sync
    + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry must never fail a poll or a request, so a sink that is not ready or errors simply
/// loses the event.
pub async fn emit_best_effort<S>(sink: S, event: BootstrapEvent)
where
    S: TelemetrySink,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        let _ = ready_sink.call(event).await;
    }
}

/// Type-erased sink handle held by components.
#[derive(Clone)]
pub struct SharedSink {
    emit: Arc<dyn Fn(BootstrapEvent) -> BoxFuture<'static, ()> + Send + Sync>,
}

impl SharedSink {
    pub fn new<S: TelemetrySink>(sink: S) -> Self {
        Self {
            emit: Arc::new(move |event: BootstrapEvent| -> BoxFuture<'static, ()> {
                let sink = sink.clone();
                Box::pin(emit_best_effort(sink, event))
            }),
        }
    }

    pub async fn emit(&self, event: BootstrapEvent) {
        (self.emit)(event).await
    }
}

impl Default for SharedSink {
    fn default() -> Self {
        Self::new(LogSink)
    }
}

impl fmt::Debug for SharedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSink").finish_non_exhaustive()
    }
}

/// Top-level event envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapEvent {
    /// Readiness poller events
    Poll(PollEvent),
    /// Region and zone resolution events
    Regions(RegionEvent),
    /// Response policy decisions
    Response(ResponseEvent),
}

/// Events emitted by the readiness poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
    /// The check is about to be evaluated (1-indexed).
    Attempt { policy: String, attempt: usize },
    /// The check held.
    Ready { policy: String, attempts: usize, elapsed: Duration },
    /// Every attempt was used without the check holding.
    Exhausted { policy: String, attempts: usize, elapsed: Duration },
    /// The check itself failed; the poll was aborted.
    CheckFailed { policy: String, attempt: usize },
}

/// Events emitted while resolving regions and zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionEvent {
    /// The region list was fetched and cached.
    Loaded { regions: usize },
    /// The region list fetch failed and the failure was memoized.
    LoadFailed,
    /// A caller received the memoized failure without a new fetch.
    FailureReplayed,
    /// The zone-to-region map was built.
    ZonesMapped { regions: usize, zones: usize },
}

/// Events emitted by the response policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseEvent {
    /// A retry handler asked for the request to be resent.
    RetryScheduled { category: ResponseCategory, status: u16, attempt: usize, delay: Duration },
    /// A retry handler was consulted and declined.
    GaveUp { category: ResponseCategory, status: u16 },
    /// The response was turned into a typed error.
    Interpreted { category: ResponseCategory, status: u16 },
}

impl fmt::Display for BootstrapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapEvent::Poll(event) => write!(f, "Poll::{}", event),
            BootstrapEvent::Regions(event) => write!(f, "Regions::{}", event),
            BootstrapEvent::Response(event) => write!(f, "Response::{}", event),
        }
    }
}

impl fmt::Display for PollEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollEvent::Attempt { policy, attempt } => write!(f, "Attempt({}#{})", policy, attempt),
            PollEvent::Ready { policy, attempts, elapsed } => {
                write!(f, "Ready({}, attempts={}, elapsed={:?})", policy, attempts, elapsed)
            }
            PollEvent::Exhausted { policy, attempts, elapsed } => {
                write!(f, "Exhausted({}, attempts={}, elapsed={:?})", policy, attempts, elapsed)
            }
            PollEvent::CheckFailed { policy, attempt } => {
                write!(f, "CheckFailed({}#{})", policy, attempt)
            }
        }
    }
}

impl fmt::Display for RegionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionEvent::Loaded { regions } => write!(f, "Loaded(regions={})", regions),
            RegionEvent::LoadFailed => write!(f, "LoadFailed"),
            RegionEvent::FailureReplayed => write!(f, "FailureReplayed"),
            RegionEvent::ZonesMapped { regions, zones } => {
                write!(f, "ZonesMapped(regions={}, zones={})", regions, zones)
            }
        }
    }
}

impl fmt::Display for ResponseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseEvent::RetryScheduled { category, status, attempt, delay } => write!(
                f,
                "RetryScheduled({} {}, attempt={}, delay={:?})",
                category, status, attempt, delay
            ),
            ResponseEvent::GaveUp { category, status } => {
                write!(f, "GaveUp({} {})", category, status)
            }
            ResponseEvent::Interpreted { category, status } => {
                write!(f, "Interpreted({} {})", category, status)
            }
        }
    }
}

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<BootstrapEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: BootstrapEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events through `tracing` at INFO.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<BootstrapEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BootstrapEvent) -> Self::Future {
        tracing::info!(target: "cloudbind::telemetry", event = %event, "bootstrap_event");
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A bounded in-memory sink, mainly for tests. Oldest events are evicted first.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<BootstrapEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Snapshot of every event received so far.
    pub fn events(&self) -> Vec<BootstrapEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<BootstrapEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<BootstrapEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture<Infallible>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BootstrapEvent) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
