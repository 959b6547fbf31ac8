//! JSONL sink for `cloudbind`. Writes one event per line.
//! Always appends; bring your own path.

use cloudbind::telemetry::{BootstrapEvent, PollEvent, RegionEvent, ResponseEvent, TelemetrySink};
use serde_json::{json, Value};
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower::Service<BootstrapEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: BootstrapEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(target: "cloudbind::jsonl", path = %path.display(), "event appended");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

/// The JSON object written for one event. Every object carries a `kind`.
pub fn event_to_json(event: &BootstrapEvent) -> Value {
    match event {
        BootstrapEvent::Poll(p) => match p {
            PollEvent::Attempt { policy, attempt } => {
                json!({ "kind": "poll_attempt", "policy": policy, "attempt": attempt })
            }
            PollEvent::Ready { policy, attempts, elapsed } => {
                json!({ "kind": "poll_ready", "policy": policy, "attempts": attempts, "elapsed_ms": elapsed.as_millis() as u64 })
            }
            PollEvent::Exhausted { policy, attempts, elapsed } => {
                json!({ "kind": "poll_exhausted", "policy": policy, "attempts": attempts, "elapsed_ms": elapsed.as_millis() as u64 })
            }
            PollEvent::CheckFailed { policy, attempt } => {
                json!({ "kind": "poll_check_failed", "policy": policy, "attempt": attempt })
            }
        },
        BootstrapEvent::Regions(r) => match r {
            RegionEvent::Loaded { regions } => json!({ "kind": "regions_loaded", "regions": regions }),
            RegionEvent::LoadFailed => json!({ "kind": "regions_load_failed" }),
            RegionEvent::FailureReplayed => json!({ "kind": "regions_failure_replayed" }),
            RegionEvent::ZonesMapped { regions, zones } => {
                json!({ "kind": "zones_mapped", "regions": regions, "zones": zones })
            }
        },
        BootstrapEvent::Response(r) => match r {
            ResponseEvent::RetryScheduled { category, status, attempt, delay } => json!({
                "kind": "response_retry",
                "category": category,
                "status": status,
                "attempt": attempt,
                "delay_ms": delay.as_millis() as u64,
            }),
            ResponseEvent::GaveUp { category, status } => {
                json!({ "kind": "response_gave_up", "category": category, "status": status })
            }
            ResponseEvent::Interpreted { category, status } => {
                json!({ "kind": "response_interpreted", "category": category, "status": status })
            }
        },
    }
}
