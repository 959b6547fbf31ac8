use cloudbind::telemetry::{BootstrapEvent, PollEvent, RegionEvent, ResponseEvent, SharedSink};
use cloudbind::ResponseCategory;
use cloudbind_jsonl::{event_to_json, JsonlSink};
use std::time::Duration;
use tower::Service;

#[tokio::test]
async fn writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.jsonl");
    let mut sink = JsonlSink::new(&path);

    sink.call(BootstrapEvent::Poll(PollEvent::Attempt { policy: "running".into(), attempt: 1 }))
        .await
        .unwrap();
    sink.call(BootstrapEvent::Regions(RegionEvent::FailureReplayed)).await.unwrap();

    let contents = std::fs::read_to_string(&path).expect("file");
    let lines: Vec<serde_json::Value> =
        contents.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["kind"], "poll_attempt");
    assert_eq!(lines[0]["policy"], "running");
    assert_eq!(lines[1]["kind"], "regions_failure_replayed");
}

#[tokio::test]
async fn shared_sink_swallows_write_errors() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened for appending.
    let sink = SharedSink::new(JsonlSink::new(dir.path()));
    sink.emit(BootstrapEvent::Regions(RegionEvent::LoadFailed)).await;
}

#[test]
fn response_events_carry_category_and_delay() {
    let value = event_to_json(&BootstrapEvent::Response(ResponseEvent::RetryScheduled {
        category: ResponseCategory::ClientError,
        status: 400,
        attempt: 2,
        delay: Duration::from_millis(100),
    }));
    assert_eq!(value["kind"], "response_retry");
    assert_eq!(value["category"], "client_error");
    assert_eq!(value["delay_ms"], 100);
}
