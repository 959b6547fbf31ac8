mod common;

use cloudbind::telemetry::{BootstrapEvent, MemorySink, RegionEvent, ResponseEvent};
use cloudbind::{
    BootstrapContext, BootstrapError, ClientProperties, ConfigurationError, FixedClock,
    ProviderError, Region, ResponseCategory, TrackingSleeper,
};
use common::{two_regions, LineParser, QueryProvider, StubRegionApi};
use http::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceExt};

fn properties(compute_endpoint: &str) -> ClientProperties {
    ClientProperties { compute_endpoint: compute_endpoint.to_string(), ..Default::default() }
}

#[tokio::test]
async fn resolves_current_region_from_region_list() {
    let api = Arc::new(two_regions().zones("us-west-1", &["us-west-1a", "us-west-1b"]));
    let ctx = BootstrapContext::builder(properties("https://ec2.us-west-1.x"))
        .region_api(api.clone())
        .sleeper(TrackingSleeper::new())
        .build()
        .unwrap();

    assert_eq!(ctx.current_region().await.unwrap(), Region::new("us-west-1"));
    let compute = ctx.compute_endpoints().await.unwrap();
    for region in compute.regions() {
        assert_eq!(compute.region_for(compute.endpoint_for(region).unwrap()).unwrap(), region);
    }
    assert_eq!(ctx.zone_to_region().await.unwrap()["us-west-1b"], Region::new("us-west-1"));
    assert_eq!(api.region_calls(), 1);
}

#[tokio::test]
async fn region_fetch_failure_reaches_every_consumer() {
    let api = Arc::new(
        StubRegionApi::new().failing_regions(ProviderError::Transport("network unreachable".into())),
    );
    let sink = MemorySink::new();
    let ctx = BootstrapContext::builder(properties("https://ec2.us-east-1.x"))
        .region_api(api.clone())
        .sink(sink.clone())
        .build()
        .unwrap();

    let direct = ctx.regions().await.unwrap_err();
    let via_zones = ctx.zone_to_region().await.unwrap_err();
    let via_current = ctx.current_region().await.unwrap_err();

    assert_eq!(api.region_calls(), 1);
    match (via_zones, via_current) {
        (cloudbind::ZoneLookupError::Regions(z), BootstrapError::Regions(c)) => {
            assert!(Arc::ptr_eq(direct.source_arc(), z.source_arc()));
            assert!(Arc::ptr_eq(direct.source_arc(), c.source_arc()));
        }
        other => panic!("unexpected errors: {other:?}"),
    }
    let replays = sink
        .events()
        .into_iter()
        .filter(|e| *e == BootstrapEvent::Regions(RegionEvent::FailureReplayed))
        .count();
    assert_eq!(replays, 2);
}

#[tokio::test]
async fn unknown_endpoint_is_a_configuration_fault() {
    let ctx = BootstrapContext::builder(properties("https://ec2.unknown.x"))
        .region_api(Arc::new(two_regions()))
        .build()
        .unwrap();

    match ctx.current_region().await.unwrap_err() {
        BootstrapError::Configuration(ConfigurationError::EndpointNotConfigured { endpoint, known, .. }) => {
            assert_eq!(endpoint, "https://ec2.unknown.x/");
            assert_eq!(known, "us-east-1, us-west-1");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn timestamp_uses_configured_expiry() {
    let props = ClientProperties { expire_interval_secs: 60, ..Default::default() };
    let ctx = BootstrapContext::builder(props)
        .region_api(Arc::new(two_regions()))
        .clock(FixedClock::from_millis(0))
        .build()
        .unwrap();

    assert_eq!(ctx.timestamp(), "1970-01-01T00:01:00.000Z");
    assert_eq!(ctx.timestamps().expire_interval(), Duration::from_secs(60));
}

#[tokio::test]
async fn readiness_overrides_flow_into_pollers() {
    let props = ClientProperties::from_json_str(
        r#"{ "readiness": { "socket_open": { "max_attempts": 5, "interval_ms": 200 } } }"#,
    )
    .unwrap();
    let ctx = BootstrapContext::builder(props).region_api(Arc::new(two_regions())).build().unwrap();

    let poller = ctx.poller(&ctx.readiness().socket_open);
    assert_eq!(poller.policy().max_attempts(), 5);
    assert_eq!(poller.policy().interval(), Duration::from_millis(200));
    assert_eq!(ctx.readiness().running.interval(), Duration::from_secs(600));
}

#[tokio::test]
async fn server_errors_surface_without_retry() {
    let sink = MemorySink::new();
    let sleeper = TrackingSleeper::new();
    let ctx = BootstrapContext::builder(ClientProperties::default())
        .region_api(Arc::new(two_regions()))
        .sleeper(sleeper.clone())
        .sink(sink.clone())
        .build()
        .unwrap();

    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = calls.clone();
    let transport = service_fn(move |_request: Request<String>| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async move {
            let response = if n == 0 {
                Response::builder()
                    .status(503)
                    .body("<Error><Code>InternalError</Code></Error>".to_string())
                    .unwrap()
            } else {
                Response::new("ok".to_string())
            };
            Ok::<_, ProviderError>(response)
        }
    });

    let svc = ctx.response_layer().layer(transport);
    let err = svc.oneshot(Request::post("https://ec2.us-east-1.amazonaws.com/").body(String::new()).unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.category(), Some(ResponseCategory::ServerError));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(sleeper.count(), 0);
    assert!(sink.events().contains(&BootstrapEvent::Response(ResponseEvent::Interpreted {
        category: ResponseCategory::ServerError,
        status: 503,
    })));
}

#[tokio::test]
async fn throttled_region_discovery_is_resent_by_the_response_policy() {
    let provider = QueryProvider::throttling(1);
    let sleeper = TrackingSleeper::new();
    let sink = MemorySink::new();
    let ctx = BootstrapContext::builder(properties("https://ec2.us-west-1.x"))
        .query_transport(provider.clone(), LineParser)
        .sleeper(sleeper.clone())
        .sink(sink.clone())
        .build()
        .unwrap();

    assert_eq!(ctx.current_region().await.unwrap(), Region::new("us-west-1"));
    assert_eq!(ctx.regions().await.unwrap().len(), 2);
    assert_eq!(provider.region_requests(), 2);
    assert_eq!(sleeper.count(), 1);

    let events = sink.events();
    assert!(events.iter().any(|e| matches!(
        e,
        BootstrapEvent::Response(ResponseEvent::RetryScheduled {
            category: ResponseCategory::ClientError,
            status: 400,
            attempt: 1,
            ..
        })
    )));
    assert!(events.contains(&BootstrapEvent::Regions(RegionEvent::Loaded { regions: 2 })));
}

#[tokio::test]
async fn exhausted_discovery_retries_are_memoized() {
    let provider = QueryProvider::throttling(usize::MAX);
    let sleeper = TrackingSleeper::new();
    let ctx = BootstrapContext::builder(properties("https://ec2.us-east-1.x"))
        .sleeper(sleeper.clone())
        .query_transport(provider.clone(), LineParser)
        .build()
        .unwrap();

    let err = ctx.regions().await.unwrap_err();
    assert_eq!(err.source_arc().code(), Some("Throttling"));
    assert_eq!(provider.region_requests(), 6);
    assert_eq!(sleeper.count(), 5);

    assert!(ctx.zone_to_region().await.is_err());
    assert!(ctx.current_region().await.is_err());
    assert_eq!(provider.region_requests(), 6);
}

#[tokio::test]
async fn zone_discovery_asks_each_regional_endpoint() {
    let provider = QueryProvider::default();
    let ctx = BootstrapContext::builder(properties("https://ec2.us-east-1.x"))
        .query_transport(provider.clone(), LineParser)
        .build()
        .unwrap();

    let zones = ctx.zone_to_region().await.unwrap();
    assert_eq!(zones.len(), 3);
    assert_eq!(zones["us-west-1a"], Region::new("us-west-1"));
    assert_eq!(zones["us-east-1b"], Region::new("us-east-1"));

    let mut hosts = provider.zone_hosts();
    hosts.sort();
    assert_eq!(hosts, ["ec2.us-east-1.x", "ec2.us-west-1.x"]);
    assert_eq!(provider.region_requests(), 1);
}
