#![allow(dead_code)]

use async_trait::async_trait;
use cloudbind::region::AvailabilityZoneInfo;
use cloudbind::{AvailabilityZoneAndRegionApi, ProviderError, QueryResponseParser, Region, RegionMap};
use http::{Request, Response};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;
use url::Url;

/// Call-counting stand-in for the provider's discovery operations.
#[derive(Debug, Default)]
pub struct StubRegionApi {
    regions: Vec<(String, String)>,
    zones: HashMap<String, Vec<String>>,
    fail_regions: Option<ProviderError>,
    fail_zones_in: Option<String>,
    latency: Duration,
    region_calls: AtomicUsize,
    zone_calls: AtomicUsize,
}

impl StubRegionApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(mut self, name: &str, endpoint: &str) -> Self {
        self.regions.push((name.to_string(), endpoint.to_string()));
        self
    }

    pub fn zones(mut self, region: &str, zones: &[&str]) -> Self {
        self.zones.insert(region.to_string(), zones.iter().map(|z| z.to_string()).collect());
        self
    }

    pub fn failing_regions(mut self, error: ProviderError) -> Self {
        self.fail_regions = Some(error);
        self
    }

    pub fn failing_zones_in(mut self, region: &str) -> Self {
        self.fail_zones_in = Some(region.to_string());
        self
    }

    /// Simulated round-trip time for every call.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn region_calls(&self) -> usize {
        self.region_calls.load(Ordering::SeqCst)
    }

    pub fn zone_calls(&self) -> usize {
        self.zone_calls.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl AvailabilityZoneAndRegionApi for StubRegionApi {
    async fn describe_regions(&self) -> Result<RegionMap, ProviderError> {
        self.region_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if let Some(error) = &self.fail_regions {
            return Err(error.clone());
        }
        Ok(self
            .regions
            .iter()
            .map(|(name, endpoint)| (Region::new(name.as_str()), Url::parse(endpoint).unwrap()))
            .collect())
    }

    async fn describe_availability_zones_in_region(
        &self,
        region: &Region,
    ) -> Result<Vec<AvailabilityZoneInfo>, ProviderError> {
        self.zone_calls.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        if self.fail_zones_in.as_deref() == Some(region.as_str()) {
            return Err(ProviderError::Transport(format!("zones in {region} unavailable")));
        }
        Ok(self
            .zones
            .get(region.as_str())
            .into_iter()
            .flatten()
            .map(|zone| AvailabilityZoneInfo::available(zone.as_str(), region.as_str()))
            .collect())
    }
}

/// The two-region table used across the scenarios.
pub fn two_regions() -> StubRegionApi {
    StubRegionApi::new()
        .region("us-east-1", "https://ec2.us-east-1.x")
        .region("us-west-1", "https://ec2.us-west-1.x")
}

/// Query transport answering `DescribeRegions` with the two-region table and zone queries by host.
/// The first `throttled` region listings are refused with a `Throttling` error.
#[derive(Debug, Clone, Default)]
pub struct QueryProvider {
    throttled: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(String, String)>>>,
}

impl QueryProvider {
    pub fn throttling(times: usize) -> Self {
        Self { throttled: Arc::new(AtomicUsize::new(times)), ..Self::default() }
    }

    pub fn region_requests(&self) -> usize {
        self.requests("Action=DescribeRegions").len()
    }

    /// Hosts that received a zone query.
    pub fn zone_hosts(&self) -> Vec<String> {
        self.requests("Action=DescribeAvailabilityZones")
    }

    fn requests(&self, action: &str) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, body)| body.starts_with(action))
            .map(|(host, _)| host.clone())
            .collect()
    }
}

impl Service<Request<String>> for QueryProvider {
    type Response = Response<String>;
    type Error = ProviderError;
    type Future = futures::future::Ready<Result<Response<String>, ProviderError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), ProviderError>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<String>) -> Self::Future {
        let host = request.uri().host().unwrap_or_default().to_string();
        let body = request.into_body();
        let response = if body.starts_with("Action=DescribeRegions") {
            let throttle = self
                .throttled
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if throttle {
                Response::builder()
                    .status(400)
                    .body(
                        "<Response><Errors><Error><Code>Throttling</Code><Message>Rate exceeded</Message>\
                         </Error></Errors><RequestID>req-1</RequestID></Response>"
                            .to_string(),
                    )
                    .unwrap()
            } else {
                Response::new("us-east-1 https://ec2.us-east-1.x\nus-west-1 https://ec2.us-west-1.x".to_string())
            }
        } else if host == "ec2.us-west-1.x" {
            Response::new("us-west-1a".to_string())
        } else {
            Response::new("us-east-1a us-east-1b".to_string())
        };
        self.seen.lock().unwrap().push((host, body));
        futures::future::ready(Ok(response))
    }
}

/// Reads `region endpoint` lines and whitespace-separated zone ids.
#[derive(Debug)]
pub struct LineParser;

impl QueryResponseParser for LineParser {
    fn regions(&self, body: &str) -> Result<RegionMap, ProviderError> {
        body.lines()
            .map(|line| {
                let (region, endpoint) = line
                    .split_once(' ')
                    .ok_or_else(|| ProviderError::Parse(format!("malformed region line {line:?}")))?;
                let endpoint = Url::parse(endpoint).map_err(|e| ProviderError::Parse(e.to_string()))?;
                Ok((Region::new(region), endpoint))
            })
            .collect()
    }

    fn zones(&self, region: &Region, body: &str) -> Result<Vec<AvailabilityZoneInfo>, ProviderError> {
        Ok(body.split_whitespace().map(|zone| AvailabilityZoneInfo::available(zone, region.as_str())).collect())
    }
}
