//! Region and zone discovery over the provider's query API.
//!
//! [`QueryRegionApi`] expands the `DescribeRegions` and `DescribeAvailabilityZones` routes and
//! sends them through a tower service. The context hands it the transport wrapped in its
//! [`ResponsePolicyLayer`](crate::policy::ResponsePolicyLayer), so a throttled or redirected
//! discovery call is resent the same way as any other request before the region loader sees
//! the outcome. Reading successful bodies is left to a [`QueryResponseParser`].
//!
//! Zone queries go to the region's own endpoint, learned from the last region listing.

use crate::error::ProviderError;
use crate::region::{AvailabilityZoneInfo, Region, RegionMap};
use crate::regions::AvailabilityZoneAndRegionApi;
use crate::routes::{compute_query_routes, RouteTable};
use async_trait::async_trait;
use http::{Request, Response};
use std::fmt;
use std::sync::RwLock;
use tower::{Service, ServiceExt};
use tracing::debug;
use url::Url;

pub const DESCRIBE_REGIONS: &str = "DescribeRegions";
pub const DESCRIBE_AVAILABILITY_ZONES: &str = "DescribeAvailabilityZones";

/// Turns successful discovery bodies into typed values.
pub trait QueryResponseParser: Send + Sync + fmt::Debug {
    fn regions(&self, body: &str) -> Result<RegionMap, ProviderError>;

    fn zones(&self, region: &Region, body: &str) -> Result<Vec<AvailabilityZoneInfo>, ProviderError>;
}

/// [`AvailabilityZoneAndRegionApi`] backed by query-style requests over a tower service.
pub struct QueryRegionApi<S, P> {
    service: S,
    endpoint: Url,
    routes: RouteTable,
    parser: P,
    regional: RwLock<RegionMap>,
}

impl<S, P> QueryRegionApi<S, P> {
    /// `endpoint` receives `DescribeRegions`; normally the configured compute endpoint.
    pub fn new(service: S, endpoint: Url, parser: P) -> Self {
        Self {
            service,
            endpoint,
            routes: compute_query_routes(),
            parser,
            regional: RwLock::new(RegionMap::new()),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn regional_endpoint(&self, region: &Region) -> Result<Url, ProviderError> {
        let regional = self.regional.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        regional
            .get(region)
            .cloned()
            .ok_or_else(|| ProviderError::Transport(format!("no endpoint known for region {region}")))
    }
}

impl<S, P> QueryRegionApi<S, P>
where
    S: Service<Request<String>, Response = Response<String>, Error = ProviderError> + Clone + Send + Sync,
    S::Future: Send,
    P: QueryResponseParser,
{
    async fn send(&self, action: &str, endpoint: &Url) -> Result<String, ProviderError> {
        let request = self.routes.expand(action, &[])?.to_request(endpoint, None)?;
        debug!(target: "cloudbind::query", action, %endpoint, "sending discovery request");
        let response = self.service.clone().oneshot(request).await?;
        Ok(response.into_body())
    }
}

#[async_trait]
impl<S, P> AvailabilityZoneAndRegionApi for QueryRegionApi<S, P>
where
    S: Service<Request<String>, Response = Response<String>, Error = ProviderError> + Clone + Send + Sync,
    S::Future: Send,
    P: QueryResponseParser,
{
    async fn describe_regions(&self) -> Result<RegionMap, ProviderError> {
        let body = self.send(DESCRIBE_REGIONS, &self.endpoint).await?;
        let regions = self.parser.regions(&body)?;
        *self.regional.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = regions.clone();
        Ok(regions)
    }

    async fn describe_availability_zones_in_region(
        &self,
        region: &Region,
    ) -> Result<Vec<AvailabilityZoneInfo>, ProviderError> {
        let endpoint = self.regional_endpoint(region)?;
        let body = self.send(DESCRIBE_AVAILABILITY_ZONES, &endpoint).await?;
        self.parser.zones(region, &body)
    }
}

impl<S, P: fmt::Debug> fmt::Debug for QueryRegionApi<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRegionApi")
            .field("endpoint", &self.endpoint.as_str())
            .field("parser", &self.parser)
            .finish_non_exhaustive()
    }
}
