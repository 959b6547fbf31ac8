//! Composition root for the bootstrap layer.
//!
//! [`BootstrapContext`] owns every piece of shared state: the region loader with its memoized
//! outcome, the zone map, the endpoint tables, and the response policy. Nothing is global;
//! each context is independent, so tests build as many as they like.
//!
//! The response policy is fixed when the context is built, before the first remote call.
//! Discovery injected through [`BootstrapContextBuilder::query_transport`] runs behind that
//! policy, so region and zone loading see the same redirect and throttling handling as every
//! other request.

use crate::clock::{Clock, SystemClock};
use crate::config::{ClientProperties, ValidatedProperties};
use crate::endpoint::{current_region, EndpointTable};
use crate::error::{BootstrapError, ConfigurationError, ProviderError, RegionLoadError, ZoneLookupError};
use crate::policy::{ResponsePolicy, ResponsePolicyLayer};
use crate::query::{QueryRegionApi, QueryResponseParser};
use crate::readiness::{ReadinessPolicies, ReadinessPolicy, ReadinessPoller};
use crate::region::{Region, RegionMap, ServiceFamily, ZoneMap};
use crate::regions::{AvailabilityZoneAndRegionApi, RegionLoader, ZoneMapper};
use crate::signing::TimestampProvider;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{SharedSink, TelemetrySink};
use http::{Request, Response};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tower::{Layer, Service};
use tracing::info;
use url::Url;

/// Shared, injectable bootstrap state for one client.
pub struct BootstrapContext {
    properties: ValidatedProperties,
    loader: Arc<RegionLoader>,
    zones: ZoneMapper,
    compute: OnceCell<Arc<EndpointTable>>,
    load_balancers: EndpointTable,
    response_policy: Arc<ResponsePolicy>,
    timestamps: TimestampProvider,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl BootstrapContext {
    pub fn builder(properties: ClientProperties) -> BootstrapContextBuilder {
        BootstrapContextBuilder::new(properties)
    }

    /// Region list; fetched once, failure replayed.
    pub async fn regions(&self) -> Result<Arc<RegionMap>, RegionLoadError> {
        self.loader.regions().await
    }

    pub async fn zone_to_region(&self) -> Result<Arc<ZoneMap>, ZoneLookupError> {
        self.zones.zone_to_region().await
    }

    /// Compute endpoint table derived from the region list.
    pub async fn compute_endpoints(&self) -> Result<Arc<EndpointTable>, BootstrapError> {
        self.compute
            .get_or_try_init(|| async {
                let regions = self.loader.regions().await?;
                let table = EndpointTable::new(ServiceFamily::Compute, (*regions).clone())?;
                Ok::<_, BootstrapError>(Arc::new(table))
            })
            .await
            .cloned()
    }

    /// Region of the configured compute endpoint.
    pub async fn current_region(&self) -> Result<Region, BootstrapError> {
        let table = self.compute_endpoints().await?;
        Ok(current_region(&table, &self.properties.compute_endpoint)?)
    }

    pub fn load_balancer_endpoints(&self) -> &EndpointTable {
        &self.load_balancers
    }

    /// Region of the configured load balancer endpoint.
    pub fn current_load_balancer_region(&self) -> Result<Region, ConfigurationError> {
        current_region(&self.load_balancers, &self.properties.load_balancer_endpoint)
    }

    pub fn compute_endpoint(&self) -> &Url {
        &self.properties.compute_endpoint
    }

    pub fn readiness(&self) -> &ReadinessPolicies {
        &self.properties.readiness
    }

    /// A poller for `policy` sharing this context's sleeper and sink.
    pub fn poller(&self, policy: &ReadinessPolicy) -> ReadinessPoller {
        ReadinessPoller::new(policy.clone())
            .with_shared_sleeper(self.sleeper.clone())
            .with_sink(self.sink.clone())
    }

    pub fn response_policy(&self) -> &Arc<ResponsePolicy> {
        &self.response_policy
    }

    /// Tower layer applying the response policy with this context's sleeper and sink.
    pub fn response_layer(&self) -> ResponsePolicyLayer {
        ResponsePolicyLayer::new(self.response_policy.clone())
            .with_shared_sleeper(self.sleeper.clone())
            .with_sink(self.sink.clone())
    }

    /// Request expiry stamp: now plus the configured interval.
    pub fn timestamp(&self) -> String {
        self.timestamps.timestamp()
    }

    pub fn timestamps(&self) -> &TimestampProvider {
        &self.timestamps
    }
}

impl fmt::Debug for BootstrapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapContext")
            .field("compute_endpoint", &self.properties.compute_endpoint.as_str())
            .field("regions_resolved", &self.loader.is_resolved())
            .finish_non_exhaustive()
    }
}

type QueryApiFactory =
    Box<dyn FnOnce(ResponsePolicyLayer, Url) -> Arc<dyn AvailabilityZoneAndRegionApi> + Send>;

/// Where region and zone discovery comes from.
enum DiscoverySource {
    Api(Arc<dyn AvailabilityZoneAndRegionApi>),
    /// Built once the response layer exists.
    Query(QueryApiFactory),
}

/// Builder for [`BootstrapContext`].
pub struct BootstrapContextBuilder {
    properties: ClientProperties,
    api: Option<DiscoverySource>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    response_policy: Option<ResponsePolicy>,
    load_balancers: Option<EndpointTable>,
}

impl BootstrapContextBuilder {
    pub fn new(properties: ClientProperties) -> Self {
        Self {
            properties,
            api: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            sink: SharedSink::default(),
            response_policy: None,
            load_balancers: None,
        }
    }

    /// Remote region and zone discovery, used as-is. One of this or
    /// [`query_transport`](Self::query_transport) is required.
    pub fn region_api(mut self, api: Arc<dyn AvailabilityZoneAndRegionApi>) -> Self {
        self.api = Some(DiscoverySource::Api(api));
        self
    }

    /// Discover regions and zones with query requests sent over `transport`, wrapped in the
    /// context's response policy, sleeper, and sink. `DescribeRegions` goes to the configured
    /// compute endpoint.
    pub fn query_transport<T, P>(mut self, transport: T, parser: P) -> Self
    where
        T: Service<Request<String>, Response = Response<String>, Error = ProviderError>
            + Clone
            + Send
            + Sync
            + 'static,
        T::Future: Send + 'static,
        P: QueryResponseParser + 'static,
    {
        let factory = move |layer: ResponsePolicyLayer, endpoint: Url| -> Arc<dyn AvailabilityZoneAndRegionApi> {
            Arc::new(QueryRegionApi::new(layer.layer(transport), endpoint, parser))
        };
        self.api = Some(DiscoverySource::Query(Box::new(factory)));
        self
    }

    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn sink<S: TelemetrySink>(mut self, sink: S) -> Self {
        self.sink = SharedSink::new(sink);
        self
    }

    pub fn shared_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the provider's default response policy.
    pub fn response_policy(mut self, policy: ResponsePolicy) -> Self {
        self.response_policy = Some(policy);
        self
    }

    /// Replace the compiled-in load balancer table.
    pub fn load_balancer_endpoints(mut self, table: EndpointTable) -> Self {
        self.load_balancers = Some(table);
        self
    }

    pub fn build(self) -> Result<BootstrapContext, BootstrapError> {
        let properties = self.properties.validate()?;
        let response_policy = Arc::new(self.response_policy.unwrap_or_else(ResponsePolicy::provider_defaults));
        let api = match self.api {
            Some(DiscoverySource::Api(api)) => api,
            Some(DiscoverySource::Query(factory)) => {
                let layer = ResponsePolicyLayer::new(response_policy.clone())
                    .with_shared_sleeper(self.sleeper.clone())
                    .with_sink(self.sink.clone());
                factory(layer, properties.compute_endpoint.clone())
            }
            None => {
                return Err(ConfigurationError::InvalidProperty {
                    name: "region_api",
                    reason: "no region discovery api was injected".to_string(),
                }
                .into())
            }
        };
        let load_balancers = self.load_balancers.unwrap_or_else(EndpointTable::load_balancer_defaults);

        let loader = Arc::new(RegionLoader::new(api.clone()).with_sink(self.sink.clone()));
        let zones = ZoneMapper::new(api, loader.clone()).with_sink(self.sink.clone());
        let timestamps = TimestampProvider::new(self.clock, properties.expire_interval);

        info!(
            target: "cloudbind::context",
            compute_endpoint = %properties.compute_endpoint,
            load_balancer_endpoint = %properties.load_balancer_endpoint,
            "bootstrap context ready"
        );
        Ok(BootstrapContext {
            properties,
            loader,
            zones,
            compute: OnceCell::new(),
            load_balancers,
            response_policy,
            timestamps,
            sleeper: self.sleeper,
            sink: self.sink,
        })
    }
}
