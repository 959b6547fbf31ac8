//! Convenient re-exports for common cloudbind types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    config::{ClientProperties, ReadinessOverrides},
    context::BootstrapContext,
    endpoint::{current_region, parse_endpoint, EndpointTable},
    error::{BootstrapError, ConfigurationError, ProviderError, RegionLoadError, ZoneLookupError},
    jitter::Jitter,
    policy::{ResponsePolicy, ResponsePolicyLayer},
    predicates::{instance_state_running, instance_state_terminated, IpSocket, SocketOpen},
    query::{QueryRegionApi, QueryResponseParser},
    readiness::{PolicySettings, ReadinessCheck, ReadinessPolicies, ReadinessPolicy, ReadinessPoller},
    region::{AvailabilityZone, AvailabilityZoneInfo, Region, ServiceFamily},
    regions::{AvailabilityZoneAndRegionApi, RegionLoader, ZoneMapper},
    telemetry::{BootstrapEvent, LogSink, MemorySink, NullSink, SharedSink},
};
