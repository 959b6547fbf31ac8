#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # cloudbind
//!
//! Bootstrap and runtime support for a cloud-provider API client: which regional endpoint to
//! talk to, when an asynchronously-started operation has actually finished, and what to do with
//! a failed HTTP response.
//!
//! ## Features
//!
//! - **Readiness polling** with named, per-condition policies (attempt count × interval)
//! - **Endpoint tables** mapping regions to endpoints and back
//! - **Region loading** that fetches once and replays a failed fetch instead of repeating it
//! - **Zone mapping** from availability zone to owning region
//! - **Response policy** binding an error interpreter and retry handler to each HTTP failure
//!   category, applied as a tower layer
//! - **Query discovery** sending region and zone lookups through that same layer
//!
//! ## Quick Start
//!
//! ```rust
//! use cloudbind::{ReadinessCheck, ReadinessPolicy, ReadinessPoller, InstantSleeper};
//! use std::convert::Infallible;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct ThirdTime(AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl ReadinessCheck<str> for ThirdTime {
//!     type Error = Infallible;
//!     async fn check(&self, _instance: &str) -> Result<bool, Infallible> {
//!         Ok(self.0.fetch_add(1, Ordering::SeqCst) >= 2)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let poller = ReadinessPoller::new(ReadinessPolicy::terminated()).with_sleeper(InstantSleeper);
//!     let check = ThirdTime(AtomicUsize::new(0));
//!     assert!(poller.await_ready(&check, "i-0abc").await.unwrap());
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod command;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod jitter;
pub mod policy;
pub mod predicates;
pub mod prelude;
pub mod query;
pub mod readiness;
pub mod region;
pub mod regions;
pub mod routes;
pub mod signing;
pub mod sleeper;
pub mod telemetry;

// Re-exports
pub use backoff::Backoff;
pub use clock::{Clock, FixedClock, SystemClock};
pub use command::{HttpCommand, ResponseCategory};
pub use config::ClientProperties;
pub use context::{BootstrapContext, BootstrapContextBuilder};
pub use endpoint::{current_region, EndpointTable};
pub use error::{
    BootstrapError, ConfigurationError, PolicyBuildError, ProviderError, RegionLoadError,
    RouteError, ZoneLookupError,
};
pub use handlers::{
    ClientErrorRetryHandler, ErrorInterpreter, ParseProviderError, RedirectionRetryHandler,
    RetryDecision, RetryHandler, XmlErrorBodyParser,
};
pub use jitter::Jitter;
pub use policy::{HandlerPair, ResponsePolicy, ResponsePolicyLayer, ResponsePolicyService};
pub use query::{QueryRegionApi, QueryResponseParser};
pub use readiness::{ReadinessCheck, ReadinessPolicies, ReadinessPolicy, ReadinessPoller, Retryable};
pub use region::{AvailabilityZone, Region, RegionMap, ServiceFamily, ZoneMap};
pub use regions::{AvailabilityZoneAndRegionApi, RegionLoader, ZoneMapper};
pub use signing::{RequestSigner, SigningLayer, TimestampProvider};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
