//! Error types for the bootstrap layer.
//!
//! Failure classes stay distinct: a poll that runs out of attempts is not an error
//! (it returns `Ok(false)`), a status query that fails is the check's own error, a missing
//! endpoint is a [`ConfigurationError`], and HTTP failures surface as [`ProviderError`].
use crate::command::ResponseCategory;
use crate::region::{Region, ServiceFamily};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Fields parsed from a provider error body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
    pub request_id: Option<String>,
    /// Alternate endpoint host advertised by some redirect responses.
    pub endpoint: Option<String>,
}

/// An HTTP failure interpreted against the provider's error envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub category: ResponseCategory,
    pub status: u16,
    pub code: Option<String>,
    pub message: Option<String>,
    pub request_id: Option<String>,
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.category, self.status)?;
        if let Some(code) = &self.code {
            write!(f, " {}", code)?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " (request {})", request_id)?;
        }
        Ok(())
    }
}

/// Typed domain error for a failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were rejected.
    #[error("not authorized: {0}")]
    Unauthorized(ErrorResponse),
    /// The addressed resource does not exist.
    #[error("resource not found: {0}")]
    NotFound(ErrorResponse),
    /// Any other redirection, client, or server failure.
    #[error("provider error: {0}")]
    Response(ErrorResponse),
    /// The request never produced a response.
    #[error("transport failure: {0}")]
    Transport(String),
    /// A response arrived but could not be understood.
    #[error("unreadable response: {0}")]
    Parse(String),
    /// The signer refused the request.
    #[error("request signing failed: {0}")]
    Signing(String),
    /// The operation has no usable route.
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl ProviderError {
    /// The interpreted response, when the failure came from one.
    pub fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Unauthorized(r) | Self::NotFound(r) | Self::Response(r) => Some(r),
            Self::Transport(_) | Self::Parse(_) | Self::Signing(_) | Self::Route(_) => None,
        }
    }

    /// Provider error code, e.g. `InvalidInstanceID.NotFound`.
    pub fn code(&self) -> Option<&str> {
        self.response().and_then(|r| r.code.as_deref())
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    pub fn category(&self) -> Option<ResponseCategory> {
        self.response().map(|r| r.category)
    }
}

/// A broken configuration invariant. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// The endpoint in use belongs to no configured region.
    #[error("{family} endpoint {endpoint} is not in the region table (known: {known})")]
    EndpointNotConfigured { family: ServiceFamily, endpoint: String, known: String },
    /// No endpoint is configured for the requested region.
    #[error("region {region} has no {family} endpoint")]
    UnknownRegion { family: ServiceFamily, region: Region },
    /// Two regions claim the same endpoint, so the table cannot be inverted.
    #[error("{family} endpoint {endpoint} is claimed by both {first} and {second}")]
    DuplicateEndpoint { family: ServiceFamily, endpoint: String, first: Region, second: Region },
    /// An endpoint string is not a valid URI.
    #[error("invalid endpoint {value:?}: {reason}")]
    InvalidEndpoint { value: String, reason: String },
    /// A property is missing or out of range.
    #[error("invalid property {name}: {reason}")]
    InvalidProperty { name: &'static str, reason: String },
    /// A region or zone identifier is empty or whitespace.
    #[error("empty {kind} identifier")]
    EmptyIdentifier { kind: &'static str },
}

/// Region list fetch failure, memoized for the life of the loader.
///
/// Every caller after the first failure receives a clone holding the same `Arc`, so
/// `Arc::ptr_eq` on [`RegionLoadError::source_arc`] identifies a replay.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegionLoadError {
    #[error("describe regions failed: {0}")]
    Fetch(Arc<ProviderError>),
}

impl RegionLoadError {
    pub fn source_arc(&self) -> &Arc<ProviderError> {
        match self {
            Self::Fetch(e) => e,
        }
    }
}

/// Failure while building the zone-to-region map.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ZoneLookupError {
    #[error(transparent)]
    Regions(#[from] RegionLoadError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("describe availability zones in {region} failed: {source}")]
    DescribeZones {
        region: Region,
        #[source]
        source: ProviderError,
    },
}

/// Invalid readiness policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyBuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
    /// A budget-derived policy needs a non-zero interval.
    #[error("interval must be > 0 when deriving attempts from a budget")]
    ZeroInterval,
    /// The overall budget must allow at least one interval.
    #[error("budget {budget:?} is shorter than interval {interval:?}")]
    BudgetShorterThanInterval { budget: Duration, interval: Duration },
}

/// A route could not be found or expanded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("no route named {0}")]
    UnknownRoute(String),
    #[error("route {route} needs parameter {param}")]
    MissingParameter { route: String, param: String },
    #[error("route {route} has a malformed template {template:?}")]
    MalformedTemplate { route: String, template: String },
    #[error("cannot build request for {route}: {reason}")]
    InvalidRequest { route: String, reason: String },
}

/// Errors surfaced by [`crate::context::BootstrapContext`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Regions(#[from] RegionLoadError),
    #[error(transparent)]
    Zones(#[from] ZoneLookupError),
    #[error(transparent)]
    Policy(#[from] PolicyBuildError),
}
