//! Client properties: endpoints, freshness window, and readiness overrides.
//!
//! Properties come from JSON (every field optional) and may be overridden from the
//! environment. Nothing is validated on load; [`ClientProperties::validate`] parses the
//! endpoints and builds the readiness policies, and the bootstrap context calls it before
//! anything else runs.

use crate::endpoint::parse_endpoint;
use crate::error::{BootstrapError, ConfigurationError};
use crate::readiness::{PolicySettings, ReadinessPolicies, ReadinessPolicy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

pub const ENV_COMPUTE_ENDPOINT: &str = "CLOUDBIND_COMPUTE_ENDPOINT";
pub const ENV_LOAD_BALANCER_ENDPOINT: &str = "CLOUDBIND_LOAD_BALANCER_ENDPOINT";
pub const ENV_EXPIRE_INTERVAL_SECS: &str = "CLOUDBIND_EXPIRE_INTERVAL_SECS";

pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://ec2.us-east-1.amazonaws.com";
pub const DEFAULT_LOAD_BALANCER_ENDPOINT: &str = "https://elasticloadbalancing.us-east-1.amazonaws.com";
pub const DEFAULT_EXPIRE_INTERVAL_SECS: u64 = 15;

/// Per-policy overrides; absent entries keep the built-in policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadinessOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<PolicySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<PolicySettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_open: Option<PolicySettings>,
}

/// Client configuration surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientProperties {
    /// Compute endpoint the client is pointed at; its region is the current region.
    #[serde(default = "default_compute_endpoint")]
    pub compute_endpoint: String,
    #[serde(default = "default_load_balancer_endpoint")]
    pub load_balancer_endpoint: String,
    /// Seconds added to "now" when stamping request expiry.
    #[serde(default = "default_expire_interval_secs")]
    pub expire_interval_secs: u64,
    #[serde(default)]
    pub readiness: ReadinessOverrides,
}

fn default_compute_endpoint() -> String {
    DEFAULT_COMPUTE_ENDPOINT.to_string()
}

fn default_load_balancer_endpoint() -> String {
    DEFAULT_LOAD_BALANCER_ENDPOINT.to_string()
}

fn default_expire_interval_secs() -> u64 {
    DEFAULT_EXPIRE_INTERVAL_SECS
}

impl Default for ClientProperties {
    fn default() -> Self {
        Self {
            compute_endpoint: default_compute_endpoint(),
            load_balancer_endpoint: default_load_balancer_endpoint(),
            expire_interval_secs: default_expire_interval_secs(),
            readiness: ReadinessOverrides::default(),
        }
    }
}

/// Properties after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProperties {
    pub compute_endpoint: Url,
    pub load_balancer_endpoint: Url,
    pub expire_interval: Duration,
    pub readiness: ReadinessPolicies,
}

impl ClientProperties {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::InvalidProperty {
            name: "properties",
            reason: e.to_string(),
        })
    }

    /// Apply `CLOUDBIND_*` variables from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigurationError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup, keyed by the `CLOUDBIND_*` names.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_COMPUTE_ENDPOINT) {
            self.compute_endpoint = endpoint;
        }
        if let Some(endpoint) = lookup(ENV_LOAD_BALANCER_ENDPOINT) {
            self.load_balancer_endpoint = endpoint;
        }
        if let Some(raw) = lookup(ENV_EXPIRE_INTERVAL_SECS) {
            self.expire_interval_secs =
                raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                    ConfigurationError::InvalidProperty {
                        name: "expire_interval_secs",
                        reason: format!("{raw:?}: {e}"),
                    }
                })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<ValidatedProperties, BootstrapError> {
        let compute_endpoint = parse_endpoint(&self.compute_endpoint)?;
        let load_balancer_endpoint = parse_endpoint(&self.load_balancer_endpoint)?;
        if self.expire_interval_secs == 0 {
            return Err(ConfigurationError::InvalidProperty {
                name: "expire_interval_secs",
                reason: "must be > 0".to_string(),
            }
            .into());
        }
        let defaults = ReadinessPolicies::default();
        let readiness = ReadinessPolicies {
            running: resolve(self.readiness.running, ReadinessPolicy::RUNNING, defaults.running)?,
            terminated: resolve(
                self.readiness.terminated,
                ReadinessPolicy::TERMINATED,
                defaults.terminated,
            )?,
            socket_open: resolve(
                self.readiness.socket_open,
                ReadinessPolicy::SOCKET_OPEN,
                defaults.socket_open,
            )?,
        };
        Ok(ValidatedProperties {
            compute_endpoint,
            load_balancer_endpoint,
            expire_interval: Duration::from_secs(self.expire_interval_secs),
            readiness,
        })
    }
}

fn resolve(
    settings: Option<PolicySettings>,
    name: &str,
    fallback: ReadinessPolicy,
) -> Result<ReadinessPolicy, BootstrapError> {
    match settings {
        Some(settings) => Ok(settings.to_policy(name)?),
        None => Ok(fallback),
    }
}
