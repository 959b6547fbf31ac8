//! Region, availability zone, and service family identifiers.
//!
//! Regions are opaque strings. A handful are known at compile time, but the provider may report
//! more at runtime, so `Region` accepts any identifier. Endpoint tables and zone maps built from
//! provider data reject blank ones.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use url::Url;

/// A named geographic deployment of the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region(String);

impl Region {
    pub const US_EAST_1: &'static str = "us-east-1";
    pub const US_WEST_1: &'static str = "us-west-1";
    pub const EU_WEST_1: &'static str = "eu-west-1";
    pub const AP_SOUTHEAST_1: &'static str = "ap-southeast-1";

    /// Regions compiled into the client.
    pub const KNOWN: [&'static str; 4] =
        [Self::US_EAST_1, Self::US_WEST_1, Self::EU_WEST_1, Self::AP_SOUTHEAST_1];

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// True for an empty or all-whitespace identifier.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this region is one of the compiled-in identifiers.
    pub fn is_known(&self) -> bool {
        Self::KNOWN.contains(&self.0.as_str())
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Region {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for Region {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An isolated location inside exactly one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailabilityZone(String);

impl AvailabilityZone {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AvailabilityZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AvailabilityZone {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Borrow<str> for AvailabilityZone {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Zone record returned by the provider's describe-zones operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZoneInfo {
    pub zone: AvailabilityZone,
    pub region: Region,
    /// Provider-reported state, e.g. `available`.
    pub state: String,
}

impl AvailabilityZoneInfo {
    pub fn available(zone: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            zone: AvailabilityZone::new(zone),
            region: Region::new(region),
            state: "available".to_string(),
        }
    }
}

/// Independent region-to-endpoint namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFamily {
    /// Instances, images, volumes, addresses.
    Compute,
    /// Elastic load balancers.
    LoadBalancer,
}

impl fmt::Display for ServiceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceFamily::Compute => f.write_str("compute"),
            ServiceFamily::LoadBalancer => f.write_str("load_balancer"),
        }
    }
}

/// Region list as reported by the provider.
pub type RegionMap = HashMap<Region, Url>;

/// Many-to-one mapping from zone to owning region.
pub type ZoneMap = HashMap<AvailabilityZone, Region>;
