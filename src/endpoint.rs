//! Region-to-endpoint tables.
//!
//! Each service family has its own table. A table is a bijection: every region maps to one
//! endpoint and no two regions share an endpoint, so it can be inverted to answer "which region
//! does this endpoint belong to". An endpoint missing from the table is a configuration fault,
//! never a silent default.

use crate::error::ConfigurationError;
use crate::region::{Region, RegionMap, ServiceFamily};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Immutable region/endpoint bijection for one service family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTable {
    family: ServiceFamily,
    by_region: HashMap<Region, Url>,
    by_endpoint: HashMap<Url, Region>,
}

impl EndpointTable {
    /// Build a table, rejecting blank region ids and endpoints claimed by two regions.
    pub fn new(family: ServiceFamily, map: RegionMap) -> Result<Self, ConfigurationError> {
        let mut by_endpoint: HashMap<Url, Region> = HashMap::with_capacity(map.len());
        let mut by_region = HashMap::with_capacity(map.len());
        for (region, endpoint) in map {
            if region.is_blank() {
                return Err(ConfigurationError::EmptyIdentifier { kind: "region" });
            }
            let endpoint = normalize(endpoint);
            if let Some(first) = by_endpoint.get(&endpoint) {
                let (first, second) = ordered(first.clone(), region);
                return Err(ConfigurationError::DuplicateEndpoint {
                    family,
                    endpoint: endpoint.to_string(),
                    first,
                    second,
                });
            }
            by_endpoint.insert(endpoint.clone(), region.clone());
            by_region.insert(region, endpoint);
        }
        Ok(Self { family, by_region, by_endpoint })
    }

    /// Build from string pairs, parsing each endpoint.
    pub fn from_pairs<'a, I>(family: ServiceFamily, pairs: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut map = RegionMap::new();
        for (region, endpoint) in pairs {
            map.insert(Region::new(region), parse_endpoint(endpoint)?);
        }
        Self::new(family, map)
    }

    /// Load balancer endpoints for the compiled-in regions.
    pub fn load_balancer_defaults() -> Self {
        let by_region: HashMap<Region, Url> = Region::KNOWN
            .iter()
            .filter_map(|region| {
                let url = Url::parse(&format!("https://elasticloadbalancing.{region}.amazonaws.com"))
                    .ok()?;
                Some((Region::new(*region), normalize(url)))
            })
            .collect();
        let by_endpoint = by_region.iter().map(|(r, u)| (u.clone(), r.clone())).collect();
        Self { family: ServiceFamily::LoadBalancer, by_region, by_endpoint }
    }

    pub fn family(&self) -> ServiceFamily {
        self.family
    }

    pub fn endpoint_for(&self, region: &Region) -> Result<&Url, ConfigurationError> {
        self.by_region.get(region).ok_or_else(|| ConfigurationError::UnknownRegion {
            family: self.family,
            region: region.clone(),
        })
    }

    /// The region an endpoint belongs to.
    pub fn region_for(&self, endpoint: &Url) -> Result<&Region, ConfigurationError> {
        let key = normalize(endpoint.clone());
        self.by_endpoint.get(&key).ok_or_else(|| ConfigurationError::EndpointNotConfigured {
            family: self.family,
            endpoint: key.to_string(),
            known: self.known_regions().join(", "),
        })
    }

    /// Region names in sorted order.
    pub fn known_regions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_region.keys().map(Region::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.by_region.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Region, &Url)> {
        self.by_region.iter()
    }

    pub fn len(&self) -> usize {
        self.by_region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_region.is_empty()
    }
}

/// The region the configured endpoint belongs to.
pub fn current_region(table: &EndpointTable, current: &Url) -> Result<Region, ConfigurationError> {
    let region = table.region_for(current)?.clone();
    debug!(target: "cloudbind::endpoint", family = %table.family(), %region, endpoint = %current, "resolved current region");
    Ok(region)
}

/// Parse an endpoint string into a URL.
pub fn parse_endpoint(value: &str) -> Result<Url, ConfigurationError> {
    let url = Url::parse(value).map_err(|e| ConfigurationError::InvalidEndpoint {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !url.has_host() {
        return Err(ConfigurationError::InvalidEndpoint {
            value: value.to_string(),
            reason: "endpoint has no host".to_string(),
        });
    }
    Ok(normalize(url))
}

// `https://h` and `https://h/` are the same endpoint; query and fragment never identify one.
fn normalize(mut url: Url) -> Url {
    url.set_query(None);
    url.set_fragment(None);
    if url.path().is_empty() {
        url.set_path("/");
    }
    url
}

fn ordered(a: Region, b: Region) -> (Region, Region) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
