//! Region list and zone map resolution.
//!
//! [`RegionLoader`] fetches the provider's region list at most once per loader. Success is
//! cached; so is failure. A failed fetch is stored and handed back to every later caller
//! without touching the network again.
//!
//! Concurrent first callers do not race: the fetch runs inside a `tokio::sync::OnceCell`, so one
//! caller performs it while the others wait for its outcome.
//!
//! [`ZoneMapper`] builds the zone-to-region map by asking every region for its zones. It is
//! eager: all regions are queried the first time the map is requested.

use crate::error::{ConfigurationError, ProviderError, RegionLoadError, ZoneLookupError};
use crate::region::{AvailabilityZone, AvailabilityZoneInfo, Region, RegionMap, ZoneMap};
use crate::telemetry::{BootstrapEvent, RegionEvent, SharedSink};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Consumed remote operations for region and zone discovery.
#[async_trait]
pub trait AvailabilityZoneAndRegionApi: Send + Sync {
    /// All regions with their compute endpoints.
    async fn describe_regions(&self) -> Result<RegionMap, ProviderError>;

    /// Zones belonging to one region.
    async fn describe_availability_zones_in_region(
        &self,
        region: &Region,
    ) -> Result<Vec<AvailabilityZoneInfo>, ProviderError>;
}

type Resolution = Result<Arc<RegionMap>, RegionLoadError>;

/// Single-flight, failure-memoizing loader for the region list.
pub struct RegionLoader {
    api: Arc<dyn AvailabilityZoneAndRegionApi>,
    cell: OnceCell<Resolution>,
    sink: SharedSink,
}

impl RegionLoader {
    pub fn new(api: Arc<dyn AvailabilityZoneAndRegionApi>) -> Self {
        Self { api, cell: OnceCell::new(), sink: SharedSink::default() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// The region list, fetched on first call.
    ///
    /// After a failed first fetch every call returns the same [`RegionLoadError`] (sharing one
    /// `Arc`) and the remote operation is not invoked again.
    pub async fn regions(&self) -> Result<Arc<RegionMap>, RegionLoadError> {
        let mut fetched_here = false;
        let resolution = self
            .cell
            .get_or_init(|| {
                fetched_here = true;
                self.fetch()
            })
            .await;

        if !fetched_here && resolution.is_err() {
            debug!(target: "cloudbind::regions", "replaying memoized region fetch failure");
            self.sink.emit(BootstrapEvent::Regions(RegionEvent::FailureReplayed)).await;
        }
        resolution.clone()
    }

    /// Whether a fetch has completed, successfully or not.
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    /// The memoized failure, if the fetch failed.
    pub fn cached_failure(&self) -> Option<&RegionLoadError> {
        self.cell.get().and_then(|resolution| resolution.as_ref().err())
    }

    async fn fetch(&self) -> Resolution {
        match self.api.describe_regions().await {
            Ok(map) => {
                info!(target: "cloudbind::regions", regions = map.len(), "region list loaded");
                self.sink.emit(BootstrapEvent::Regions(RegionEvent::Loaded { regions: map.len() })).await;
                Ok(Arc::new(map))
            }
            Err(e) => {
                warn!(target: "cloudbind::regions", error = %e, "region list fetch failed; memoizing failure");
                self.sink.emit(BootstrapEvent::Regions(RegionEvent::LoadFailed)).await;
                Err(RegionLoadError::Fetch(Arc::new(e)))
            }
        }
    }
}

impl fmt::Debug for RegionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegionLoader").field("resolved", &self.is_resolved()).finish_non_exhaustive()
    }
}

/// Eager zone-to-region map built on top of a [`RegionLoader`].
pub struct ZoneMapper {
    api: Arc<dyn AvailabilityZoneAndRegionApi>,
    loader: Arc<RegionLoader>,
    cell: OnceCell<Arc<ZoneMap>>,
    sink: SharedSink,
}

impl ZoneMapper {
    pub fn new(api: Arc<dyn AvailabilityZoneAndRegionApi>, loader: Arc<RegionLoader>) -> Self {
        Self { api, loader, cell: OnceCell::new(), sink: SharedSink::default() }
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// The zone-to-region map; every region is queried on first success.
    ///
    /// A failed zone lookup is not memoized and the next call starts over. A failed region
    /// fetch is, through the loader.
    pub async fn zone_to_region(&self) -> Result<Arc<ZoneMap>, ZoneLookupError> {
        self.cell.get_or_try_init(|| self.build()).await.cloned()
    }

    /// Region owning `zone`, building the map if needed.
    pub async fn region_of(&self, zone: &AvailabilityZone) -> Result<Option<Region>, ZoneLookupError> {
        Ok(self.zone_to_region().await?.get(zone).cloned())
    }

    async fn build(&self) -> Result<Arc<ZoneMap>, ZoneLookupError> {
        let regions = self.loader.regions().await?;
        let map = map_zones(self.api.as_ref(), regions.keys()).await?;
        info!(target: "cloudbind::regions", regions = regions.len(), zones = map.len(), "zone map built");
        self.sink
            .emit(BootstrapEvent::Regions(RegionEvent::ZonesMapped {
                regions: regions.len(),
                zones: map.len(),
            }))
            .await;
        Ok(Arc::new(map))
    }
}

impl fmt::Debug for ZoneMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoneMapper").field("built", &self.cell.initialized()).finish_non_exhaustive()
    }
}

/// Query each region for its zones and record the owning region of each.
pub async fn map_zones<'a, I>(
    api: &dyn AvailabilityZoneAndRegionApi,
    regions: I,
) -> Result<ZoneMap, ZoneLookupError>
where
    I: IntoIterator<Item = &'a Region>,
{
    let mut map = ZoneMap::new();
    for region in regions {
        if region.is_blank() {
            return Err(ConfigurationError::EmptyIdentifier { kind: "region" }.into());
        }
        let zones = api
            .describe_availability_zones_in_region(region)
            .await
            .map_err(|source| ZoneLookupError::DescribeZones { region: region.clone(), source })?;
        for info in zones {
            if info.zone.is_blank() {
                return Err(ConfigurationError::EmptyIdentifier { kind: "availability zone" }.into());
            }
            map.insert(info.zone, region.clone());
        }
    }
    Ok(map)
}
