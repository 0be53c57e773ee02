//! Device location and reverse geocoding.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::GeocodeError,
    model::{Location, PlaceName},
};

pub mod locator;
pub mod nominatim;

pub use locator::{ConfiguredLocation, LocationCallback, LocationProvider, OneShotLocator};
pub use nominatim::NominatimGeocoder;

/// One-shot location fetch plus coordinate to place name conversion.
#[async_trait]
pub trait GeoResolver: Send + Sync + Debug {
    /// Best-effort last known location. `None` is an ordinary outcome.
    async fn locate(&self) -> Option<Location>;

    /// Reverse geocode to a normalized place name, possibly empty.
    async fn resolve_place(&self, location: Location) -> Result<PlaceName, GeocodeError>;
}

/// Converts coordinates into the administrative area of the top candidate.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync + Debug {
    async fn admin_area(&self, location: Location) -> Result<Option<String>, GeocodeError>;
}

/// [`GeoResolver`] backed by a callback location source and a reverse geocoder.
#[derive(Debug)]
pub struct DeviceGeoResolver<P, G> {
    locator: OneShotLocator<P>,
    geocoder: G,
}

impl<P, G> DeviceGeoResolver<P, G> {
    pub fn new(locator: OneShotLocator<P>, geocoder: G) -> Self {
        Self { locator, geocoder }
    }
}

#[async_trait]
impl<P, G> GeoResolver for DeviceGeoResolver<P, G>
where
    P: LocationProvider,
    G: ReverseGeocoder,
{
    async fn locate(&self) -> Option<Location> {
        self.locator.locate().await
    }

    async fn resolve_place(&self, location: Location) -> Result<PlaceName, GeocodeError> {
        let area = self.geocoder.admin_area(location).await?;
        let place = area
            .as_deref()
            .map(PlaceName::from_admin_area)
            .unwrap_or_default();
        tracing::debug!(raw = ?area, place = %place, "reverse geocoded");
        Ok(place)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug)]
    struct FixedArea(Option<&'static str>);

    #[async_trait]
    impl ReverseGeocoder for FixedArea {
        async fn admin_area(&self, _location: Location) -> Result<Option<String>, GeocodeError> {
            Ok(self.0.map(str::to_string))
        }
    }

    fn resolver(area: Option<&'static str>) -> DeviceGeoResolver<ConfiguredLocation, FixedArea> {
        let locator = OneShotLocator::new(
            ConfiguredLocation::new(Some(Location::new(30.0444, 31.2357))),
            Duration::from_secs(1),
        );
        DeviceGeoResolver::new(locator, FixedArea(area))
    }

    #[tokio::test]
    async fn resolve_place_normalizes_top_candidate() {
        let place = resolver(Some("Cairo Governorate"))
            .resolve_place(Location::new(30.0444, 31.2357))
            .await
            .expect("geocode");
        assert_eq!(place.as_str(), "cairo");
    }

    #[tokio::test]
    async fn missing_candidate_yields_empty_place() {
        let place = resolver(None)
            .resolve_place(Location::new(0.0, 0.0))
            .await
            .expect("geocode");
        assert!(place.is_empty());
    }

    #[tokio::test]
    async fn locate_delegates_to_locator() {
        let loc = resolver(None).locate().await;
        assert_eq!(loc, Some(Location::new(30.0444, 31.2357)));
    }
}
