//! Cache-first resolution of location references to coordinates.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::cache::{CacheCategory, ExpiringCache};
use crate::error::DispatchError;
use crate::model::Coordinate;
use crate::ports::{GeocodePort, PortError};

/// Geocoder wrapped with the shared cache and a per-call deadline.
pub struct GeoLookup {
    port: Arc<dyn GeocodePort>,
    cache: Arc<ExpiringCache>,
    deadline: Duration,
}

impl GeoLookup {
    /// Wrap `port` with `cache`, bounding each provider call by `deadline`.
    #[must_use]
    pub fn new(port: Arc<dyn GeocodePort>, cache: Arc<ExpiringCache>, deadline: Duration) -> Self {
        Self {
            port,
            cache,
            deadline,
        }
    }

    /// Resolve `location_ref`, consulting the cache under `location:<ref>` first.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::GeocodeFailure`] when the reference is blank, the
    /// provider fails or times out, or the provider returns an out-of-range point.
    /// Failures are never cached.
    pub async fn resolve(&self, location_ref: &str) -> Result<Coordinate, DispatchError> {
        let location = location_ref.trim();
        if location.is_empty() {
            return Err(failure(location_ref, "empty location reference"));
        }

        let key = CacheCategory::Location.key(location);
        if let Some(coordinate) = self.cache.get_as::<Coordinate>(&key) {
            tracing::debug!(location, "geocode cache hit");
            return Ok(coordinate);
        }

        tracing::debug!(location, "geocode cache miss");
        let outcome = match timeout(self.deadline, self.port.geocode(location)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PortError::Timeout(self.deadline.as_millis())),
        };

        match outcome {
            Ok(coordinate) if coordinate.is_valid() => {
                self.cache.set_as(key, &coordinate, CacheCategory::Location);
                Ok(coordinate)
            }
            Ok(coordinate) => Err(failure(
                location,
                &format!("provider returned out-of-range coordinate {coordinate}"),
            )),
            Err(err) => Err(failure(location, &err.to_string())),
        }
    }
}

fn failure(location: &str, reason: &str) -> DispatchError {
    DispatchError::GeocodeFailure {
        location: location.to_owned(),
        reason: reason.to_owned(),
    }
}
