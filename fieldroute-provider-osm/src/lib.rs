//! Provider implementation for OpenStreetMap services: Nominatim geocoding and OSRM routing.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use fieldroute_core::{
    model::Coordinate,
    ports::{DistancePort, GeocodePort, JobSourcePort, PortError, RosterPort},
    providers::Providers,
};

/// Public Nominatim instance.
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
/// Public OSRM demo server.
pub const OSRM_URL: &str = "https://router.project-osrm.org";
/// Concurrent requests the public instances allow (about one per second).
pub const PUBLIC_CONCURRENCY: usize = 1;

/// Whether `url` is one of the shared community servers above.
#[must_use]
pub fn is_public_endpoint(url: &str) -> bool {
    let url = url.trim_end_matches('/');
    url == NOMINATIM_URL || url == OSRM_URL
}

/// Single hit from /search
#[derive(Debug, Deserialize)]
struct Place {
    // Nominatim sends coordinates as strings
    lat: String,
    lon: String,
}

/// Response from /route/v1/driving
#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    /// Metres.
    distance: f64,
}

/// Geocoder backed by a Nominatim `/search` endpoint.
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// Create a geocoder bound to the given HTTP client and server.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl GeocodePort for NominatimGeocoder {
    async fn geocode(&self, location_ref: &str) -> Result<Coordinate, PortError> {
        let req = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", location_ref), ("format", "json"), ("limit", "1")]);

        let places = fetch_json::<Vec<Place>>(req).await?;
        first_place(location_ref, places)
    }
}

/// Route distances from an OSRM `/route` endpoint.
pub struct OsrmDistance {
    client: Client,
    base_url: String,
}

impl OsrmDistance {
    /// Create a distance provider bound to the given HTTP client and server.
    #[must_use]
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl DistancePort for OsrmDistance {
    async fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, PortError> {
        // OSRM wants lon,lat order
        let req = self
            .client
            .get(format!(
                "{}/route/v1/driving/{},{};{},{}",
                self.base_url, from.lon, from.lat, to.lon, to.lat
            ))
            .query(&[("overview", "false")]);

        let route = fetch_json::<RouteResponse>(req).await?;
        route_km(route)
    }
}

/// Build the provider bundle: OSM geocoding and routing over the caller's job source and roster.
#[must_use]
pub fn providers(
    client: Client,
    geocoder_url: &str,
    router_url: &str,
    jobs: Arc<dyn JobSourcePort>,
    roster: Arc<dyn RosterPort>,
) -> Providers {
    let geocoder = Arc::new(NominatimGeocoder::new(client.clone(), geocoder_url));
    let distance = Arc::new(OsrmDistance::new(client, router_url));

    Providers::new(jobs, roster, geocoder).with_distance(distance)
}

fn first_place(location_ref: &str, places: Vec<Place>) -> Result<Coordinate, PortError> {
    let place = places
        .into_iter()
        .next()
        .ok_or_else(|| PortError::NotFound(location_ref.to_owned()))?;

    let parse = |raw: &str| {
        raw.parse::<f64>()
            .map_err(|err| PortError::Malformed(format!("coordinate {raw:?}: {err}")))
    };
    let coordinate = Coordinate::new(parse(&place.lat)?, parse(&place.lon)?);
    tracing::debug!(location_ref, %coordinate, "nominatim resolved");
    Ok(coordinate)
}

fn route_km(route: RouteResponse) -> Result<f64, PortError> {
    match route.code.as_str() {
        "Ok" => route
            .routes
            .first()
            .map(|best| best.distance / 1_000.0)
            .ok_or_else(|| PortError::Malformed("OSRM returned no routes".into())),
        "NoRoute" | "NoSegment" => Err(PortError::NotFound(
            route.message.unwrap_or_else(|| route.code.clone()),
        )),
        _ => Err(PortError::Unavailable(format!(
            "OSRM {}: {}",
            route.code,
            route.message.unwrap_or_default()
        ))),
    }
}

// Small helper to fetch and decode JSON with status handling.
async fn fetch_json<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, PortError> {
    req.send()
        .await
        .map_err(PortError::from)?
        .error_for_status()
        .map_err(PortError::from)?
        .json()
        .await
        .map_err(PortError::from)
}
