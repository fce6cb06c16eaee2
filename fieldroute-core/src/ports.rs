//! Traits describing external collaborators and their shared error type.

use async_trait::async_trait;
use reqwest::Error as ReqwestError;
use serde_json::Error as JsonError;

use crate::model::{Coordinate, ServiceJob, Technician, TimeWindow};

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to collaborator backends.
pub enum PortError {
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(#[from] ReqwestError),
    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] JsonError),
    /// The collaborator has no result for the request.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The collaborator answered with data that makes no sense.
    #[error("Malformed response: {0}")]
    Malformed(String),
    /// The call did not finish within its deadline.
    #[error("Timed out after {0} ms")]
    Timeout(u128),
    /// The collaborator is not reachable or refused service.
    #[error("Unavailable: {0}")]
    Unavailable(String),
    /// Internal provider error.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[async_trait]
/// Resolves a location reference (address, site id) to a coordinate.
pub trait GeocodePort: Send + Sync {
    /// Resolve `location_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::NotFound`] for unknown references and other
    /// variants when the provider request fails.
    async fn geocode(&self, location_ref: &str) -> Result<Coordinate, PortError>;
}

#[async_trait]
/// Computes travel cost between two coordinates.
pub trait DistancePort: Send + Sync {
    /// Travel cost from `from` to `to` in kilometres.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the provider cannot route the pair.
    async fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, PortError>;
}

#[async_trait]
/// Supplies the jobs to be scheduled.
pub trait JobSourcePort: Send + Sync {
    /// Jobs whose scheduled start falls in `window`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the source cannot be read.
    async fn jobs_in(&self, window: TimeWindow) -> Result<Vec<ServiceJob>, PortError>;
}

#[async_trait]
/// Supplies the technicians available for a window.
pub trait RosterPort: Send + Sync {
    /// Technicians on duty during `window`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the roster cannot be read.
    async fn technicians(&self, window: TimeWindow) -> Result<Vec<Technician>, PortError>;
}
