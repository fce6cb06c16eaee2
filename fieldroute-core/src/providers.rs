//! Bundle of collaborator ports a dispatch service is wired with.

use std::sync::Arc;

use crate::ports::{DistancePort, GeocodePort, JobSourcePort, RosterPort};

/// Collection of ports backing one [`DispatchService`](crate::service::DispatchService).
#[derive(Clone)]
pub struct Providers {
    /// Source of jobs per window.
    pub jobs: Arc<dyn JobSourcePort>,
    /// Source of technicians per window.
    pub roster: Arc<dyn RosterPort>,
    /// Address resolution.
    pub geocoder: Arc<dyn GeocodePort>,
    /// Travel distances; straight-line distance is used without one.
    pub distance: Option<Arc<dyn DistancePort>>,
}

impl Providers {
    /// Bundle the mandatory ports, without a distance provider.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobSourcePort>,
        roster: Arc<dyn RosterPort>,
        geocoder: Arc<dyn GeocodePort>,
    ) -> Self {
        Self {
            jobs,
            roster,
            geocoder,
            distance: None,
        }
    }

    /// Attach a distance provider.
    #[must_use]
    pub fn with_distance(mut self, distance: Arc<dyn DistancePort>) -> Self {
        self.distance = Some(distance);
        self
    }
}
