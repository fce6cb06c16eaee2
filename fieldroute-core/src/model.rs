//! Domain data structures for jobs, technicians, clusters and scheduling windows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Mean Earth radius used by the straight-line metric.
const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Fixed-point scale used to canonicalize coordinates (micro-degrees).
const COORD_SCALE: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Identifier for a service job.
pub struct JobId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Identifier for a dispatchable technician.
pub struct TechnicianId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// Position of a cluster in the ordered clustering result, starting at 1.
pub struct ClusterId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl fmt::Display for TechnicianId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "cluster-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
/// WGS84 position in decimal degrees.
pub struct Coordinate {
    /// Latitude, positive north.
    pub lat: f64,
    /// Longitude, positive east.
    pub lon: f64,
}

/// Canonical, hashable form of a [`Coordinate`] in micro-degrees.
pub type CoordKey = (i64, i64);

impl Coordinate {
    /// The null island origin, used to order clusters.
    pub const ORIGIN: Coordinate = Coordinate { lat: 0.0, lon: 0.0 };

    /// Create a coordinate without range checks.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Whether both components are finite and inside the WGS84 ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle distance to `other` in kilometres.
    #[must_use]
    pub fn haversine_km(&self, other: &Coordinate) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lon = (other.lon - self.lon).to_radians();
        let half_chord = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * half_chord.sqrt().clamp(0.0, 1.0).asin()
    }

    /// Canonical key, stable across runs for equal inputs.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "valid coordinates scaled to micro-degrees fit in i64"
    )]
    pub fn key(&self) -> CoordKey {
        (
            (self.lat * COORD_SCALE).round() as i64,
            (self.lon * COORD_SCALE).round() as i64,
        )
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{:.6},{:.6}", self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A unit of field work to schedule.
pub struct ServiceJob {
    /// Unique identifier.
    pub id: JobId,
    /// Time the job is scheduled to start; decides window membership.
    pub scheduled_start: DateTime<Utc>,
    /// Optional end of the job's own time slot.
    #[serde(default)]
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Address or provider identifier handed to the geocoder.
    pub location_ref: String,
    /// Resolved position, absent until geocoded.
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
}

impl ServiceJob {
    /// Attach a resolved coordinate, producing a job ready for clustering.
    #[must_use]
    pub fn locate(mut self, coordinate: Coordinate) -> LocatedJob {
        self.coordinate = Some(coordinate);
        LocatedJob {
            job: self,
            coordinate,
        }
    }
}

#[derive(Debug, Clone)]
/// A [`ServiceJob`] whose coordinate is known.
pub struct LocatedJob {
    /// The underlying job, with `coordinate` set.
    pub job: ServiceJob,
    /// Resolved position.
    pub coordinate: Coordinate,
}

impl LocatedJob {
    /// Identifier of the underlying job.
    #[must_use]
    pub fn id(&self) -> &JobId {
        &self.job.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A worker who can be dispatched to a cluster.
pub struct Technician {
    /// Unique identifier.
    pub id: TechnicianId,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Home or depot position.
    #[serde(default)]
    pub base: Option<Coordinate>,
    /// Maximum number of jobs the technician may take in one window.
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Jobs already committed in this window before the run.
    #[serde(default)]
    pub committed_jobs: usize,
}

impl Technician {
    /// Jobs the technician can still accept, `None` meaning unbounded.
    #[must_use]
    pub fn spare_capacity(&self) -> Option<usize> {
        self.capacity
            .map(|capacity| capacity.saturating_sub(self.committed_jobs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A geographically coherent group of jobs handled by one technician.
pub struct Cluster {
    /// Position in the ordered result.
    pub id: ClusterId,
    /// Member jobs in discovery order.
    pub members: Vec<JobId>,
    /// Mean of the member coordinates.
    pub centroid: Coordinate,
    /// Largest straight-line distance from the centroid to a member.
    pub radius_km: f64,
}

impl Cluster {
    /// Number of member jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Pairing of one technician with one cluster.
pub struct Assignment {
    /// Technician receiving the work.
    pub technician_id: TechnicianId,
    /// Cluster handed to the technician.
    pub cluster_id: ClusterId,
    /// Jobs of the cluster, in cluster order.
    pub job_ids: Vec<JobId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Half-open scheduling interval `[start, end)`.
pub struct TimeWindow {
    /// Start instant (inclusive).
    pub start: DateTime<Utc>,
    /// End instant (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Build a window, rejecting empty or inverted intervals.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidWindow`] when `end <= start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DispatchError> {
        if end <= start {
            return Err(DispatchError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whether `instant` falls inside the window.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "[{}, {})",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}
