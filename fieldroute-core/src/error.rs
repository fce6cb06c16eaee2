//! Error taxonomy of a scheduling run.

use chrono::{DateTime, Utc};

use crate::model::{ClusterId, TimeWindow};
use crate::ports::PortError;

#[derive(thiserror::Error, Debug)]
/// Errors raised by the cache, adapters, clustering, assignment and orchestration.
pub enum DispatchError {
    /// The requested window is empty or inverted.
    #[error("Invalid window: end {end} is not after start {start}")]
    InvalidWindow {
        /// Requested start.
        start: DateTime<Utc>,
        /// Requested end.
        end: DateTime<Utc>,
    },
    /// A location reference could not be resolved to a coordinate.
    #[error("Geocode failure for {location:?}: {reason}")]
    GeocodeFailure {
        /// Location reference that failed.
        location: String,
        /// Underlying cause.
        reason: String,
    },
    /// Travel distance between two points could not be obtained.
    #[error("Distance unavailable: {reason}")]
    DistanceUnavailable {
        /// Underlying cause.
        reason: String,
    },
    /// More clusters were requested or produced than technicians exist.
    #[error("Insufficient technicians: {clusters} clusters for {technicians} technicians")]
    InsufficientTechnicians {
        /// Clusters that need a technician.
        clusters: usize,
        /// Technicians available for the window.
        technicians: usize,
    },
    /// No remaining technician has capacity for a cluster.
    #[error("No technician has capacity for {cluster} with {jobs} jobs")]
    CapacityExceeded {
        /// Cluster that could not be placed.
        cluster: ClusterId,
        /// Number of jobs in the cluster.
        jobs: usize,
    },
    /// The job source failed, nothing can be scheduled.
    #[error("Failed to fetch jobs for {window}: {source}")]
    JobFetch {
        /// Window being scheduled.
        window: TimeWindow,
        /// Collaborator error.
        #[source]
        source: PortError,
    },
    /// The technician roster failed, nothing can be assigned.
    #[error("Failed to fetch technicians for {window}: {source}")]
    RosterFetch {
        /// Window being scheduled.
        window: TimeWindow,
        /// Collaborator error.
        #[source]
        source: PortError,
    },
    /// A cache TTL of zero seconds was supplied.
    #[error("Cache TTL must be a positive number of seconds")]
    InvalidTtl,
    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::GeocodeFailure { .. }
                | DispatchError::DistanceUnavailable { .. }
                | DispatchError::JobFetch { .. }
                | DispatchError::RosterFetch { .. }
        )
    }
}
