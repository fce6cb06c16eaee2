//! Tunables for the cache, collaborator timeouts, clustering and capacity policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Default TTL for geocode results (one day).
pub const LOCATION_TTL_SECS: u64 = 86_400;
/// Default TTL for distance-matrix results (one hour).
pub const DISTANCE_MATRIX_TTL_SECS: u64 = 3_600;
/// Default TTL for everything else (five minutes).
pub const DEFAULT_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Per-category expiry of cache entries.
pub struct CacheConfig {
    /// TTL for `location:` entries.
    pub location_ttl_secs: u64,
    /// TTL for `distanceMatrix:` entries.
    pub distance_matrix_ttl_secs: u64,
    /// TTL for uncategorized entries.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            location_ttl_secs: LOCATION_TTL_SECS,
            distance_matrix_ttl_secs: DISTANCE_MATRIX_TTL_SECS,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Deadlines for calls to external collaborators.
pub struct TimeoutConfig {
    /// Per geocode lookup.
    pub geocode_ms: u64,
    /// Per distance lookup.
    pub distance_ms: u64,
    /// Per job-source or roster fetch.
    pub fetch_ms: u64,
}

impl TimeoutConfig {
    /// Geocode deadline.
    #[must_use]
    pub fn geocode(&self) -> Duration {
        Duration::from_millis(self.geocode_ms)
    }

    /// Distance deadline.
    #[must_use]
    pub fn distance(&self) -> Duration {
        Duration::from_millis(self.distance_ms)
    }

    /// Job source and roster deadline.
    #[must_use]
    pub fn fetch(&self) -> Duration {
        Duration::from_millis(self.fetch_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            geocode_ms: 5_000,
            distance_ms: 5_000,
            fetch_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode", content = "value")]
/// How many clusters the engine opens.
pub enum ClusterBound {
    /// One cluster per available technician.
    #[default]
    PerTechnician,
    /// A fixed number of clusters.
    Target(usize),
    /// Open a new cluster whenever no centroid is within this many kilometres.
    Radius(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Clustering behaviour.
pub struct ClusteringConfig {
    /// Seeding rule.
    pub bound: ClusterBound,
    /// Upper bound on cluster size enforced by the rebalancing pass.
    pub max_jobs_per_technician: Option<usize>,
    /// Consult the distance provider before falling back to straight-line distance.
    pub use_road_distances: bool,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            bound: ClusterBound::PerTechnician,
            max_jobs_per_technician: None,
            use_road_distances: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
/// What to do when more clusters are requested than technicians exist.
pub enum CapacityPolicy {
    /// Reject the run with `InsufficientTechnicians`.
    #[default]
    Fail,
    /// Lower the cluster target to the technician count and cluster again.
    Recluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
/// Top-level configuration of a [`DispatchService`](crate::service::DispatchService).
pub struct DispatchConfig {
    /// Cache expiry.
    pub cache: CacheConfig,
    /// Collaborator deadlines.
    pub timeouts: TimeoutConfig,
    /// Clustering behaviour.
    pub clustering: ClusteringConfig,
    /// Handling of cluster targets above the technician count.
    pub capacity_policy: CapacityPolicy,
    /// Upper bound on concurrent geocode or distance lookups in one run.
    pub max_concurrent_lookups: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            timeouts: TimeoutConfig::default(),
            clustering: ClusteringConfig::default(),
            capacity_policy: CapacityPolicy::default(),
            max_concurrent_lookups: 8,
        }
    }
}

impl DispatchConfig {
    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), DispatchError> {
        let invalid = |field: &str| Err(DispatchError::InvalidConfig(format!("{field} must be positive")));

        if self.cache.location_ttl_secs == 0 {
            return invalid("cache.location_ttl_secs");
        }
        if self.cache.distance_matrix_ttl_secs == 0 {
            return invalid("cache.distance_matrix_ttl_secs");
        }
        if self.cache.default_ttl_secs == 0 {
            return invalid("cache.default_ttl_secs");
        }
        if self.timeouts.geocode_ms == 0 {
            return invalid("timeouts.geocode_ms");
        }
        if self.timeouts.distance_ms == 0 {
            return invalid("timeouts.distance_ms");
        }
        if self.timeouts.fetch_ms == 0 {
            return invalid("timeouts.fetch_ms");
        }
        if self.max_concurrent_lookups == 0 {
            return invalid("max_concurrent_lookups");
        }
        if self.clustering.max_jobs_per_technician == Some(0) {
            return invalid("clustering.max_jobs_per_technician");
        }
        match self.clustering.bound {
            ClusterBound::Target(0) => invalid("clustering.bound target"),
            ClusterBound::Radius(km) if !(km.is_finite() && km > 0.0) => {
                invalid("clustering.bound radius")
            }
            _ => Ok(()),
        }
    }
}
