//! Scheduling entry point tying the job source, adapters, clustering and assignment together.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::assign::{ClusteringInfo, assign, dispatchable, distinct_technicians};
use crate::cache::ExpiringCache;
use crate::cluster::{ClusterPlan, cluster};
use crate::config::{CapacityPolicy, ClusterBound, DispatchConfig};
use crate::distance::{DistanceLookup, DistanceTable};
use crate::error::DispatchError;
use crate::geocode::GeoLookup;
use crate::model::{ClusterId, Coordinate, JobId, LocatedJob, ServiceJob, TechnicianId, TimeWindow};
use crate::ports::PortError;
use crate::providers::Providers;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// One job with the technician it was dispatched to.
pub struct ScheduledService {
    /// Job identifier.
    pub job_id: JobId,
    /// Technician identifier.
    pub tech_id: TechnicianId,
    /// Cluster the job belongs to.
    pub cluster_id: ClusterId,
    /// Scheduled start of the job.
    pub scheduled_start: DateTime<Utc>,
    /// Location reference as supplied by the job source.
    pub location_ref: String,
    /// Resolved position.
    pub coordinate: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
/// Why a job was left out of the schedule.
pub enum DropReason {
    /// The location reference could not be geocoded.
    GeocodeFailed {
        /// Geocoder error text.
        reason: String,
    },
    /// The source returned the job although it starts outside the window.
    OutsideWindow,
    /// Another job with the same identifier was already admitted.
    DuplicateJob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// A job excluded from the run.
pub struct DroppedJob {
    /// Job identifier.
    pub job_id: JobId,
    /// Cause.
    pub reason: DropReason,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Everything the run recovered from locally.
pub struct Diagnostics {
    /// Jobs excluded from the schedule.
    pub dropped_jobs: Vec<DroppedJob>,
    /// Job pairs measured in straight line because the distance provider failed.
    pub distance_fallbacks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Result of a scheduling run.
pub struct ScheduleResult {
    /// Window that was scheduled.
    pub window: TimeWindow,
    /// One line per dispatched job, grouped by cluster.
    pub scheduled_services: Vec<ScheduledService>,
    /// Cluster statistics; `total_clusters` equals the distinct technicians above.
    pub clustering_info: ClusteringInfo,
    /// Dropped jobs and fallbacks.
    pub diagnostics: Diagnostics,
}

/// Public entry point for scheduling a window.
pub struct DispatchService {
    providers: Providers,
    cache: Arc<ExpiringCache>,
    geo: GeoLookup,
    distance: DistanceLookup,
    config: DispatchConfig,
}

impl DispatchService {
    /// Create a service bound to `providers`, sharing `cache` with other callers.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] when `config` does not validate.
    pub fn new(
        providers: Providers,
        cache: Arc<ExpiringCache>,
        config: DispatchConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        let geo = GeoLookup::new(
            Arc::clone(&providers.geocoder),
            Arc::clone(&cache),
            config.timeouts.geocode(),
        );
        let distance_port = providers
            .distance
            .clone()
            .filter(|_| config.clustering.use_road_distances);
        let distance = DistanceLookup::new(
            distance_port,
            Arc::clone(&cache),
            config.timeouts.distance(),
            config.max_concurrent_lookups,
        );

        Ok(Self {
            providers,
            cache,
            geo,
            distance,
            config,
        })
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<ExpiringCache> {
        &self.cache
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Schedule every job starting in `[start, end)`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidWindow`] when `end <= start`, before any
    /// collaborator is called, and otherwise the errors of [`Self::schedule_window`].
    pub async fn schedule(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ScheduleResult, DispatchError> {
        let window = TimeWindow::new(start, end)?;
        self.schedule_window(window).await
    }

    /// Schedule every job starting in `window`.
    ///
    /// Jobs that cannot be geocoded are dropped and listed in the diagnostics;
    /// the rest are clustered and each cluster is given its own technician.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::JobFetch`] or [`DispatchError::RosterFetch`] when
    /// a source fails or times out, [`DispatchError::InsufficientTechnicians`]
    /// when the cluster target exceeds the roster under
    /// [`CapacityPolicy::Fail`], and [`DispatchError::CapacityExceeded`] when a
    /// cluster fits no technician.
    pub async fn schedule_window(&self, window: TimeWindow) -> Result<ScheduleResult, DispatchError> {
        tracing::info!(%window, "scheduling run started");

        let fetch_limit = self.config.timeouts.fetch();
        let (jobs, technicians) = futures::join!(
            bounded(fetch_limit, self.providers.jobs.jobs_in(window)),
            bounded(fetch_limit, self.providers.roster.technicians(window)),
        );
        let jobs = jobs.map_err(|source| DispatchError::JobFetch { window, source })?;
        let technicians = distinct_technicians(
            technicians.map_err(|source| DispatchError::RosterFetch { window, source })?,
        );
        let open_technicians = dispatchable(&technicians);

        let mut diagnostics = Diagnostics::default();
        let admitted = admit(window, jobs, &mut diagnostics);
        let located = self.locate(admitted, &mut diagnostics).await;

        let bound = self.effective_bound(open_technicians, located.len())?;
        let table = if located.is_empty() {
            DistanceTable::straight_line()
        } else {
            let points: Vec<Coordinate> = located.iter().map(|job| job.coordinate).collect();
            self.distance.table(&points).await
        };
        diagnostics.distance_fallbacks = table.fallbacks();

        let plan = ClusterPlan {
            bound,
            technicians: open_technicians,
            max_jobs_per_cluster: self.config.clustering.max_jobs_per_technician,
        };
        let clusters = cluster(&located, &plan, &table)?;
        let dispatch = assign(&clusters, &technicians)?;

        let by_id: HashMap<&JobId, &LocatedJob> = located.iter().map(|job| (job.id(), job)).collect();
        let scheduled_services: Vec<ScheduledService> = dispatch
            .assignments
            .iter()
            .flat_map(|assignment| {
                assignment.job_ids.iter().filter_map(|job_id| {
                    by_id.get(job_id).map(|job| ScheduledService {
                        job_id: job_id.clone(),
                        tech_id: assignment.technician_id.clone(),
                        cluster_id: assignment.cluster_id,
                        scheduled_start: job.job.scheduled_start,
                        location_ref: job.job.location_ref.clone(),
                        coordinate: job.coordinate,
                    })
                })
            })
            .collect();

        debug_assert_eq!(
            scheduled_services
                .iter()
                .map(|service| &service.tech_id)
                .collect::<HashSet<_>>()
                .len(),
            dispatch.clustering_info.total_clusters,
        );

        tracing::info!(
            %window,
            scheduled = scheduled_services.len(),
            clusters = dispatch.clustering_info.total_clusters,
            dropped = diagnostics.dropped_jobs.len(),
            distance_fallbacks = diagnostics.distance_fallbacks,
            "scheduling run finished"
        );

        Ok(ScheduleResult {
            window,
            scheduled_services,
            clustering_info: dispatch.clustering_info,
            diagnostics,
        })
    }

    /// Resolve coordinates concurrently, keeping input order; failures are reported and dropped.
    async fn locate(&self, jobs: Vec<ServiceJob>, diagnostics: &mut Diagnostics) -> Vec<LocatedJob> {
        let resolved: Vec<(ServiceJob, Result<Coordinate, DispatchError>)> = stream::iter(jobs)
            .map(|job| async move {
                let result = match job.coordinate {
                    Some(coordinate) if coordinate.is_valid() => Ok(coordinate),
                    _ => self.geo.resolve(&job.location_ref).await,
                };
                (job, result)
            })
            .buffered(self.config.max_concurrent_lookups)
            .collect()
            .await;

        let mut located = Vec::with_capacity(resolved.len());
        for (job, result) in resolved {
            match result {
                Ok(coordinate) => located.push(job.locate(coordinate)),
                Err(err) => {
                    tracing::warn!(job = %job.id, error = %err, "dropping job without coordinate");
                    diagnostics.dropped_jobs.push(DroppedJob {
                        job_id: job.id,
                        reason: DropReason::GeocodeFailed {
                            reason: err.to_string(),
                        },
                    });
                }
            }
        }
        located
    }

    /// Apply the capacity policy to the configured cluster bound.
    fn effective_bound(&self, technicians: usize, jobs: usize) -> Result<ClusterBound, DispatchError> {
        match self.config.clustering.bound {
            ClusterBound::Target(target) if jobs > 0 && target > technicians => {
                match self.config.capacity_policy {
                    CapacityPolicy::Fail => Err(DispatchError::InsufficientTechnicians {
                        clusters: target,
                        technicians,
                    }),
                    CapacityPolicy::Recluster => {
                        tracing::warn!(target, technicians, "cluster target lowered to roster size");
                        Ok(ClusterBound::Target(technicians))
                    }
                }
            }
            bound => Ok(bound),
        }
    }
}

/// Keep in-window jobs, first occurrence per id, ordered by id.
fn admit(window: TimeWindow, jobs: Vec<ServiceJob>, diagnostics: &mut Diagnostics) -> Vec<ServiceJob> {
    let mut seen = HashSet::new();
    let mut admitted = Vec::with_capacity(jobs.len());
    for job in jobs {
        let reason = if !window.contains(job.scheduled_start) {
            Some(DropReason::OutsideWindow)
        } else if !seen.insert(job.id.clone()) {
            Some(DropReason::DuplicateJob)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                tracing::warn!(job = %job.id, ?reason, "dropping job");
                diagnostics.dropped_jobs.push(DroppedJob {
                    job_id: job.id,
                    reason,
                });
            }
            None => admitted.push(job),
        }
    }
    admitted.sort_by(|left, right| left.id.cmp(&right.id));
    admitted
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, PortError>>,
) -> Result<T, PortError> {
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(PortError::Timeout(limit.as_millis())),
    }
}
