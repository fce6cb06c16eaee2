//! Pairing of clusters with technicians.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;
use crate::model::{Assignment, Cluster, ClusterId, Coordinate, Technician, TechnicianId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Per-cluster line of [`ClusteringInfo`].
pub struct ClusterSummary {
    /// Cluster position.
    pub cluster_id: ClusterId,
    /// Technician the cluster went to.
    pub technician_id: TechnicianId,
    /// Member count.
    pub job_count: usize,
    /// Mean member position.
    pub centroid: Coordinate,
    /// Largest straight-line distance from the centroid to a member.
    pub radius_km: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Clustering statistics reported with every schedule.
///
/// `total_clusters` always equals the number of distinct technicians across
/// the assignments.
pub struct ClusteringInfo {
    /// Number of clusters, one technician each.
    pub total_clusters: usize,
    /// Distinct technicians that received work.
    pub technicians_used: usize,
    /// Technicians that were on the roster.
    pub technicians_available: usize,
    /// Per-cluster breakdown in cluster order.
    pub clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Output of [`assign`].
pub struct DispatchPlan {
    /// One entry per cluster, in cluster order.
    pub assignments: Vec<Assignment>,
    /// Summary consistent with `assignments`.
    pub clustering_info: ClusteringInfo,
}

/// Hand each cluster to a distinct technician, largest cluster to least-loaded technician.
///
/// Clusters are taken by descending size (ties by cluster id). For each, the
/// eligible technician with the fewest committed jobs wins; ties go to the
/// technician whose base is nearest the cluster centroid, then to the lower
/// id. A technician is eligible when unused and its spare capacity, if
/// bounded, covers the whole cluster. Technicians listed twice count once.
///
/// # Errors
///
/// Returns [`DispatchError::InsufficientTechnicians`] when clusters outnumber
/// technicians, and [`DispatchError::CapacityExceeded`] when no remaining
/// technician can take a cluster.
pub fn assign(clusters: &[Cluster], technicians: &[Technician]) -> Result<DispatchPlan, DispatchError> {
    let mut seen = HashSet::new();
    let mut pool: Vec<&Technician> = technicians
        .iter()
        .filter(|tech| {
            let fresh = seen.insert(tech.id.clone());
            if !fresh {
                tracing::warn!(technician = %tech.id, "duplicate technician ignored");
            }
            fresh
        })
        .collect();
    let available = pool.len();

    if clusters.len() > available {
        return Err(DispatchError::InsufficientTechnicians {
            clusters: clusters.len(),
            technicians: available,
        });
    }

    let mut by_size: Vec<&Cluster> = clusters.iter().collect();
    by_size.sort_by(|left, right| right.len().cmp(&left.len()).then(left.id.cmp(&right.id)));

    let mut assignments = Vec::with_capacity(clusters.len());
    for cluster in by_size {
        let chosen = pool
            .iter()
            .enumerate()
            .filter(|(_, tech)| tech.spare_capacity().is_none_or(|spare| spare >= cluster.len()))
            .min_by(|(_, left), (_, right)| {
                left.committed_jobs
                    .cmp(&right.committed_jobs)
                    .then_with(|| base_distance(left, cluster).total_cmp(&base_distance(right, cluster)))
                    .then_with(|| left.id.cmp(&right.id))
            })
            .map(|(position, _)| position);

        let Some(position) = chosen else {
            return Err(DispatchError::CapacityExceeded {
                cluster: cluster.id,
                jobs: cluster.len(),
            });
        };
        let tech = pool.remove(position);
        tracing::debug!(cluster = %cluster.id, technician = %tech.id, jobs = cluster.len(), "cluster assigned");
        assignments.push((cluster, tech));
    }

    assignments.sort_by_key(|(cluster, _)| cluster.id);

    let summaries = assignments
        .iter()
        .map(|(cluster, tech)| ClusterSummary {
            cluster_id: cluster.id,
            technician_id: tech.id.clone(),
            job_count: cluster.len(),
            centroid: cluster.centroid,
            radius_km: cluster.radius_km,
        })
        .collect();
    let assignments: Vec<Assignment> = assignments
        .into_iter()
        .map(|(cluster, tech)| Assignment {
            technician_id: tech.id.clone(),
            cluster_id: cluster.id,
            job_ids: cluster.members.clone(),
        })
        .collect();

    let technicians_used = assignments
        .iter()
        .map(|assignment| &assignment.technician_id)
        .collect::<HashSet<_>>()
        .len();

    Ok(DispatchPlan {
        clustering_info: ClusteringInfo {
            total_clusters: assignments.len(),
            technicians_used,
            technicians_available: available,
            clusters: summaries,
        },
        assignments,
    })
}

/// Great-circle distance from the technician's base to the centroid; no base sorts last.
fn base_distance(tech: &Technician, cluster: &Cluster) -> f64 {
    tech.base
        .map_or(f64::INFINITY, |base| base.haversine_km(&cluster.centroid))
}

/// Keep the first technician listed under each id.
#[must_use]
pub fn distinct_technicians(technicians: Vec<Technician>) -> Vec<Technician> {
    let mut seen = HashSet::new();
    technicians
        .into_iter()
        .filter(|tech| {
            let fresh = seen.insert(tech.id.clone());
            if !fresh {
                tracing::warn!(technician = %tech.id, "duplicate technician ignored");
            }
            fresh
        })
        .collect()
}

/// Technicians that can take at least one more job.
#[must_use]
pub fn dispatchable(technicians: &[Technician]) -> usize {
    technicians
        .iter()
        .filter(|tech| tech.spare_capacity() != Some(0))
        .count()
}
