//! Greedy spatial grouping of located jobs.
//!
//! Jobs are first put in scan order (latitude, longitude, id) so identical
//! input always yields identical clusters. Seeds are then chosen either by
//! farthest-first traversal for a fixed cluster count or by opening a cluster
//! whenever a job is farther than the radius from every centroid. Remaining
//! jobs join the nearest centroid, which moves as a running mean. An optional
//! pass moves the farthest members of oversized clusters to the next-nearest
//! cluster with room.
//!
//! The supplied [`Metric`] ranks job-to-job separations while seeding. A
//! centroid is not a job, so every job-to-centroid comparison is great-circle
//! distance, keeping all candidates on the same scale.

use std::cmp::Ordering;

use crate::config::ClusterBound;
use crate::distance::Metric;
use crate::error::DispatchError;
use crate::model::{Cluster, ClusterId, Coordinate, LocatedJob};

/// Inputs that bound the clustering of one run.
#[derive(Debug, Clone, Copy)]
pub struct ClusterPlan {
    /// Seeding rule.
    pub bound: ClusterBound,
    /// Technicians available; never exceeded by the cluster count.
    pub technicians: usize,
    /// Largest cluster the rebalancing pass allows.
    pub max_jobs_per_cluster: Option<usize>,
}

#[derive(Debug, Clone)]
struct Group {
    members: Vec<usize>,
    lat_sum: f64,
    lon_sum: f64,
    centroid: Coordinate,
}

impl Group {
    fn seeded(index: usize, at: Coordinate) -> Self {
        Self {
            members: vec![index],
            lat_sum: at.lat,
            lon_sum: at.lon,
            centroid: at,
        }
    }

    fn push(&mut self, index: usize, at: Coordinate) {
        self.members.push(index);
        self.lat_sum += at.lat;
        self.lon_sum += at.lon;
        self.recenter();
    }

    fn remove(&mut self, index: usize, at: Coordinate) {
        self.members.retain(|member| *member != index);
        self.lat_sum -= at.lat;
        self.lon_sum -= at.lon;
        self.recenter();
    }

    #[expect(clippy::cast_precision_loss, reason = "member counts are far below 2^52")]
    fn recenter(&mut self) {
        let count = self.members.len();
        if count > 0 {
            let count = count as f64;
            self.centroid = Coordinate::new(self.lat_sum / count, self.lon_sum / count);
        }
    }
}

/// Partition `jobs` into clusters according to `plan`.
///
/// Every job appears in exactly one cluster, no cluster is empty, and the
/// cluster count never exceeds `plan.technicians`. Clusters are ordered by
/// the distance of their centroid from the origin and numbered from 1.
///
/// # Errors
///
/// Returns [`DispatchError::InsufficientTechnicians`] when there are jobs but no
/// technicians.
pub fn cluster(
    jobs: &[LocatedJob],
    plan: &ClusterPlan,
    metric: &dyn Metric,
) -> Result<Vec<Cluster>, DispatchError> {
    if jobs.is_empty() {
        return Ok(Vec::new());
    }
    if plan.technicians == 0 {
        return Err(DispatchError::InsufficientTechnicians {
            clusters: 1,
            technicians: 0,
        });
    }

    let mut ordered: Vec<&LocatedJob> = jobs.iter().collect();
    ordered.sort_by(|left, right| scan_order(left, right));
    let points: Vec<Coordinate> = ordered.iter().map(|job| job.coordinate).collect();

    let mut groups = match plan.bound {
        ClusterBound::PerTechnician => grow_from_seeds(&points, plan.technicians, metric),
        ClusterBound::Target(target) => {
            grow_from_seeds(&points, target.min(plan.technicians), metric)
        }
        ClusterBound::Radius(radius_km) => grow_by_radius(&points, radius_km, plan.technicians),
    };

    if let Some(limit) = plan.max_jobs_per_cluster {
        rebalance(&mut groups, &points, &ordered, limit);
    }

    let mut clusters: Vec<Cluster> = groups
        .into_iter()
        .filter(|group| !group.members.is_empty())
        .map(|group| {
            let radius_km = group
                .members
                .iter()
                .filter_map(|index| points.get(*index))
                .map(|point| group.centroid.haversine_km(point))
                .fold(0.0, f64::max);
            Cluster {
                id: ClusterId(0),
                members: group
                    .members
                    .iter()
                    .filter_map(|index| ordered.get(*index).map(|job| job.id().clone()))
                    .collect(),
                centroid: group.centroid,
                radius_km,
            }
        })
        .collect();

    clusters.sort_by(|left, right| {
        let left_origin = left.centroid.haversine_km(&Coordinate::ORIGIN);
        let right_origin = right.centroid.haversine_km(&Coordinate::ORIGIN);
        left_origin
            .total_cmp(&right_origin)
            .then_with(|| left.members.first().cmp(&right.members.first()))
    });
    for (position, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = ClusterId(position + 1);
    }

    tracing::debug!(
        jobs = jobs.len(),
        clusters = clusters.len(),
        "clustering finished"
    );
    Ok(clusters)
}

fn scan_order(left: &LocatedJob, right: &LocatedJob) -> Ordering {
    left.coordinate
        .lat
        .total_cmp(&right.coordinate.lat)
        .then_with(|| left.coordinate.lon.total_cmp(&right.coordinate.lon))
        .then_with(|| left.id().cmp(right.id()))
}

/// Farthest-first seeds, then every other job joins its nearest centroid in scan order.
fn grow_from_seeds(points: &[Coordinate], target: usize, metric: &dyn Metric) -> Vec<Group> {
    let count = target.min(points.len());
    let seeds = pick_seeds(points, count, metric);

    let mut groups: Vec<Group> = seeds
        .iter()
        .filter_map(|seed| points.get(*seed).map(|at| Group::seeded(*seed, *at)))
        .collect();

    for (index, point) in points.iter().enumerate() {
        if seeds.contains(&index) {
            continue;
        }
        if let Some(nearest) = nearest_group(&groups, point, |_| true)
            && let Some(group) = groups.get_mut(nearest)
        {
            group.push(index, *point);
        }
    }
    groups
}

fn pick_seeds(points: &[Coordinate], count: usize, metric: &dyn Metric) -> Vec<usize> {
    match count {
        0 => return Vec::new(),
        1 => return vec![0],
        _ => {}
    }

    let mut widest = (0, 1, f64::NEG_INFINITY);
    for (first, from) in points.iter().enumerate() {
        for (offset, to) in points.iter().skip(first + 1).enumerate() {
            let separation = metric.distance_km(from, to);
            if separation > widest.2 {
                widest = (first, first + 1 + offset, separation);
            }
        }
    }

    let mut seeds = vec![widest.0, widest.1];
    let mut nearest_seed: Vec<f64> = points
        .iter()
        .map(|point| {
            seeds
                .iter()
                .filter_map(|seed| points.get(*seed))
                .map(|seed| metric.distance_km(point, seed))
                .fold(f64::INFINITY, f64::min)
        })
        .collect();

    while seeds.len() < count {
        let mut next: Option<(usize, f64)> = None;
        for (index, separation) in nearest_seed.iter().enumerate() {
            if seeds.contains(&index) {
                continue;
            }
            if next.is_none_or(|(_, best)| *separation > best) {
                next = Some((index, *separation));
            }
        }
        let Some((chosen, _)) = next else { break };
        seeds.push(chosen);
        if let Some(seed_point) = points.get(chosen) {
            for (point, separation) in points.iter().zip(nearest_seed.iter_mut()) {
                *separation = separation.min(metric.distance_km(point, seed_point));
            }
        }
    }
    seeds
}

/// Open a cluster whenever no centroid lies within `radius_km`, up to `max_groups`.
fn grow_by_radius(points: &[Coordinate], radius_km: f64, max_groups: usize) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    for (index, point) in points.iter().enumerate() {
        let nearest = nearest_group(&groups, point, |_| true);
        let within = nearest.filter(|position| {
            groups
                .get(*position)
                .is_some_and(|group| point.haversine_km(&group.centroid) <= radius_km)
        });

        match (within, nearest) {
            (Some(position), _) => {
                if let Some(group) = groups.get_mut(position) {
                    group.push(index, *point);
                }
            }
            (None, _) if groups.len() < max_groups => groups.push(Group::seeded(index, *point)),
            (None, Some(position)) => {
                tracing::debug!(index, radius_km, "cluster limit reached, joining nearest");
                if let Some(group) = groups.get_mut(position) {
                    group.push(index, *point);
                }
            }
            (None, None) => groups.push(Group::seeded(index, *point)),
        }
    }
    groups
}

/// Index of the group whose centroid is nearest to `point`, lowest index on ties.
fn nearest_group(groups: &[Group], point: &Coordinate, eligible: impl Fn(usize) -> bool) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (position, group) in groups.iter().enumerate() {
        if !eligible(position) {
            continue;
        }
        let distance = point.haversine_km(&group.centroid);
        if best.is_none_or(|(_, closest)| distance < closest) {
            best = Some((position, distance));
        }
    }
    best.map(|(position, _)| position)
}

/// Move the farthest members of oversized groups to the next-nearest group with room.
fn rebalance(groups: &mut [Group], points: &[Coordinate], ordered: &[&LocatedJob], limit: usize) {
    for source in 0..groups.len() {
        loop {
            let Some(group) = groups.get(source) else { break };
            if group.members.len() <= limit {
                break;
            }

            let centroid = group.centroid;
            let mut candidates: Vec<usize> = group.members.clone();
            candidates.sort_by(|left, right| {
                let left_far = points.get(*left).map_or(0.0, |at| at.haversine_km(&centroid));
                let right_far = points.get(*right).map_or(0.0, |at| at.haversine_km(&centroid));
                right_far.total_cmp(&left_far).then_with(|| {
                    let left_id = ordered.get(*left).map(|job| job.id());
                    let right_id = ordered.get(*right).map(|job| job.id());
                    left_id.cmp(&right_id)
                })
            });

            let mut moved = false;
            for member in candidates {
                let Some(at) = points.get(member).copied() else { continue };
                let target = nearest_group(groups, &at, |position| {
                    position != source
                        && groups
                            .get(position)
                            .is_some_and(|other| other.members.len() < limit)
                });
                if let Some(target) = target {
                    if let Some(from) = groups.get_mut(source) {
                        from.remove(member, at);
                    }
                    if let Some(to) = groups.get_mut(target) {
                        to.push(member, at);
                    }
                    moved = true;
                    break;
                }
            }

            if !moved {
                tracing::warn!(
                    cluster = source,
                    limit,
                    "no cluster has spare capacity, leaving cluster oversized"
                );
                break;
            }
        }
    }
}
