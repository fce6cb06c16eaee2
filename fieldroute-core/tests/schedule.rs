use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use fieldroute_core::cache::ExpiringCache;
use fieldroute_core::config::{CacheConfig, CapacityPolicy, ClusterBound, DispatchConfig};
use fieldroute_core::memory::{MemoryGeocoder, MemoryJobSource, MemoryRoster, ScaledDistance};
use fieldroute_core::service::DropReason;
use fieldroute_core::{
    Coordinate, DispatchError, DispatchService, JobId, JobSourcePort, PortError, Providers,
    ScheduleResult, ServiceJob, Technician, TechnicianId, TimeWindow,
};

const NEIGHBORHOODS: [(f64, f64); 5] = [
    (40.70, -74.00),
    (40.80, -73.95),
    (40.65, -73.80),
    (40.85, -73.85),
    (40.60, -74.10),
];

fn window_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 6, 5, 0, 0).unwrap()
}

fn window_end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 7, 5, 0, 0).unwrap()
}

/// Forty jobs, eight per neighborhood, with their geocoder table.
fn forty_jobs() -> (Vec<ServiceJob>, Vec<(String, Coordinate)>) {
    let mut jobs = Vec::new();
    let mut addresses = Vec::new();
    for (hood, (lat, lon)) in NEIGHBORHOODS.iter().enumerate() {
        for slot in 0..8_u32 {
            let number = hood * 8 + slot as usize;
            let address = format!("{number} Hood {hood} Ave");
            let point = Coordinate::new(
                lat + f64::from(slot % 3) * 0.003,
                lon + f64::from(slot / 3) * 0.003,
            );
            addresses.push((address.clone(), point));
            jobs.push(job(&format!("n{hood}-job{slot:02}"), number, &address));
        }
    }
    (jobs, addresses)
}

fn job(id: &str, minute_slot: usize, address: &str) -> ServiceJob {
    let offset = i64::try_from(minute_slot).unwrap() * 10;
    ServiceJob {
        id: JobId(id.to_owned()),
        scheduled_start: window_start() + Duration::minutes(offset),
        scheduled_end: None,
        location_ref: address.to_owned(),
        coordinate: None,
    }
}

fn technicians(count: usize) -> Vec<Technician> {
    (1..=count)
        .map(|number| Technician {
            id: TechnicianId(format!("tech-{number}")),
            name: Some(format!("Technician {number}")),
            base: None,
            capacity: None,
            committed_jobs: 0,
        })
        .collect()
}

struct Harness {
    service: DispatchService,
    geocoder: Arc<MemoryGeocoder>,
}

fn harness(
    jobs: Vec<ServiceJob>,
    addresses: Vec<(String, Coordinate)>,
    roster: Vec<Technician>,
    config: DispatchConfig,
) -> Harness {
    let geocoder = Arc::new(MemoryGeocoder::new(addresses));
    let providers = Providers::new(
        Arc::new(MemoryJobSource::new(jobs)),
        Arc::new(MemoryRoster::new(roster)),
        Arc::clone(&geocoder) as Arc<dyn fieldroute_core::GeocodePort>,
    );
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let service = DispatchService::new(providers, cache, config).unwrap();
    Harness { service, geocoder }
}

fn distinct_technicians(result: &ScheduleResult) -> usize {
    result
        .scheduled_services
        .iter()
        .map(|service| &service.tech_id)
        .collect::<HashSet<_>>()
        .len()
}

/// Job, technician and cluster of every dispatched line, in output order.
fn dispatch_lines(result: &ScheduleResult) -> Vec<(JobId, TechnicianId, usize)> {
    result
        .scheduled_services
        .iter()
        .map(|service| (service.job_id.clone(), service.tech_id.clone(), service.cluster_id.0))
        .collect()
}

fn neighborhood(job_id: &JobId) -> &str {
    job_id.0.split('-').next().unwrap()
}

#[tokio::test]
async fn forty_jobs_five_technicians() {
    let (jobs, addresses) = forty_jobs();
    let harness = harness(jobs, addresses, technicians(5), DispatchConfig::default());

    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.scheduled_services.len(), 40);
    assert_eq!(result.clustering_info.total_clusters, 5);
    assert_eq!(distinct_technicians(&result), 5);
    assert!(result.diagnostics.dropped_jobs.is_empty());

    let mut hoods_per_tech: HashMap<&TechnicianId, HashSet<&str>> = HashMap::new();
    for service in &result.scheduled_services {
        hoods_per_tech.entry(&service.tech_id).or_default().insert(neighborhood(&service.job_id));
    }
    assert!(hoods_per_tech.values().all(|hoods| hoods.len() == 1), "{hoods_per_tech:?}");
    assert!(result.clustering_info.clusters.iter().all(|summary| summary.job_count == 8));
}

#[tokio::test]
async fn failed_geocodes_are_excluded_and_reported() {
    let (mut jobs, addresses) = forty_jobs();
    jobs.push(job("bad-1", 41, "Nowhere Lane"));
    jobs.push(job("bad-2", 42, "   "));
    let harness = harness(jobs, addresses, technicians(5), DispatchConfig::default());

    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.scheduled_services.len(), 40);
    let dropped: Vec<&str> = result
        .diagnostics
        .dropped_jobs
        .iter()
        .map(|dropped| dropped.job_id.0.as_str())
        .collect();
    assert_eq!(dropped, vec!["bad-1", "bad-2"]);
    assert!(result
        .diagnostics
        .dropped_jobs
        .iter()
        .all(|dropped| matches!(dropped.reason, DropReason::GeocodeFailed { .. })));
    assert!(result
        .scheduled_services
        .iter()
        .all(|service| !service.job_id.0.starts_with("bad")));
}

#[tokio::test]
async fn empty_window_yields_empty_schedule() {
    let harness = harness(Vec::new(), Vec::new(), technicians(3), DispatchConfig::default());
    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();
    assert!(result.scheduled_services.is_empty());
    assert_eq!(result.clustering_info.total_clusters, 0);
}

#[tokio::test]
async fn single_technician_takes_every_job() {
    let (jobs, addresses) = forty_jobs();
    let harness = harness(jobs, addresses, technicians(1), DispatchConfig::default());

    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.clustering_info.total_clusters, 1);
    assert_eq!(result.scheduled_services.len(), 40);
    assert_eq!(distinct_technicians(&result), 1);
}

#[tokio::test]
async fn target_above_roster_fails_or_reclusters_by_policy() {
    let (jobs, addresses) = forty_jobs();
    let mut config = DispatchConfig::default();
    config.clustering.bound = ClusterBound::Target(7);
    let strict = harness(jobs.clone(), addresses.clone(), technicians(5), config.clone());

    let err = strict.service.schedule(window_start(), window_end()).await.unwrap_err();
    assert!(
        matches!(err, DispatchError::InsufficientTechnicians { clusters: 7, technicians: 5 }),
        "{err}"
    );

    config.capacity_policy = CapacityPolicy::Recluster;
    let lenient = harness(jobs, addresses, technicians(5), config);
    let result = lenient.service.schedule(window_start(), window_end()).await.unwrap();
    assert_eq!(result.clustering_info.total_clusters, 5);
    assert_eq!(distinct_technicians(&result), 5);
}

#[tokio::test]
async fn inverted_window_is_rejected_before_fetching() {
    struct CountingSource(AtomicUsize);

    #[async_trait]
    impl JobSourcePort for CountingSource {
        async fn jobs_in(&self, _window: TimeWindow) -> Result<Vec<ServiceJob>, PortError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    let source = Arc::new(CountingSource(AtomicUsize::new(0)));
    let providers = Providers::new(
        Arc::clone(&source) as Arc<dyn JobSourcePort>,
        Arc::new(MemoryRoster::new(technicians(2))),
        Arc::new(MemoryGeocoder::default()),
    );
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let service = DispatchService::new(providers, cache, DispatchConfig::default()).unwrap();

    let err = service.schedule(window_end(), window_start()).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidWindow { .. }), "{err}");
    assert!(service.schedule(window_start(), window_start()).await.is_err());
    assert_eq!(source.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn job_source_failure_is_fatal() {
    struct BrokenSource;

    #[async_trait]
    impl JobSourcePort for BrokenSource {
        async fn jobs_in(&self, _window: TimeWindow) -> Result<Vec<ServiceJob>, PortError> {
            Err(PortError::Unavailable("database down".into()))
        }
    }

    let providers = Providers::new(
        Arc::new(BrokenSource),
        Arc::new(MemoryRoster::new(technicians(2))),
        Arc::new(MemoryGeocoder::default()),
    );
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let service = DispatchService::new(providers, cache, DispatchConfig::default()).unwrap();

    let err = service.schedule(window_start(), window_end()).await.unwrap_err();
    assert!(matches!(err, DispatchError::JobFetch { .. }), "{err}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn warm_cache_changes_nothing_but_lookups() {
    let (jobs, addresses) = forty_jobs();
    let harness = harness(jobs, addresses, technicians(5), DispatchConfig::default());

    let cold = harness.service.schedule(window_start(), window_end()).await.unwrap();
    assert_eq!(harness.geocoder.calls(), 40);
    let warm = harness.service.schedule(window_start(), window_end()).await.unwrap();
    assert_eq!(harness.geocoder.calls(), 40, "second run served from cache");

    assert_eq!(dispatch_lines(&cold), dispatch_lines(&warm));
}

#[tokio::test]
async fn road_distances_are_fetched_once_and_cached() {
    let (jobs, addresses) = forty_jobs();
    let geocoder = Arc::new(MemoryGeocoder::new(addresses));
    let distance = Arc::new(ScaledDistance::new(1.4));
    let providers = Providers::new(
        Arc::new(MemoryJobSource::new(jobs)),
        Arc::new(MemoryRoster::new(technicians(5))),
        geocoder,
    )
    .with_distance(Arc::clone(&distance) as Arc<dyn fieldroute_core::DistancePort>);
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let service = DispatchService::new(providers, Arc::clone(&cache), DispatchConfig::default()).unwrap();

    let first = service.schedule(window_start(), window_end()).await.unwrap();
    let calls = distance.calls();
    assert_eq!(calls, 40 * 39 / 2);
    let second = service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(distance.calls(), calls, "pairs served from cache");
    assert_eq!(first.clustering_info.total_clusters, 5);
    assert_eq!(second.clustering_info.total_clusters, 5);
    assert_eq!(first.diagnostics.distance_fallbacks, 0);
    assert_eq!(dispatch_lines(&first), dispatch_lines(&second), "cold and warm runs agree");
}

#[tokio::test]
async fn road_distances_keep_neighborhoods_together() {
    let (jobs, addresses) = forty_jobs();
    let providers = Providers::new(
        Arc::new(MemoryJobSource::new(jobs.clone())),
        Arc::new(MemoryRoster::new(technicians(5))),
        Arc::new(MemoryGeocoder::new(addresses.clone())),
    )
    .with_distance(Arc::new(ScaledDistance::new(2.0)));
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let road = DispatchService::new(providers, cache, DispatchConfig::default()).unwrap();

    let mut straight_config = DispatchConfig::default();
    straight_config.clustering.use_road_distances = false;
    let straight = harness(jobs, addresses, technicians(5), straight_config);

    let by_road = road.schedule(window_start(), window_end()).await.unwrap();
    let by_line = straight.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(dispatch_lines(&by_road), dispatch_lines(&by_line));
    let mut hoods_per_tech: HashMap<&TechnicianId, HashSet<&str>> = HashMap::new();
    for service in &by_road.scheduled_services {
        hoods_per_tech.entry(&service.tech_id).or_default().insert(neighborhood(&service.job_id));
    }
    assert!(hoods_per_tech.values().all(|hoods| hoods.len() == 1), "{hoods_per_tech:?}");
}

#[tokio::test]
async fn concurrent_runs_share_one_cache() {
    let (jobs, addresses) = forty_jobs();
    let harness = harness(jobs, addresses, technicians(5), DispatchConfig::default());

    let (left, right) = tokio::join!(
        harness.service.schedule(window_start(), window_end()),
        harness.service.schedule(window_start(), window_end()),
    );
    let (left, right) = (left.unwrap(), right.unwrap());
    assert_eq!(dispatch_lines(&left), dispatch_lines(&right));
    assert_eq!(left.scheduled_services.len(), 40);

    let lookups = harness.geocoder.calls();
    assert!((40..=80).contains(&lookups), "each address looked up at most once per run: {lookups}");
    let third = harness.service.schedule(window_start(), window_end()).await.unwrap();
    assert_eq!(harness.geocoder.calls(), lookups, "later run served from the shared cache");
    assert_eq!(dispatch_lines(&third), dispatch_lines(&left));
}

#[tokio::test]
async fn duplicate_roster_entries_count_once() {
    let (jobs, addresses) = forty_jobs();
    let mut roster = technicians(2);
    roster.extend(technicians(1));
    let harness = harness(jobs, addresses, roster, DispatchConfig::default());

    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.clustering_info.total_clusters, 2);
    assert_eq!(result.clustering_info.technicians_available, 2);
    assert_eq!(result.scheduled_services.len(), 40);
    assert_eq!(distinct_technicians(&result), 2);
}

#[tokio::test]
async fn fully_booked_technician_gets_no_cluster() {
    let (jobs, addresses) = forty_jobs();
    let mut roster = technicians(5);
    if let Some(booked) = roster.last_mut() {
        booked.capacity = Some(3);
        booked.committed_jobs = 3;
    }
    let harness = harness(jobs, addresses, roster, DispatchConfig::default());

    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.clustering_info.total_clusters, 4);
    assert_eq!(result.scheduled_services.len(), 40);
    assert!(
        result
            .scheduled_services
            .iter()
            .all(|service| service.tech_id != TechnicianId("tech-5".into())),
        "booked technician left out"
    );
}

#[tokio::test]
async fn stray_and_duplicate_jobs_are_reported() {
    struct LeakySource(Vec<ServiceJob>);

    #[async_trait]
    impl JobSourcePort for LeakySource {
        async fn jobs_in(&self, _window: TimeWindow) -> Result<Vec<ServiceJob>, PortError> {
            Ok(self.0.clone())
        }
    }

    let point = Coordinate::new(40.7, -74.0);
    let mut early = job("early", 0, "40.7,-74.0");
    early.scheduled_start = window_start() - Duration::minutes(1);
    let mut at_end = job("at-end", 0, "40.7,-74.0");
    at_end.scheduled_start = window_end();
    let mut located = job("kept", 3, "ignored");
    located.coordinate = Some(point);
    let duplicate = located.clone();

    let providers = Providers::new(
        Arc::new(LeakySource(vec![early, at_end, located, duplicate])),
        Arc::new(MemoryRoster::new(technicians(2))),
        Arc::new(MemoryGeocoder::default()),
    );
    let cache = Arc::new(ExpiringCache::new(CacheConfig::default()));
    let service = DispatchService::new(providers, cache, DispatchConfig::default()).unwrap();

    let result = service.schedule(window_start(), window_end()).await.unwrap();

    assert_eq!(result.scheduled_services.len(), 1);
    assert_eq!(result.clustering_info.total_clusters, 1);
    let reasons: Vec<(&str, &DropReason)> = result
        .diagnostics
        .dropped_jobs
        .iter()
        .map(|dropped| (dropped.job_id.0.as_str(), &dropped.reason))
        .collect();
    assert_eq!(
        reasons,
        vec![
            ("early", &DropReason::OutsideWindow),
            ("at-end", &DropReason::OutsideWindow),
            ("kept", &DropReason::DuplicateJob),
        ]
    );
}

#[tokio::test]
async fn result_serializes_with_camel_case_fields() {
    let (jobs, addresses) = forty_jobs();
    let harness = harness(jobs, addresses, technicians(5), DispatchConfig::default());
    let result = harness.service.schedule(window_start(), window_end()).await.unwrap();

    let payload = serde_json::to_value(&result).unwrap();

    assert_eq!(payload["clusteringInfo"]["totalClusters"], 5);
    assert_eq!(payload["scheduledServices"].as_array().unwrap().len(), 40);
    assert!(payload["scheduledServices"][0]["techId"].is_string());
    assert!(payload["scheduledServices"][0]["jobId"].is_string());
}
