//! In-memory port implementations for offline runs and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::model::{CoordKey, Coordinate, ServiceJob, Technician, TimeWindow};
use crate::ports::{DistancePort, GeocodePort, JobSourcePort, PortError, RosterPort};

/// Geocoder backed by a fixed lookup table.
#[derive(Debug, Default)]
pub struct MemoryGeocoder {
    known: HashMap<String, Coordinate>,
    calls: AtomicUsize,
}

impl MemoryGeocoder {
    /// Build from `(location_ref, coordinate)` pairs.
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Coordinate)>,
        S: Into<String>,
    {
        Self {
            known: entries
                .into_iter()
                .map(|(location, coordinate)| (location.into(), coordinate))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodePort for MemoryGeocoder {
    async fn geocode(&self, location_ref: &str) -> Result<Coordinate, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.known
            .get(location_ref)
            .copied()
            .ok_or_else(|| PortError::NotFound(location_ref.to_owned()))
    }
}

/// Geocoder that reads `"lat,lon"` references literally.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiteralGeocoder;

#[async_trait]
impl GeocodePort for LiteralGeocoder {
    async fn geocode(&self, location_ref: &str) -> Result<Coordinate, PortError> {
        let (lat, lon) = location_ref
            .split_once(',')
            .ok_or_else(|| PortError::Malformed(format!("expected \"lat,lon\", got {location_ref:?}")))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|err| PortError::Malformed(format!("{part:?}: {err}")))
        };
        let coordinate = Coordinate::new(parse(lat)?, parse(lon)?);
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(PortError::NotFound(location_ref.to_owned()))
        }
    }
}

/// Distance provider returning straight-line distance times a detour factor.
#[derive(Debug)]
pub struct ScaledDistance {
    factor: f64,
    unreachable: Vec<CoordKey>,
    calls: AtomicUsize,
}

impl ScaledDistance {
    /// Provider multiplying great-circle distance by `factor`.
    #[must_use]
    pub fn new(factor: f64) -> Self {
        Self {
            factor,
            unreachable: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail every pair touching `point`.
    #[must_use]
    pub fn unreachable(mut self, point: Coordinate) -> Self {
        self.unreachable.push(point.key());
        self
    }

    /// Number of pairs requested so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistancePort for ScaledDistance {
    async fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, PortError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.contains(&from.key()) || self.unreachable.contains(&to.key()) {
            return Err(PortError::Unavailable(format!("no route {from} -> {to}")));
        }
        Ok(from.haversine_km(&to) * self.factor)
    }
}

/// Job source over a fixed list.
#[derive(Debug, Default, Clone)]
pub struct MemoryJobSource {
    jobs: Vec<ServiceJob>,
}

impl MemoryJobSource {
    /// Serve `jobs`.
    #[must_use]
    pub fn new(jobs: Vec<ServiceJob>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl JobSourcePort for MemoryJobSource {
    async fn jobs_in(&self, window: TimeWindow) -> Result<Vec<ServiceJob>, PortError> {
        Ok(self
            .jobs
            .iter()
            .filter(|job| window.contains(job.scheduled_start))
            .cloned()
            .collect())
    }
}

/// Roster over a fixed list, on duty for every window.
#[derive(Debug, Default, Clone)]
pub struct MemoryRoster {
    technicians: Vec<Technician>,
}

impl MemoryRoster {
    /// Serve `technicians`.
    #[must_use]
    pub fn new(technicians: Vec<Technician>) -> Self {
        Self { technicians }
    }
}

#[async_trait]
impl RosterPort for MemoryRoster {
    async fn technicians(&self, _window: TimeWindow) -> Result<Vec<Technician>, PortError> {
        Ok(self.technicians.clone())
    }
}
