//! Cache-first travel distances and the metrics clustering runs on.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::time::timeout;

use crate::cache::{CacheCategory, ExpiringCache};
use crate::error::DispatchError;
use crate::model::{CoordKey, Coordinate};
use crate::ports::{DistancePort, PortError};

/// Symmetric distance between two coordinates, in kilometres.
pub trait Metric {
    /// Distance from `from` to `to`.
    fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> f64;
}

/// Great-circle distance, used when nothing better is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct StraightLine;

impl Metric for StraightLine {
    fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> f64 {
        from.haversine_km(to)
    }
}

/// Order-independent pair of coordinate keys.
fn canonical_pair(from: &Coordinate, to: &Coordinate) -> (CoordKey, CoordKey) {
    let (left, right) = (from.key(), to.key());
    if left <= right { (left, right) } else { (right, left) }
}

/// Cache key for a pair, identical whichever way round the pair is given.
#[must_use]
pub fn pair_cache_key(from: &Coordinate, to: &Coordinate) -> String {
    let ((lat_a, lon_a), (lat_b, lon_b)) = canonical_pair(from, to);
    CacheCategory::DistanceMatrix.key(&format!("{lat_a}_{lon_a}|{lat_b}_{lon_b}"))
}

/// Provider distances for a fixed point set, straight-line for the gaps.
#[derive(Debug, Default, Clone)]
pub struct DistanceTable {
    known: HashMap<(CoordKey, CoordKey), f64>,
    fallbacks: usize,
}

impl DistanceTable {
    /// Table with no provider data; every lookup is straight-line.
    #[must_use]
    pub fn straight_line() -> Self {
        Self::default()
    }

    /// Pairs served by the provider.
    #[must_use]
    pub fn known_pairs(&self) -> usize {
        self.known.len()
    }

    /// Pairs the provider could not serve.
    #[must_use]
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }
}

impl Metric for DistanceTable {
    fn distance_km(&self, from: &Coordinate, to: &Coordinate) -> f64 {
        self.known
            .get(&canonical_pair(from, to))
            .copied()
            .unwrap_or_else(|| from.haversine_km(to))
    }
}

/// Distance provider wrapped with the shared cache and a per-call deadline.
pub struct DistanceLookup {
    port: Option<Arc<dyn DistancePort>>,
    cache: Arc<ExpiringCache>,
    deadline: Duration,
    concurrency: usize,
}

impl DistanceLookup {
    /// Wrap an optional `port`; without one every pair is unavailable.
    #[must_use]
    pub fn new(
        port: Option<Arc<dyn DistancePort>>,
        cache: Arc<ExpiringCache>,
        deadline: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            port,
            cache,
            deadline,
            concurrency: concurrency.max(1),
        }
    }

    /// Travel distance between two points, consulting `distanceMatrix:` entries first.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DistanceUnavailable`] when no provider is
    /// configured, the provider fails or times out, or it returns a negative or
    /// non-finite cost. Callers treat this as retryable.
    pub async fn distance(&self, from: Coordinate, to: Coordinate) -> Result<f64, DispatchError> {
        if from.key() == to.key() {
            return Ok(0.0);
        }

        let key = pair_cache_key(&from, &to);
        if let Some(cost) = self.cache.get_as::<f64>(&key) {
            tracing::debug!(key = %key, "distance cache hit");
            return Ok(cost);
        }

        let Some(port) = &self.port else {
            return Err(unavailable("no distance provider configured"));
        };

        let outcome = match timeout(self.deadline, port.distance(from, to)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(PortError::Timeout(self.deadline.as_millis())),
        };

        match outcome {
            Ok(cost) if cost.is_finite() && cost >= 0.0 => {
                self.cache.set_as(key, &cost, CacheCategory::DistanceMatrix);
                Ok(cost)
            }
            Ok(cost) => Err(unavailable(&format!("provider returned invalid cost {cost}"))),
            Err(err) => Err(unavailable(&err.to_string())),
        }
    }

    /// Fetch every distinct pair among `points` concurrently.
    ///
    /// Pairs that fail are left out of the table and counted as fallbacks; the
    /// table answers them with straight-line distance.
    pub async fn table(&self, points: &[Coordinate]) -> DistanceTable {
        if self.port.is_none() {
            return DistanceTable::straight_line();
        }

        let mut seen = BTreeSet::new();
        let unique: Vec<Coordinate> = points
            .iter()
            .filter(|point| seen.insert(point.key()))
            .copied()
            .collect();

        let pairs: Vec<(Coordinate, Coordinate)> = unique
            .iter()
            .enumerate()
            .flat_map(|(pos, from)| unique.iter().skip(pos + 1).map(move |to| (*from, *to)))
            .collect();

        let results: Vec<_> = stream::iter(pairs)
            .map(|(from, to)| async move { (from, to, self.distance(from, to).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut table = DistanceTable::default();
        for (from, to, result) in results {
            match result {
                Ok(cost) => {
                    table.known.insert(canonical_pair(&from, &to), cost);
                }
                Err(err) => {
                    tracing::warn!(%from, %to, error = %err, "falling back to straight-line distance");
                    table.fallbacks += 1;
                }
            }
        }
        table
    }
}

fn unavailable(reason: &str) -> DispatchError {
    DispatchError::DistanceUnavailable {
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::memory::ScaledDistance;

    fn cache() -> Arc<ExpiringCache> {
        Arc::new(ExpiringCache::new(CacheConfig::default()))
    }

    #[test]
    fn pair_key_is_order_independent() {
        let here = Coordinate::new(52.52, 13.405);
        let there = Coordinate::new(48.137, 11.575);
        assert_eq!(pair_cache_key(&here, &there), pair_cache_key(&there, &here));
        assert!(pair_cache_key(&here, &there).starts_with("distanceMatrix:"), "prefixed");
    }

    #[tokio::test]
    async fn distance_is_cached_both_directions() {
        let provider = Arc::new(ScaledDistance::new(1.3));
        let lookup = DistanceLookup::new(
            Some(Arc::clone(&provider) as Arc<dyn DistancePort>),
            cache(),
            Duration::from_secs(1),
            4,
        );
        let here = Coordinate::new(52.52, 13.405);
        let there = Coordinate::new(52.40, 13.05);

        let forward = lookup.distance(here, there).await.unwrap();
        let backward = lookup.distance(there, here).await.unwrap();

        assert!((forward - backward).abs() < f64::EPSILON, "cached value reused");
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn missing_provider_is_unavailable() {
        let lookup = DistanceLookup::new(None, cache(), Duration::from_secs(1), 4);
        let err = lookup
            .distance(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DistanceUnavailable { .. }), "{err}");
        assert!(err.is_retryable(), "retryable");
    }

    #[tokio::test]
    async fn table_falls_back_for_failed_pairs() {
        let unreachable = Coordinate::new(10.0, 10.0);
        let provider = Arc::new(ScaledDistance::new(2.0).unreachable(unreachable));
        let lookup = DistanceLookup::new(
            Some(Arc::clone(&provider) as Arc<dyn DistancePort>),
            cache(),
            Duration::from_secs(1),
            4,
        );
        let first = Coordinate::new(0.0, 0.0);
        let second = Coordinate::new(0.0, 1.0);

        let table = lookup.table(&[first, second, unreachable, second]).await;

        assert_eq!(table.known_pairs(), 1);
        assert_eq!(table.fallbacks(), 2);
        let road = table.distance_km(&second, &first);
        assert!((road - 2.0 * first.haversine_km(&second)).abs() < 1e-9, "provider value used");
        let straight = table.distance_km(&first, &unreachable);
        assert!((straight - first.haversine_km(&unreachable)).abs() < 1e-9, "fallback used");
    }
}
