//! In-process key/value cache with per-category expiry.
//!
//! Keys follow a naming contract: geocode results live under `location:`,
//! distance results under `distanceMatrix:`. The category passed on each write
//! decides the TTL; the prefix is only sniffed by [`CacheCategory::from_key`]
//! for callers that cannot say which category they mean.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CacheConfig;
use crate::error::DispatchError;

/// Source of the current time for expiry decisions.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start the clock at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `secs` seconds.
    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock();
        *now += TimeDelta::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Classification of a cache entry, deciding its default TTL.
pub enum CacheCategory {
    /// Geocode results.
    Location,
    /// Pairwise travel distances.
    DistanceMatrix,
    /// Anything else.
    Default,
}

impl CacheCategory {
    /// Key prefix reserved for the category.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            CacheCategory::Location => "location:",
            CacheCategory::DistanceMatrix => "distanceMatrix:",
            CacheCategory::Default => "",
        }
    }

    /// Build a key in this category's namespace.
    #[must_use]
    pub fn key(self, suffix: &str) -> String {
        format!("{}{suffix}", self.prefix())
    }

    /// Infer the category from a key's prefix.
    #[must_use]
    pub fn from_key(key: &str) -> Self {
        if key.starts_with(CacheCategory::Location.prefix()) {
            CacheCategory::Location
        } else if key.starts_with(CacheCategory::DistanceMatrix.prefix()) {
            CacheCategory::DistanceMatrix
        } else {
            CacheCategory::Default
        }
    }
}

#[derive(Debug, Clone)]
/// Stored value with its classification and absolute expiry.
pub struct CacheEntry {
    /// Cached payload.
    pub value: Value,
    /// Category the entry was written under.
    pub category: CacheCategory,
    /// Instant from which reads treat the entry as absent.
    pub expires_at: DateTime<Utc>,
}

/// Shared map guarded by a single lock; every operation is one atomic key update.
pub struct ExpiringCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl ExpiringCache {
    /// Create an empty cache using the wall clock.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty cache driven by `clock`.
    #[must_use]
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// Default TTL in seconds for `category`.
    #[must_use]
    pub fn ttl_secs(&self, category: CacheCategory) -> u64 {
        match category {
            CacheCategory::Location => self.config.location_ttl_secs,
            CacheCategory::DistanceMatrix => self.config.distance_matrix_ttl_secs,
            CacheCategory::Default => self.config.default_ttl_secs,
        }
    }

    /// Read `key`, removing it if it has expired.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.expires_at > now {
            return Some(entry.value.clone());
        }
        entries.remove(key);
        tracing::debug!(key, "cache entry expired");
        None
    }

    /// Store `value` under `key` with the category's default TTL.
    pub fn set(&self, key: impl Into<String>, value: Value, category: CacheCategory) {
        let ttl = self.ttl_secs(category);
        self.insert(key.into(), value, category, ttl);
    }

    /// Store `value` under `key` with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTtl`] when `ttl_secs` is zero.
    pub fn set_with_ttl(
        &self,
        key: impl Into<String>,
        value: Value,
        category: CacheCategory,
        ttl_secs: u64,
    ) -> Result<(), DispatchError> {
        if ttl_secs == 0 {
            return Err(DispatchError::InvalidTtl);
        }
        self.insert(key.into(), value, category, ttl_secs);
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Read and decode `key`; an undecodable entry is dropped and reported as a miss.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        // Decode and discard under one lock so a concurrent set is never removed.
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.expires_at <= now {
            entries.remove(key);
            return None;
        }
        match serde_json::from_value(entry.value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                entries.remove(key);
                None
            }
        }
    }

    /// Encode and store `value` with the category's default TTL.
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T, category: CacheCategory) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(encoded) => self.set(key, encoded, category),
            Err(err) => tracing::warn!(key = %key, error = %err, "value not cacheable"),
        }
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries that have not expired.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    /// Whether no live entry exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: String, value: Value, category: CacheCategory, ttl_secs: u64) {
        let now = self.clock.now();
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        tracing::debug!(key = %key, ?category, ttl_secs, "cache set");
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                category,
                expires_at,
            },
        );
    }
}
