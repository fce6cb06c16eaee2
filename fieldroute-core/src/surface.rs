//! Request shapes exposed to the transport layer: the schedule query and the cache endpoint.
//!
//! Nothing here knows about HTTP; a router maps query strings and bodies onto
//! these types and turns [`QueryError`] into a client-error response.

use std::sync::Arc;

use chrono::{DateTime, ParseError, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheCategory, ExpiringCache};
use crate::model::TimeWindow;

#[derive(thiserror::Error, Debug)]
/// Caller mistakes detected before any work is done.
pub enum QueryError {
    /// A required parameter was absent or blank.
    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),
    /// A timestamp parameter is not ISO-8601.
    #[error("Malformed {param} timestamp {value:?}: {source}")]
    MalformedTimestamp {
        /// Parameter name.
        param: &'static str,
        /// Raw value.
        value: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },
    /// `end` is not after `start`.
    #[error("Invalid window: end {end} is not after start {start}")]
    InvalidWindow {
        /// Parsed start.
        start: DateTime<Utc>,
        /// Parsed end.
        end: DateTime<Utc>,
    },
    /// A TTL of zero seconds was supplied.
    #[error("ttl must be a positive number of seconds")]
    InvalidTtl,
}

impl QueryError {
    /// Every query error is the caller's fault.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        true
    }

    /// HTTP status a transport should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        400
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Parameters of a schedule request.
pub struct ScheduleQuery {
    /// ISO-8601 window start.
    pub start: Option<String>,
    /// ISO-8601 window end.
    pub end: Option<String>,
}

impl ScheduleQuery {
    /// Query for the given raw parameters.
    #[must_use]
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }

    /// Parse and validate into a half-open window.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingParameter`], [`QueryError::MalformedTimestamp`]
    /// or [`QueryError::InvalidWindow`].
    pub fn window(&self) -> Result<TimeWindow, QueryError> {
        let start = parse_timestamp("start", self.start.as_deref())?;
        let end = parse_timestamp("end", self.end.as_deref())?;
        TimeWindow::new(start, end).map_err(|_inverted| QueryError::InvalidWindow { start, end })
    }
}

fn parse_timestamp(param: &'static str, raw: Option<&str>) -> Result<DateTime<Utc>, QueryError> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(QueryError::MissingParameter(param))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| QueryError::MalformedTimestamp {
            param,
            value: raw.to_owned(),
            source,
        })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Body of a cache write.
pub struct CacheWrite {
    /// Entry key.
    pub key: Option<String>,
    /// Payload to store.
    #[serde(default)]
    pub data: Value,
    /// Explicit TTL in seconds; the key prefix decides when absent.
    pub ttl: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Body of a cache read.
pub struct CacheData {
    /// Stored payload, `null` when absent or expired.
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Body of a cache write or delete acknowledgement.
pub struct CacheAck {
    /// Always `true` for accepted requests.
    pub success: bool,
}

/// Cache endpoint backed by the shared [`ExpiringCache`].
pub struct CacheSurface {
    cache: Arc<ExpiringCache>,
}

impl CacheSurface {
    /// Serve `cache`.
    #[must_use]
    pub fn new(cache: Arc<ExpiringCache>) -> Self {
        Self { cache }
    }

    /// `GET ?key=`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingParameter`] without a key.
    pub fn get(&self, key: Option<&str>) -> Result<CacheData, QueryError> {
        let key = require_key(key)?;
        Ok(CacheData {
            data: self.cache.get(key).unwrap_or(Value::Null),
        })
    }

    /// `POST {key, data, ttl?}`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingParameter`] without a key and
    /// [`QueryError::InvalidTtl`] for a zero TTL.
    pub fn post(&self, write: CacheWrite) -> Result<CacheAck, QueryError> {
        let key = require_key(write.key.as_deref())?.to_owned();
        let category = CacheCategory::from_key(&key);
        match write.ttl {
            Some(ttl) => self
                .cache
                .set_with_ttl(key, write.data, category, ttl)
                .map_err(|_invalid| QueryError::InvalidTtl)?,
            None => self.cache.set(key, write.data, category),
        }
        Ok(CacheAck { success: true })
    }

    /// `DELETE ?key=`; deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::MissingParameter`] without a key.
    pub fn delete(&self, key: Option<&str>) -> Result<CacheAck, QueryError> {
        let key = require_key(key)?;
        self.cache.delete(key);
        Ok(CacheAck { success: true })
    }
}

fn require_key(key: Option<&str>) -> Result<&str, QueryError> {
    key.filter(|value| !value.trim().is_empty())
        .ok_or(QueryError::MissingParameter("key"))
}
