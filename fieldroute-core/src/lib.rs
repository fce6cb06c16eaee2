//! Core types and service wiring for the fieldroute dispatch scheduler.

/// Pairing of clusters with technicians.
pub mod assign;
/// Expiring key/value cache shared by every lookup.
pub mod cache;
/// Greedy spatial clustering of located jobs.
pub mod cluster;
/// Tunables and their defaults.
pub mod config;
/// Cache-first travel distances and clustering metrics.
pub mod distance;
/// Error taxonomy of a scheduling run.
pub mod error;
/// Cache-first geocoding.
pub mod geocode;
/// In-memory port implementations.
pub mod memory;
/// Domain models and identifiers.
pub mod model;
/// Traits describing the external collaborators.
pub mod ports;
/// Bundle of ports backing a service.
pub mod providers;
/// Scheduling entry point.
pub mod service;
/// Transport-agnostic request handling for schedule queries and the cache endpoint.
pub mod surface;

pub use assign::{ClusterSummary, ClusteringInfo, DispatchPlan};
pub use cache::{CacheCategory, ExpiringCache};
pub use config::DispatchConfig;
pub use error::DispatchError;
pub use model::*;
pub use ports::*;
pub use providers::Providers;
pub use service::{DispatchService, ScheduleResult, ScheduledService};
