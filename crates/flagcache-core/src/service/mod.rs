//! Refresh and query service for feature flags.
//!
//! `FlagService` owns the `FlagCache`, performs the initial load, keeps it
//! fresh on a timer and coalesces overlapping refreshes into a single
//! fetch. Consumers read through it synchronously or subscribe to snapshots.

pub mod flag_service;
pub mod scheduler;
pub mod snapshot;

pub use flag_service::{FlagService, FlagServiceConfig, DEFAULT_REFRESH_INTERVAL};
pub use scheduler::ScheduledTask;
pub use snapshot::{FlagSnapshot, FlagSubscription, ServiceState};
