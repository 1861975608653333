//! Operational status view for feature flags.
//!
//! `StatusMonitor` polls a `FlagService` on its own cadence (30s by
//! default) and produces `StatusReport`s for dashboards. Its polls go
//! through the service's single-flight refresh like any other caller.

pub mod report;
pub mod status;

pub use report::{FlagRow, StatusReport};
pub use status::{MonitorConfig, StatusMonitor, DEFAULT_POLL_INTERVAL};
