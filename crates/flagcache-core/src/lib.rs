//! flagcache - client-side feature flag cache.
//!
//! Fetches boolean feature flags from a remote authority, keeps the last
//! known-good set in memory and serves synchronous, fail-closed lookups to
//! any number of consumers.
//!
//! - `api`: `FlagFetcher` trait and the reqwest-based `FlagClient`
//! - `cache`: `FlagCache`, the in-memory store
//! - `service`: `FlagService` (initial load, auto-refresh, single-flight
//!   refresh, per-user checks) and snapshot subscriptions
//! - `monitor`: `StatusMonitor`, an independently polling status view
//!
//! ```no_run
//! use std::sync::Arc;
//! use flagcache_core::{FlagClient, FlagService, FlagServiceConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = FlagClient::new("https://flags.example.com/api")?.with_token("token".into());
//! let flags = FlagService::start(Arc::new(client), FlagServiceConfig::default());
//! flags.refresh().await.ok();
//! if flags.is_enabled("new-ui") {
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod monitor;
pub mod service;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{FlagClient, FlagError, FlagFetcher};
pub use cache::FlagCache;
pub use config::Config;
pub use models::{FeatureFlag, FlagState};
pub use monitor::{MonitorConfig, StatusMonitor, StatusReport};
pub use service::{FlagService, FlagServiceConfig, FlagSnapshot, FlagSubscription, ServiceState};
