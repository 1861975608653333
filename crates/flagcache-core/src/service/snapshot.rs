use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::FlagService;
use crate::api::FlagError;
use crate::models::FeatureFlag;

/// Lifecycle of a `FlagService`.
///
/// `Loading` is only entered from `Uninitialized`. Once the first refresh
/// settles the service alternates between `Ready` and `Errored`, both of
/// which serve whatever the cache holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Errored,
}

/// Immutable copy of the service's state handed to subscribers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlagSnapshot {
    /// Sorted by name.
    pub flags: Vec<FeatureFlag>,
    /// A refresh is in flight.
    pub loading: bool,
    pub error: Option<FlagError>,
    pub error_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub state: ServiceState,
}

impl FlagSnapshot {
    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.flags[i])
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.get(name).map(|f| f.enabled).unwrap_or(false)
    }

    pub fn enabled_count(&self) -> usize {
        self.flags.iter().filter(|f| f.enabled).count()
    }
}

/// A consumer's view of a `FlagService`.
///
/// Attaching never triggers a fetch: a late subscriber starts from the
/// current snapshot, and every subscriber shares the service's refreshes.
#[derive(Clone)]
pub struct FlagSubscription {
    service: FlagService,
    rx: watch::Receiver<FlagSnapshot>,
}

impl FlagSubscription {
    pub(crate) fn new(service: FlagService, rx: watch::Receiver<FlagSnapshot>) -> Self {
        Self { service, rx }
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        self.rx.borrow().clone()
    }

    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.rx.borrow().is_enabled(name)
    }

    pub fn are_features_enabled<I, S>(&self, names: I) -> HashMap<String, bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let snapshot = self.rx.borrow();
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                (name.to_string(), snapshot.is_enabled(name))
            })
            .collect()
    }

    /// Joins the service's in-flight refresh if there is one.
    pub async fn refresh(&self) -> Result<(), FlagError> {
        self.service.refresh().await
    }

    /// Wait until the snapshot differs from the last one seen by this subscriber.
    pub async fn changed(&mut self) -> Result<FlagSnapshot, FlagError> {
        self.rx.changed().await.map_err(|_| FlagError::Shutdown)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// True if a newer snapshot was published since this subscriber last looked.
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    pub fn service(&self) -> &FlagService {
        &self.service
    }
}
