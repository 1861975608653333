use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::scheduler::ScheduledTask;
use super::snapshot::{FlagSnapshot, FlagSubscription, ServiceState};
use crate::api::{FlagError, FlagFetcher};
use crate::cache::FlagCache;
use crate::models::{FeatureFlag, FlagState};

/// Default period between automatic refreshes.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct FlagServiceConfig {
    pub refresh_interval: Duration,
    pub auto_refresh: bool,
}

impl Default for FlagServiceConfig {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            auto_refresh: true,
        }
    }
}

/// Completion of the one in-flight bulk refresh, shared by every caller that joined it.
type RefreshFuture = Shared<BoxFuture<'static, Result<(), FlagError>>>;

/// Everything guarded by the cache lock.
#[derive(Default)]
struct Store {
    cache: FlagCache,
    state: ServiceState,
    loading: bool,
}

struct Inner {
    fetcher: Arc<dyn FlagFetcher>,
    store: RwLock<Store>,
    in_flight: Mutex<Option<RefreshFuture>>,
    timer: Mutex<Option<ScheduledTask>>,
    refresh_interval: Duration,
    live: AtomicBool,
    snapshot_tx: watch::Sender<FlagSnapshot>,
}

/// Feature flag service handle. Clone is cheap and every clone shares the
/// same cache, timer and in-flight refresh.
///
/// Only this type writes to the `FlagCache`. Reads are synchronous and never
/// fail; unknown names read as disabled.
#[derive(Clone)]
pub struct FlagService {
    inner: Arc<Inner>,
}

impl FlagService {
    /// Build the service, start the initial refresh and, if configured, arm
    /// the auto-refresh timer. Must be called from within a tokio runtime.
    pub fn start(fetcher: Arc<dyn FlagFetcher>, config: FlagServiceConfig) -> Self {
        let (snapshot_tx, _) = watch::channel(FlagSnapshot::default());
        let service = Self {
            inner: Arc::new(Inner {
                fetcher,
                store: RwLock::new(Store::default()),
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                refresh_interval: config.refresh_interval,
                live: AtomicBool::new(true),
                snapshot_tx,
            }),
        };

        info!(
            refresh_interval_secs = config.refresh_interval.as_secs(),
            auto_refresh = config.auto_refresh,
            "Starting feature flag service"
        );

        // Initial load runs in the background; callers can await `refresh()` to join it.
        drop(service.begin_refresh());
        if config.auto_refresh {
            service.arm_timer();
        }
        service
    }

    // ===== Queries =====

    /// Fail-closed read of the cache. Never blocks on the network.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner.store.read().cache.is_enabled(name)
    }

    pub fn are_enabled<I, S>(&self, names: I) -> HashMap<String, bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = self.inner.store.read();
        names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                (name.to_string(), store.cache.is_enabled(name))
            })
            .collect()
    }

    pub fn lookup(&self, name: &str) -> FlagState {
        self.inner.store.read().cache.lookup(name)
    }

    /// Like `is_enabled`, but an unknown name is an error instead of `false`.
    pub fn require(&self, name: &str) -> Result<bool, FlagError> {
        match self.lookup(name) {
            FlagState::Enabled => Ok(true),
            FlagState::Disabled => Ok(false),
            FlagState::Unknown => Err(FlagError::UnknownFlag(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<FeatureFlag> {
        self.inner.store.read().cache.get(name).cloned()
    }

    pub fn get_all(&self) -> Vec<FeatureFlag> {
        self.inner.store.read().cache.get_all()
    }

    pub fn state(&self) -> ServiceState {
        self.inner.store.read().state
    }

    pub fn last_error(&self) -> Option<FlagError> {
        self.inner.store.read().cache.last_error().cloned()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.inner.store.read().cache.last_updated_at()
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> FlagSubscription {
        FlagSubscription::new(self.clone(), self.inner.snapshot_tx.subscribe())
    }

    // ===== Refresh =====

    /// Reload the full flag set.
    ///
    /// If a refresh is already in flight this joins it instead of issuing
    /// another fetch; every joined caller gets that fetch's outcome. On
    /// failure the cache keeps its flags and records the error.
    pub async fn refresh(&self) -> Result<(), FlagError> {
        self.begin_refresh().await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    fn begin_refresh(&self) -> RefreshFuture {
        if !self.is_live() {
            return future::ready(Err(FlagError::Shutdown)).boxed().shared();
        }

        let mut slot = self.inner.in_flight.lock();
        if let Some(pending) = slot.as_ref() {
            debug!("Refresh already in flight, joining it");
            return pending.clone();
        }

        self.inner.mark_loading();

        // Spawned so the fetch completes even if every caller stops polling.
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_refresh().await });
        let pending = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(FlagError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        *slot = Some(pending.clone());
        pending
    }

    // ===== Ad-hoc checks =====

    /// Evaluate `name` for one user. Errors go straight to the caller and leave
    /// the cache alone; on success the single cached entry is updated.
    pub async fn check_for_user(&self, name: &str, user_id: &str) -> Result<bool, FlagError> {
        self.ensure_live()?;
        let enabled = self
            .inner
            .fetcher
            .fetch_for_user(name, user_id)
            .await
            .inspect_err(|e| warn!(flag = %name, user_id = %user_id, error = %e, "Per-user flag check failed"))?;

        debug!(flag = %name, user_id = %user_id, enabled, "Per-user flag check");
        self.inner.apply_single(name, enabled);
        Ok(enabled)
    }

    /// Ask the authority for one flag directly, updating that cache entry.
    pub async fn check_one(&self, name: &str) -> Result<bool, FlagError> {
        self.ensure_live()?;
        let enabled = self
            .inner
            .fetcher
            .fetch_one(name)
            .await
            .inspect_err(|e| warn!(flag = %name, error = %e, "Flag check failed"))?;

        self.inner.apply_single(name, enabled);
        Ok(enabled)
    }

    /// Ask the authority about several names without touching the cache.
    /// Every requested name is in the result; names the authority omitted are `Unknown`.
    pub async fn check_remote<I, S>(&self, names: I) -> Result<HashMap<String, FlagState>, FlagError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_live()?;
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let known = self.inner.fetcher.fetch_named(&names).await?;

        Ok(names
            .into_iter()
            .map(|name| {
                let state = FlagState::from(known.get(&name).copied());
                (name, state)
            })
            .collect())
    }

    // ===== Auto-refresh =====

    /// Turning auto-refresh on re-arms the timer without fetching immediately.
    pub fn set_auto_refresh(&self, enabled: bool) {
        if enabled {
            if self.is_live() {
                self.arm_timer();
            }
        } else if let Some(timer) = self.inner.timer.lock().take() {
            timer.stop();
            info!("Feature flag auto-refresh disabled");
        }
    }

    pub fn is_auto_refresh(&self) -> bool {
        self.inner.timer.lock().is_some()
    }

    pub fn refresh_interval(&self) -> Duration {
        self.inner.refresh_interval
    }

    fn arm_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() {
            return;
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        *timer = Some(ScheduledTask::spawn(
            "flag-refresh",
            self.inner.refresh_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    let service = FlagService { inner };
                    if service.is_refreshing() {
                        debug!("Previous refresh still outstanding, skipping scheduled refresh");
                    } else {
                        drop(service.begin_refresh());
                    }
                    ControlFlow::Continue(())
                }
            },
        ));
        info!(
            refresh_interval_secs = self.inner.refresh_interval.as_secs(),
            "Feature flag auto-refresh armed"
        );
    }

    // ===== Lifecycle =====

    /// Cancel the timer and stop accepting work. A fetch still in flight
    /// finishes without touching the cache.
    pub fn shutdown(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            if let Some(timer) = self.inner.timer.lock().take() {
                timer.stop();
            }
            info!("Feature flag service shut down");
        }
    }

    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    fn ensure_live(&self) -> Result<(), FlagError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(FlagError::Shutdown)
        }
    }
}

impl Inner {
    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn mark_loading(&self) {
        let mut store = self.store.write();
        store.loading = true;
        if store.state == ServiceState::Uninitialized {
            store.state = ServiceState::Loading;
        }
        self.publish(&store);
    }

    async fn run_refresh(&self) -> Result<(), FlagError> {
        let mut guard = RefreshGuard {
            inner: self,
            settled: false,
        };
        debug!("Refreshing feature flags");
        let result = self.fetcher.fetch_all().await;

        if !self.is_live() {
            debug!("Service shut down during refresh, discarding result");
            return Err(FlagError::Shutdown);
        }

        let now = Utc::now();
        let mut store = self.store.write();
        let outcome = match result {
            Ok(flags) => {
                info!(count = flags.len(), "Feature flags refreshed");
                store.cache.replace_all(flags, now);
                store.state = ServiceState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, cached = store.cache.len(), "Feature flag refresh failed, keeping cached flags");
                store.cache.mark_error(e.clone(), now);
                store.state = ServiceState::Errored;
                Err(e)
            }
        };
        store.loading = false;
        self.publish(&store);
        guard.settled = true;
        outcome
    }

    fn apply_single(&self, name: &str, enabled: bool) {
        if !self.is_live() {
            return;
        }
        let mut store = self.store.write();
        if store.cache.update_one(name, enabled) {
            self.publish(&store);
        }
    }

    /// Push a new snapshot to subscribers if anything they can see changed.
    fn publish(&self, store: &Store) {
        let next = FlagSnapshot {
            flags: store.cache.get_all(),
            loading: store.loading,
            error: store.cache.last_error().cloned(),
            error_at: store.cache.last_error_at(),
            last_updated: store.cache.last_updated_at(),
            state: store.state,
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Releases the in-flight slot when a refresh task ends, including by panic
/// or cancellation. An unsettled refresh on a live service is recorded as a
/// failed attempt.
struct RefreshGuard<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let mut store = self.inner.store.write();
            store.loading = false;
            if self.inner.is_live() {
                warn!("Feature flag refresh ended without a result");
                store.cache.mark_error(
                    FlagError::TaskFailed("refresh did not complete".to_string()),
                    Utc::now(),
                );
                store.state = ServiceState::Errored;
            }
            self.inner.publish(&store);
        }
        // Store lock released above; begin_refresh takes in_flight before store
        *self.inner.in_flight.lock() = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
