use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::report::StatusReport;
use crate::api::FlagError;
use crate::service::{FlagService, ScheduledTask};

/// Default monitor polling cadence, independent of the service's refresh interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub auto_refresh: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            auto_refresh: true,
        }
    }
}

struct MonitorInner {
    service: FlagService,
    poll_interval: Duration,
    auto_refresh: AtomicBool,
    /// Between `start` and `stop`; the poll timer only runs while set.
    running: AtomicBool,
    timer: Mutex<Option<ScheduledTask>>,
    follower: Mutex<Option<JoinHandle<()>>>,
    report_tx: watch::Sender<StatusReport>,
}

/// Polling status view over a `FlagService`.
///
/// Never writes to the cache itself; its only side effect is calling
/// `FlagService::refresh`.
#[derive(Clone)]
pub struct StatusMonitor {
    inner: Arc<MonitorInner>,
}

impl StatusMonitor {
    pub fn new(service: FlagService, config: MonitorConfig) -> Self {
        let initial = StatusReport::from_snapshot(
            &service.snapshot(),
            config.auto_refresh,
            config.poll_interval,
        );
        let (report_tx, _) = watch::channel(initial);

        Self {
            inner: Arc::new(MonitorInner {
                service,
                poll_interval: config.poll_interval,
                auto_refresh: AtomicBool::new(config.auto_refresh),
                running: AtomicBool::new(false),
                timer: Mutex::new(None),
                follower: Mutex::new(None),
                report_tx,
            }),
        }
    }

    /// Begin following service snapshots and, if auto-refresh is on, polling.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.follow_service();
        if self.is_auto_refresh() {
            self.arm_timer();
        }
        info!(
            poll_interval_secs = self.inner.poll_interval.as_secs(),
            auto_refresh = self.is_auto_refresh(),
            "Status monitor started"
        );
    }

    /// Cancel the monitor's own tasks. The service keeps running.
    ///
    /// Auto-refresh changes made while stopped are recorded and take effect
    /// on the next `start`.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.stop();
        }
        if let Some(follower) = self.inner.follower.lock().take() {
            follower.abort();
        }
        debug!("Status monitor stopped");
    }

    /// Manual refresh through the service's single-flight gate.
    pub async fn refresh(&self) -> Result<(), FlagError> {
        self.inner.poll().await
    }

    /// Arms or cancels the poll timer. Before `start` or after `stop` only the
    /// setting changes.
    pub fn set_auto_refresh(&self, enabled: bool) {
        self.inner.auto_refresh.store(enabled, Ordering::SeqCst);
        if enabled {
            self.arm_timer();
        } else if let Some(timer) = self.inner.timer.lock().take() {
            timer.stop();
        }
        self.inner.publish();
        info!(enabled, "Status monitor auto-refresh toggled");
    }

    /// Flip auto-refresh and return the new setting.
    pub fn toggle_auto_refresh(&self) -> bool {
        let enabled = !self.is_auto_refresh();
        self.set_auto_refresh(enabled);
        enabled
    }

    pub fn is_auto_refresh(&self) -> bool {
        self.inner.auto_refresh.load(Ordering::SeqCst)
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    pub fn report(&self) -> StatusReport {
        self.inner.current_report()
    }

    pub fn render(&self) -> String {
        self.report().render(Utc::now())
    }

    /// Receives a new report whenever the displayed state changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.inner.report_tx.subscribe()
    }

    pub fn service(&self) -> &FlagService {
        &self.inner.service
    }

    fn arm_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if timer.is_some() || !self.inner.running.load(Ordering::SeqCst) {
            return;
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        *timer = Some(ScheduledTask::spawn(
            "flag-monitor",
            self.inner.poll_interval,
            move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return ControlFlow::Break(());
                    };
                    // Failures are already on the report
                    let _ = inner.poll().await;
                    ControlFlow::Continue(())
                }
            },
        ));
    }

    fn follow_service(&self) {
        let mut follower = self.inner.follower.lock();
        if follower.is_some() {
            return;
        }

        let weak: Weak<MonitorInner> = Arc::downgrade(&self.inner);
        let mut subscription = self.inner.service.subscribe();
        *follower = Some(tokio::spawn(async move {
            while subscription.changed().await.is_ok() {
                match weak.upgrade() {
                    Some(inner) => inner.publish(),
                    None => break,
                }
            }
        }));
    }
}

impl MonitorInner {
    async fn poll(&self) -> Result<(), FlagError> {
        let result = self.service.refresh().await;
        if let Err(ref e) = result {
            debug!(error = %e, "Monitor refresh failed");
        }
        self.publish();
        result
    }

    fn current_report(&self) -> StatusReport {
        StatusReport::from_snapshot(
            &self.service.snapshot(),
            self.auto_refresh.load(Ordering::SeqCst),
            self.poll_interval,
        )
    }

    fn publish(&self) {
        let next = self.current_report();
        self.report_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        if let Some(follower) = self.follower.get_mut().take() {
            follower.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureFlag;
    use crate::service::FlagServiceConfig;
    use crate::testing::ScriptedFetcher;

    fn service_without_timer(fetcher: Arc<ScriptedFetcher>) -> FlagService {
        FlagService::start(
            fetcher,
            FlagServiceConfig {
                refresh_interval: Duration::from_secs(300),
                auto_refresh: false,
            },
        )
    }

    #[tokio::test]
    async fn test_report_counts_match_cache() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_ok(vec![
            FeatureFlag::new("a", true),
            FeatureFlag::new("b", true),
            FeatureFlag::new("c", false),
        ]);
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(service, MonitorConfig::default());
        let report = monitor.report();
        assert_eq!((report.total, report.enabled, report.disabled), (3, 2, 1));
        assert!(monitor.render().contains("Total: 3  Enabled: 2  Disabled: 1"));
    }

    #[tokio::test]
    async fn test_manual_refresh_joins_in_flight_fetch() {
        let fetcher = ScriptedFetcher::new();
        fetcher.hold();
        fetcher.push_ok(vec![FeatureFlag::new("a", true)]);
        let service = service_without_timer(fetcher.clone());

        let monitor = StatusMonitor::new(
            service.clone(),
            MonitorConfig {
                poll_interval: Duration::from_secs(30),
                auto_refresh: false,
            },
        );
        let mut reports = monitor.subscribe();

        let pending = monitor.refresh();
        fetcher.release(1);
        pending.await.unwrap();

        assert_eq!(fetcher.fetch_all_calls(), 1);
        assert!(reports.has_changed().unwrap());
        assert_eq!(reports.borrow_and_update().enabled, 1);
    }

    #[tokio::test]
    async fn test_error_is_reported_with_last_good_flags() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_ok(vec![FeatureFlag::new("a", true)]);
        fetcher.push_err(FlagError::Network("connection refused".to_string()));
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(service, MonitorConfig::default());
        assert!(monitor.refresh().await.is_err());

        let report = monitor.report();
        assert_eq!(report.total, 1);
        assert_eq!(
            report.last_error.as_deref(),
            Some("Network error: connection refused")
        );
        assert!(report.last_error_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_on_own_cadence() {
        let fetcher = ScriptedFetcher::new();
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(service.clone(), MonitorConfig::default());
        monitor.start();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fetcher.fetch_all_calls(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fetcher.fetch_all_calls(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.fetch_all_calls(), 4);
        assert!(!service.is_auto_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_auto_refresh() {
        let fetcher = ScriptedFetcher::new();
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(service, MonitorConfig::default());
        monitor.start();
        assert!(!monitor.toggle_auto_refresh());
        assert!(!monitor.report().auto_refresh);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.fetch_all_calls(), 1);

        assert!(monitor.toggle_auto_refresh());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fetcher.fetch_all_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enabling_auto_refresh_after_stop_does_not_poll() {
        let fetcher = ScriptedFetcher::new();
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(service, MonitorConfig::default());
        monitor.start();
        monitor.stop();

        monitor.set_auto_refresh(false);
        monitor.set_auto_refresh(true);
        assert!(monitor.is_auto_refresh());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.fetch_all_calls(), 1);

        // The setting carries over to the next start
        monitor.start();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fetcher.fetch_all_calls(), 2);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_before_start_waits_for_start() {
        let fetcher = ScriptedFetcher::new();
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(
            service,
            MonitorConfig {
                poll_interval: Duration::from_secs(30),
                auto_refresh: false,
            },
        );
        monitor.set_auto_refresh(true);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.fetch_all_calls(), 1);
    }

    #[tokio::test]
    async fn test_follows_service_refreshes() {
        let fetcher = ScriptedFetcher::new();
        fetcher.push_ok(vec![]);
        fetcher.push_ok(vec![FeatureFlag::new("late", true)]);
        let service = service_without_timer(fetcher.clone());
        service.refresh().await.unwrap();

        let monitor = StatusMonitor::new(
            service.clone(),
            MonitorConfig {
                poll_interval: Duration::from_secs(30),
                auto_refresh: false,
            },
        );
        monitor.start();
        let mut reports = monitor.subscribe();

        // Refresh driven by someone other than the monitor
        service.refresh().await.unwrap();
        loop {
            reports.changed().await.unwrap();
            if reports.borrow_and_update().total == 1 {
                break;
            }
        }
        monitor.stop();
    }
}
