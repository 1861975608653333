use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::FeatureFlag;
use crate::service::{FlagSnapshot, ServiceState};
use crate::utils::{format_age, format_timestamp, truncate_string};

const NAME_WIDTH: usize = 32;
const STATE_WIDTH: usize = 10;
const DESCRIPTION_WIDTH: usize = 48;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagRow {
    pub name: String,
    pub enabled: bool,
    pub description: Option<String>,
}

impl From<&FeatureFlag> for FlagRow {
    fn from(flag: &FeatureFlag) -> Self {
        Self {
            name: flag.name.clone(),
            enabled: flag.enabled,
            description: flag.description.clone(),
        }
    }
}

/// Point-in-time view of the flag service for display.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub rows: Vec<FlagRow>,
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub loading: bool,
    pub state: ServiceState,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub auto_refresh: bool,
    pub poll_interval: Duration,
}

impl StatusReport {
    pub fn from_snapshot(snapshot: &FlagSnapshot, auto_refresh: bool, poll_interval: Duration) -> Self {
        let rows: Vec<FlagRow> = snapshot.flags.iter().map(FlagRow::from).collect();
        let enabled = rows.iter().filter(|r| r.enabled).count();

        Self {
            total: rows.len(),
            enabled,
            disabled: rows.len() - enabled,
            rows,
            loading: snapshot.loading,
            state: snapshot.state,
            last_error: snapshot.error.as_ref().map(|e| e.to_string()),
            last_error_at: snapshot.error_at,
            last_updated: snapshot.last_updated,
            auto_refresh,
            poll_interval,
        }
    }

    /// Plain-text table. The last good flag list is shown even when the most
    /// recent refresh failed.
    pub fn render(&self, now: DateTime<Utc>) -> String {
        let mut out = String::new();

        if self.rows.is_empty() {
            let _ = writeln!(out, "No feature flags loaded");
        } else {
            let _ = writeln!(
                out,
                "{:<name$} {:<state$} DESCRIPTION",
                "FLAG",
                "STATE",
                name = NAME_WIDTH,
                state = STATE_WIDTH
            );
            for row in &self.rows {
                let description = row
                    .description
                    .as_deref()
                    .map(|d| truncate_string(d, DESCRIPTION_WIDTH))
                    .unwrap_or_default();
                let line = format!(
                    "{:<name$} {:<state$} {}",
                    truncate_string(&row.name, NAME_WIDTH),
                    if row.enabled { "enabled" } else { "disabled" },
                    description,
                    name = NAME_WIDTH,
                    state = STATE_WIDTH
                );
                let _ = writeln!(out, "{}", line.trim_end());
            }
        }

        let _ = writeln!(
            out,
            "Total: {}  Enabled: {}  Disabled: {}",
            self.total, self.enabled, self.disabled
        );

        let updated = self
            .last_updated
            .map(|at| format_age(at, now))
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(out, "Last updated: {}", updated);

        if self.loading {
            let _ = writeln!(out, "Refreshing...");
        }

        if let Some(ref error) = self.last_error {
            match self.last_error_at {
                Some(at) => {
                    let _ = writeln!(out, "Error: {} ({})", error, format_timestamp(at));
                }
                None => {
                    let _ = writeln!(out, "Error: {}", error);
                }
            }
        }

        if self.auto_refresh {
            let _ = writeln!(out, "Auto-refresh: on (every {}s)", self.poll_interval.as_secs());
        } else {
            let _ = writeln!(out, "Auto-refresh: off");
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FlagError;
    use chrono::TimeZone;

    fn snapshot() -> FlagSnapshot {
        FlagSnapshot {
            flags: vec![
                FeatureFlag::new("beta", false),
                FeatureFlag::new("new-ui", true).with_description("Redesigned dashboard"),
            ],
            state: ServiceState::Ready,
            last_updated: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_counts() {
        let report = StatusReport::from_snapshot(&snapshot(), true, Duration::from_secs(30));
        assert_eq!(report.total, 2);
        assert_eq!(report.enabled, 1);
        assert_eq!(report.disabled, 1);
        assert!(report.last_error.is_none());
    }

    #[test]
    fn test_render_table() {
        let report = StatusReport::from_snapshot(&snapshot(), true, Duration::from_secs(30));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap();
        let text = report.render(now);

        assert!(text.starts_with("FLAG"));
        assert!(text.contains("new-ui"));
        assert!(text.contains("Redesigned dashboard"));
        assert!(text.contains("Total: 2  Enabled: 1  Disabled: 1"));
        assert!(text.contains("Last updated: 5m ago"));
        assert!(text.contains("Auto-refresh: on (every 30s)"));
        assert!(!text.contains("Error:"));
    }

    #[test]
    fn test_render_error_keeps_flag_list() {
        let mut snap = snapshot();
        snap.state = ServiceState::Errored;
        snap.error = Some(FlagError::Network("connection refused".to_string()));
        snap.error_at = Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 4, 0).unwrap());

        let report = StatusReport::from_snapshot(&snap, false, Duration::from_secs(30));
        let text = report.render(Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap());

        assert!(text.contains("new-ui"));
        assert!(text.contains("Error: Network error: connection refused (Mar 01, 2024 12:04:00 UTC)"));
        assert!(text.contains("Auto-refresh: off"));
    }

    #[test]
    fn test_render_empty() {
        let report = StatusReport::from_snapshot(&FlagSnapshot::default(), true, Duration::from_secs(30));
        let text = report.render(Utc::now());
        assert!(text.contains("No feature flags loaded"));
        assert!(text.contains("Last updated: never"));
    }
}
