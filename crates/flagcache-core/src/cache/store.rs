use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::api::FlagError;
use crate::models::{FeatureFlag, FlagState};

/// Last known-good flags keyed by name, plus refresh bookkeeping.
///
/// A refresh attempt ends in exactly one of `replace_all` (success) or
/// `mark_error` (failure). A failure never touches the flag map.
#[derive(Debug, Default)]
pub struct FlagCache {
    flags: HashMap<String, FeatureFlag>,
    last_updated_at: Option<DateTime<Utc>>,
    last_error: Option<FlagError>,
    last_error_at: Option<DateTime<Utc>>,
}

impl FlagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FeatureFlag> {
        self.flags.get(name)
    }

    /// Snapshot copy of every cached flag, sorted by name.
    pub fn get_all(&self) -> Vec<FeatureFlag> {
        let mut all: Vec<FeatureFlag> = self.flags.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Fail-closed: unknown names and an unpopulated cache read as `false`.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.flags.get(name).map(|f| f.enabled).unwrap_or(false)
    }

    pub fn lookup(&self, name: &str) -> FlagState {
        FlagState::from(self.flags.get(name).map(|f| f.enabled))
    }

    /// Swap in the authority's full set. Names missing from `records` are removed.
    /// Clears any previous error.
    pub fn replace_all(&mut self, records: Vec<FeatureFlag>, fetched_at: DateTime<Utc>) {
        self.flags = records
            .into_iter()
            .map(|flag| (flag.name.clone(), flag))
            .collect();
        self.last_updated_at = Some(fetched_at);
        self.last_error = None;
        self.last_error_at = None;
    }

    /// Record a failed refresh, keeping the existing flags.
    pub fn mark_error(&mut self, err: FlagError, at: DateTime<Utc>) {
        self.last_error = Some(err);
        self.last_error_at = Some(at);
    }

    /// Set one flag's value from an ad-hoc check. Other entries, the refresh
    /// timestamp and the error state are left alone. Returns true if anything changed.
    pub fn update_one(&mut self, name: &str, enabled: bool) -> bool {
        match self.flags.get_mut(name) {
            Some(flag) if flag.enabled == enabled => false,
            Some(flag) => {
                flag.enabled = enabled;
                true
            }
            None => {
                self.flags
                    .insert(name.to_string(), FeatureFlag::new(name, enabled));
                true
            }
        }
    }

    /// True once any refresh has succeeded.
    pub fn is_populated(&self) -> bool {
        self.last_updated_at.is_some()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.flags.values().filter(|f| f.enabled).count()
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }

    pub fn last_error(&self) -> Option<&FlagError> {
        self.last_error.as_ref()
    }

    pub fn last_error_at(&self) -> Option<DateTime<Utc>> {
        self.last_error_at
    }
}

// ============================================================================
// Tests
// ============================================================================
