use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::api::FlagError;

/// A single feature toggle. Identity is `name` (case-sensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlag {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeatureFlag {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: None,
            name: name.into(),
            enabled,
            description: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Result of a lookup that must tell "known and off" apart from "never heard of it".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagState {
    Enabled,
    Disabled,
    Unknown,
}

impl FlagState {
    /// Fail-closed collapse to a boolean.
    pub fn is_enabled(self) -> bool {
        matches!(self, FlagState::Enabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlagState::Enabled => "enabled",
            FlagState::Disabled => "disabled",
            FlagState::Unknown => "unknown",
        }
    }
}

impl From<Option<bool>> for FlagState {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => FlagState::Enabled,
            Some(false) => FlagState::Disabled,
            None => FlagState::Unknown,
        }
    }
}

/// `GET /feature-flags` envelope. `data` stays untyped so that one bad entry
/// can be rejected without failing the whole list.
#[derive(Debug, Deserialize)]
pub struct FlagListResponse {
    #[serde(default)]
    pub data: Option<Value>,
}

/// `GET /feature-flags/{name}` and `GET /feature-flags/{name}/user/{id}` envelope.
#[derive(Debug, Deserialize)]
pub struct EnabledResponse {
    pub data: EnabledData,
}

#[derive(Debug, Deserialize)]
pub struct EnabledData {
    pub enabled: bool,
}

/// `POST /feature-flags/check` envelope. Unrecognized names are omitted by the authority.
#[derive(Debug, Deserialize)]
pub struct CheckResponse {
    pub data: HashMap<String, bool>,
}

/// Turn a list envelope into records.
///
/// `data` that is absent, null or not an array is a protocol error. Entries
/// without a non-empty string `name` or with a non-boolean `enabled` are
/// dropped rather than coerced. Unparseable timestamps are treated as absent.
pub fn normalize_flag_list(response: FlagListResponse) -> Result<Vec<FeatureFlag>, FlagError> {
    let entries = match response.data {
        Some(Value::Array(entries)) => entries,
        Some(Value::Null) | None => {
            return Err(FlagError::Protocol("response is missing `data`".to_string()))
        }
        Some(other) => {
            return Err(FlagError::Protocol(format!(
                "expected `data` to be a list, got {}",
                value_kind(&other)
            )))
        }
    };

    let mut flags = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match normalize_entry(entry) {
            Some(flag) => flags.push(flag),
            None => warn!(index, entry = %entry, "Dropping malformed feature flag entry"),
        }
    }
    Ok(flags)
}

fn normalize_entry(entry: &Value) -> Option<FeatureFlag> {
    let obj = entry.as_object()?;
    let name = obj.get("name")?.as_str().filter(|n| !n.is_empty())?;
    let enabled = obj.get("enabled")?.as_bool()?;

    Some(FeatureFlag {
        id: obj.get("id").and_then(Value::as_i64),
        name: name.to_string(),
        enabled,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        created_at: obj.get("created_at").and_then(parse_timestamp),
        updated_at: obj.get("updated_at").and_then(parse_timestamp),
    })
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
