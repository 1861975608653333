//! Data models for feature flags.
//!
//! - `FeatureFlag`: one named toggle as last reported by the authority
//! - `FlagState`: tri-state lookup result separating "unknown" from "disabled"
//! - Wire types for the authority's `{ "data": ... }` envelopes

pub mod flag;

pub use flag::{
    normalize_flag_list, CheckResponse, EnabledResponse, FeatureFlag, FlagListResponse, FlagState,
};
