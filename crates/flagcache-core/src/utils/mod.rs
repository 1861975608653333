//! Display helpers shared by the monitor and the CLI.

pub mod format;

pub use format::{format_age, format_timestamp, truncate_string};
