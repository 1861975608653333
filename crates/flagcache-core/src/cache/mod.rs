//! In-memory flag cache.
//!
//! `FlagCache` holds the last known-good flag set plus the outcome of the
//! most recent refresh. It lives only as long as the owning `FlagService`;
//! nothing is written to disk.

pub mod store;

pub use store::FlagCache;
