//! REST client module for the feature flag authority.
//!
//! This module provides the `FlagFetcher` trait that the refresh service
//! depends on, and `FlagClient`, its reqwest implementation. Requests carry
//! a bearer token supplied by the host application's auth layer.

pub mod client;
pub mod error;
pub mod fetcher;

pub use client::FlagClient;
pub use error::FlagError;
pub use fetcher::FlagFetcher;
