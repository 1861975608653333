use std::collections::HashMap;

use async_trait::async_trait;

use super::FlagError;
use crate::models::FeatureFlag;

/// One remote round-trip per call. Implementations do no caching and no retries.
#[async_trait]
pub trait FlagFetcher: Send + Sync {
    /// Full flag set known to the authority.
    async fn fetch_all(&self) -> Result<Vec<FeatureFlag>, FlagError>;

    /// Only the requested names. Names the authority does not recognize are
    /// absent from the returned map.
    async fn fetch_named(&self, names: &[String]) -> Result<HashMap<String, bool>, FlagError>;

    /// A single flag; `FlagError::UnknownFlag` if the authority has no such flag.
    async fn fetch_one(&self, name: &str) -> Result<bool, FlagError>;

    /// A single flag evaluated for `user_id`. Rollout and overrides are decided remotely.
    async fn fetch_for_user(&self, name: &str, user_id: &str) -> Result<bool, FlagError>;
}
