use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    waigaya_common::Credentials,
};

use crate::{Result, watchlist::WatchedChannel};

/// What the core hands to (and gets back from) persistence.
///
/// The on-disk shape is entirely up to the [`ConfigStore`] implementation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredConfig {
    pub credentials: Credentials,
    pub watched: Vec<WatchedChannel>,
}

/// Persistent storage for credentials and the watch list.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when nothing has been saved yet.
    async fn load(&self) -> Result<Option<StoredConfig>>;
    async fn save(&self, config: &StoredConfig) -> Result<()>;
}
