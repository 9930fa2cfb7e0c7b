//! Channel listing and the user-facing watch-list actions.

use std::sync::{Arc, RwLock};

use {
    secrecy::ExposeSecret,
    tracing::{info, warn},
    waigaya_channels::{ConfigStore, StoredConfig, WatchedChannel, Watchlist},
    waigaya_common::{ActionResult, ChannelMeta, Coded, Credentials, ErrorCode},
};

use crate::{
    api::{RemoteApi, list_all_channels},
    error::ConnectionError,
    identity::IdentityResolver,
};

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Invalid(waigaya_channels::Error),

    #[error("#{name} is already watched")]
    AlreadyWatched { name: String },

    #[error("channel {id} is not watched")]
    NotWatched { id: String },

    #[error("the bot is not a member of #{name}; invite it first")]
    NotMember { name: String },

    #[error(transparent)]
    Remote(#[from] ConnectionError),

    #[error("could not save the watch list: {0}")]
    Storage(#[from] waigaya_channels::Error),
}

impl Coded for WatchError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Invalid(e) => e.code(),
            Self::AlreadyWatched { .. } => ErrorCode::AlreadyWatched,
            Self::NotWatched { .. } => ErrorCode::NotWatched,
            Self::NotMember { .. } => ErrorCode::NotMember,
            Self::Remote(e) => e.code(),
            Self::Storage(_) => ErrorCode::Storage,
        }
    }
}

pub struct ChannelDirectory {
    api: Arc<dyn RemoteApi>,
    identity: Arc<IdentityResolver>,
    watchlist: Watchlist,
    store: Arc<dyn ConfigStore>,
    credentials: RwLock<Credentials>,
}

impl ChannelDirectory {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        identity: Arc<IdentityResolver>,
        watchlist: Watchlist,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            api,
            identity,
            watchlist,
            store,
            credentials: RwLock::new(Credentials::default()),
        }
    }

    /// Credentials used for listing and written alongside the watch list.
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.write().unwrap_or_else(|e| e.into_inner()) = credentials;
    }

    fn credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn bot_token(&self) -> String {
        self.credentials().bot_token.expose_secret().clone()
    }

    pub fn watched(&self) -> Vec<WatchedChannel> {
        self.watchlist.snapshot()
    }

    /// Every public and private channel visible to the bot, archived ones
    /// excluded, sorted by name.
    pub async fn list_channels(&self) -> Result<Vec<ChannelMeta>, ConnectionError> {
        let mut channels = list_all_channels(self.api.as_ref(), &self.bot_token()).await?;
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        self.identity.remember_channels(channels.iter().cloned());
        info!(count = channels.len(), "channel list fetched");
        Ok(channels)
    }

    pub async fn add_watch(&self, channel_id: &str) -> ActionResult {
        let result = self.try_add_watch(channel_id).await;
        ActionResult::from_result(&result, |c| format!("watching #{}", c.name))
    }

    pub async fn remove_watch(&self, channel_id: &str) -> ActionResult {
        let result = self.try_remove_watch(channel_id).await;
        ActionResult::from_result(&result, |c| format!("stopped watching #{}", c.name))
    }

    /// Add a channel the bot belongs to, then persist the watch list.
    pub async fn try_add_watch(&self, channel_id: &str) -> Result<WatchedChannel, WatchError> {
        let channel_id = WatchedChannel::parse_id(channel_id).map_err(WatchError::Invalid)?;
        if let Some(existing) = self.watchlist.get(channel_id) {
            return Err(WatchError::AlreadyWatched {
                name: existing.name,
            });
        }

        let meta = self.api.channel_info(&self.bot_token(), channel_id).await?;
        if meta.is_member == Some(false) {
            return Err(WatchError::NotMember { name: meta.name });
        }
        self.identity.remember_channels([meta.clone()]);

        let channel = WatchedChannel::new(meta.id, meta.name);
        if !self.watchlist.insert(channel.clone()) {
            return Err(WatchError::AlreadyWatched { name: channel.name });
        }
        if let Err(e) = self.persist().await {
            self.watchlist.remove(&channel.id);
            return Err(e.into());
        }
        info!(channel_id = %channel.id, name = %channel.name, "channel watched");
        Ok(channel)
    }

    pub async fn try_remove_watch(&self, channel_id: &str) -> Result<WatchedChannel, WatchError> {
        let Some(removed) = self.watchlist.remove(channel_id) else {
            return Err(WatchError::NotWatched {
                id: channel_id.to_owned(),
            });
        };
        if let Err(e) = self.persist().await {
            self.watchlist.insert(removed);
            return Err(e.into());
        }
        info!(channel_id = %removed.id, name = %removed.name, "channel unwatched");
        Ok(removed)
    }

    async fn persist(&self) -> waigaya_channels::Result<()> {
        let config = StoredConfig {
            credentials: self.credentials(),
            watched: self.watchlist.snapshot(),
        };
        self.store.save(&config).await.inspect_err(|e| {
            warn!(error = %e, "failed to persist watch list");
        })
    }
}
