//! User, channel and custom emoji metadata cache.
//!
//! Lookups are cache-first with a single-item fetch on a miss. Entries past
//! their TTL count as misses. A failed fetch yields an `unknown` placeholder
//! that is never cached, so the next message from that user tries again.
//! Users and emoji can also be refreshed wholesale; a failed refresh leaves
//! the previous map in place.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use {
    secrecy::{ExposeSecret, Secret},
    serde::Serialize,
    tracing::{debug, info, warn},
    waigaya_common::{
        CachedChannel, CachedEmoji, CachedProfile, ChannelMeta, IdentitySnapshot, Profile,
        now_ms,
    },
};

#[cfg(feature = "metrics")]
use waigaya_metrics::{counter, gauge, identity as id_metrics};

use crate::{
    api::{RemoteApi, list_all_users},
    error::{ConnectionError, Result},
};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub user_ttl: Duration,
    pub channel_ttl: Duration,
    pub emoji_ttl: Duration,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            user_ttl: DAY * 7,
            channel_ttl: DAY * 30,
            emoji_ttl: DAY * 30,
        }
    }
}

/// Sizes of the caches, for status displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub users: usize,
    pub channels: usize,
    pub emojis: usize,
    /// Fetch time of the oldest cached user, if any.
    pub oldest_user_ms: Option<u64>,
}

type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;
type UserMap = HashMap<String, CachedProfile>;
type EmojiMap = HashMap<String, CachedEmoji>;

pub struct IdentityResolver {
    api: Arc<dyn RemoteApi>,
    settings: IdentitySettings,
    bot_token: RwLock<Option<Secret<String>>>,
    /// Replaced wholesale by a bulk refresh; single inserts copy on write.
    users: RwLock<Arc<UserMap>>,
    channels: RwLock<HashMap<String, CachedChannel>>,
    emojis: RwLock<Arc<EmojiMap>>,
    clock: Clock,
}

impl IdentityResolver {
    pub fn new(api: Arc<dyn RemoteApi>, settings: IdentitySettings) -> Self {
        Self {
            api,
            settings,
            bot_token: RwLock::new(None),
            users: RwLock::new(Arc::new(HashMap::new())),
            channels: RwLock::new(HashMap::new()),
            emojis: RwLock::new(Arc::new(HashMap::new())),
            clock: Arc::new(now_ms),
        }
    }

    /// Replace the wall clock, for TTL tests.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Token used for lookups. Without one every miss yields a placeholder.
    pub fn set_bot_token(&self, token: &Secret<String>) {
        let token = Secret::new(token.expose_secret().clone());
        *self.bot_token.write().unwrap_or_else(|e| e.into_inner()) = Some(token);
    }

    fn token(&self) -> Option<String> {
        self.bot_token
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.expose_secret().clone())
    }

    fn user_ttl_ms(&self) -> u64 {
        self.settings.user_ttl.as_millis() as u64
    }

    fn channel_ttl_ms(&self) -> u64 {
        self.settings.channel_ttl.as_millis() as u64
    }

    fn emoji_ttl_ms(&self) -> u64 {
        self.settings.emoji_ttl.as_millis() as u64
    }

    fn users(&self) -> Arc<UserMap> {
        Arc::clone(&self.users.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn emojis(&self) -> Arc<EmojiMap> {
        Arc::clone(&self.emojis.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Cached profile if present and fresh.
    pub fn cached_user(&self, user_id: &str) -> Option<Profile> {
        let now = (self.clock)();
        self.users()
            .get(user_id)
            .filter(|c| c.is_fresh(now, self.user_ttl_ms()))
            .map(|c| c.profile.clone())
    }

    pub async fn resolve_user(&self, user_id: &str) -> Profile {
        if let Some(profile) = self.cached_user(user_id) {
            #[cfg(feature = "metrics")]
            counter!(id_metrics::CACHE_HITS_TOTAL, "kind" => "user").increment(1);
            return profile;
        }
        #[cfg(feature = "metrics")]
        counter!(id_metrics::CACHE_MISSES_TOTAL, "kind" => "user").increment(1);

        match self.fetch_user(user_id).await {
            Ok(profile) => {
                let cached = CachedProfile {
                    profile: profile.clone(),
                    fetched_at_ms: (self.clock)(),
                };
                let mut guard = self.users.write().unwrap_or_else(|e| e.into_inner());
                Arc::make_mut(&mut *guard).insert(user_id.to_owned(), cached);
                #[cfg(feature = "metrics")]
                gauge!(id_metrics::USERS_CACHED).set(guard.len() as f64);
                profile
            },
            Err(e) => {
                warn!(user_id, error = %e, "user lookup failed, using placeholder");
                Profile::unknown(user_id)
            },
        }
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Profile> {
        let token = self
            .token()
            .ok_or_else(|| ConnectionError::transport("no bot token for user lookup"))?;
        let profile = self.api.user_info(&token, user_id).await?;
        debug!(user_id, "fetched user profile");
        Ok(profile)
    }

    pub async fn resolve_channel(&self, channel_id: &str) -> ChannelMeta {
        let now = (self.clock)();
        let hit = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel_id)
            .filter(|c| c.is_fresh(now, self.channel_ttl_ms()))
            .map(|c| c.meta.clone());
        if let Some(meta) = hit {
            #[cfg(feature = "metrics")]
            counter!(id_metrics::CACHE_HITS_TOTAL, "kind" => "channel").increment(1);
            return meta;
        }
        #[cfg(feature = "metrics")]
        counter!(id_metrics::CACHE_MISSES_TOTAL, "kind" => "channel").increment(1);

        let fetched = match self.token() {
            Some(token) => self.api.channel_info(&token, channel_id).await,
            None => Err(ConnectionError::transport("no bot token for channel lookup")),
        };
        match fetched {
            Ok(meta) => {
                self.remember_channels(std::iter::once(meta.clone()));
                meta
            },
            Err(e) => {
                warn!(channel_id, error = %e, "channel lookup failed, using placeholder");
                ChannelMeta::unknown(channel_id)
            },
        }
    }

    /// Record channel metadata obtained elsewhere (e.g. a directory listing).
    pub fn remember_channels(&self, metas: impl IntoIterator<Item = ChannelMeta>) {
        let fetched_at_ms = (self.clock)();
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        for meta in metas {
            channels.insert(meta.id.clone(), CachedChannel {
                meta,
                fetched_at_ms,
            });
        }
    }

    /// Page through the whole user directory and swap it in.
    ///
    /// The new map is built off to the side; on any failure the existing
    /// cache is left exactly as it was.
    pub async fn bulk_refresh_users(&self) -> Result<usize> {
        let token = self
            .token()
            .ok_or_else(|| ConnectionError::transport("no bot token for user refresh"))?;
        let profiles = list_all_users(self.api.as_ref(), &token).await?;

        let fetched_at_ms = (self.clock)();
        let fresh: UserMap = profiles
            .into_iter()
            .map(|profile| {
                (profile.id.clone(), CachedProfile {
                    profile,
                    fetched_at_ms,
                })
            })
            .collect();
        let count = fresh.len();
        *self.users.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);

        #[cfg(feature = "metrics")]
        gauge!(id_metrics::USERS_CACHED).set(count as f64);
        info!(users = count, "user directory refreshed");
        Ok(count)
    }

    /// Fetch the custom emoji directory and swap it in whole.
    pub async fn refresh_emoji(&self) -> Result<usize> {
        let token = self
            .token()
            .ok_or_else(|| ConnectionError::transport("no bot token for emoji refresh"))?;
        let emojis = self.api.list_emoji(&token).await?;

        let fetched_at_ms = (self.clock)();
        let fresh: EmojiMap = emojis
            .into_iter()
            .map(|emoji| {
                (emoji.name.clone(), CachedEmoji {
                    emoji,
                    fetched_at_ms,
                })
            })
            .collect();
        let count = fresh.len();
        *self.emojis.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);

        #[cfg(feature = "metrics")]
        gauge!(id_metrics::EMOJIS_CACHED).set(count as f64);
        info!(emojis = count, "custom emoji refreshed");
        Ok(count)
    }

    /// Image URL of a cached custom emoji, if present and fresh.
    pub fn emoji_url(&self, name: &str) -> Option<String> {
        let now = (self.clock)();
        self.emojis()
            .get(name)
            .filter(|c| c.is_fresh(now, self.emoji_ttl_ms()))
            .map(|c| c.emoji.url.clone())
    }

    /// Seed the caches from a persisted snapshot, dropping expired entries.
    /// Returns the sizes of what was kept.
    pub fn load_snapshot(&self, snapshot: IdentitySnapshot) -> CacheStatus {
        let now = (self.clock)();
        let users: UserMap = snapshot
            .users
            .into_iter()
            .filter(|c| c.is_fresh(now, self.user_ttl_ms()))
            .map(|c| (c.profile.id.clone(), c))
            .collect();
        let channels: HashMap<_, _> = snapshot
            .channels
            .into_iter()
            .filter(|c| c.is_fresh(now, self.channel_ttl_ms()))
            .map(|c| (c.meta.id.clone(), c))
            .collect();
        let emojis: EmojiMap = snapshot
            .emojis
            .into_iter()
            .filter(|c| c.is_fresh(now, self.emoji_ttl_ms()))
            .map(|c| (c.emoji.name.clone(), c))
            .collect();

        *self.users.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(users);
        *self.channels.write().unwrap_or_else(|e| e.into_inner()) = channels;
        *self.emojis.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(emojis);

        let status = self.cache_status();
        debug!(
            users = status.users,
            channels = status.channels,
            emojis = status.emojis,
            "identity snapshot loaded"
        );
        status
    }

    /// Copy of the caches, taken under the locks before anything iterates.
    pub fn snapshot(&self) -> IdentitySnapshot {
        let users = self.users();
        let emojis = self.emojis();
        let channels = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut snapshot = IdentitySnapshot {
            users: users.values().cloned().collect(),
            channels: channels.into_values().collect(),
            emojis: emojis.values().cloned().collect(),
        };
        snapshot.users.sort_by(|a, b| a.profile.id.cmp(&b.profile.id));
        snapshot.channels.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        snapshot.emojis.sort_by(|a, b| a.emoji.name.cmp(&b.emoji.name));
        snapshot
    }

    pub fn cache_status(&self) -> CacheStatus {
        let users = self.users();
        CacheStatus {
            users: users.len(),
            channels: self.channels.read().unwrap_or_else(|e| e.into_inner()).len(),
            emojis: self.emojis().len(),
            oldest_user_ms: users.values().map(|c| c.fetched_at_ms).min(),
        }
    }

    pub fn clear(&self) {
        *self.users.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(HashMap::new());
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.emojis.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(HashMap::new());
    }
}
