//! The seam between the core and Slack.
//!
//! [`RemoteApi`] covers the Web API calls the core makes and opening the
//! Socket Mode stream. Production code uses [`SlackWebApi`](crate::SlackWebApi);
//! tests substitute scripted fakes.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    waigaya_common::{ChannelMeta, CustomEmoji, Profile},
};

use crate::{
    error::{ConnectionError, Result},
    event::InboundEvent,
};

/// Who the bot token belongs to, as reported by `auth.test`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub user: String,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    /// Present for bot tokens. Messages carrying this id are our own.
    #[serde(default)]
    pub bot_id: Option<String>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` (or empty) when this was the last page.
    pub next_cursor: Option<String>,
}

/// What an open stream yields.
#[derive(Debug)]
pub enum StreamEvent {
    /// The app token was accepted and the socket is open.
    Authenticated,
    /// Slack's `hello`: the stream is ready to deliver events.
    Ready { num_connections: Option<u32> },
    Event(InboundEvent),
    /// A failure the stream cannot recover from.
    Error(ConnectionError),
    /// The remote closed the stream (`disconnect` envelope or close frame).
    Close { reason: String },
}

/// A live event stream. Dropping it releases the socket.
#[async_trait]
pub trait EventStream: Send {
    /// Next event, or `None` once the stream is finished.
    async fn next_event(&mut self) -> Option<StreamEvent>;

    /// Close the socket. Idempotent.
    async fn close(&mut self);
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// `auth.test` with the bot token.
    async fn test_auth(&self, bot_token: &str) -> Result<AuthIdentity>;

    /// One page of `conversations.list` (public and private, unarchived).
    async fn list_channels_page(
        &self,
        bot_token: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ChannelMeta>>;

    /// One page of `users.list`.
    async fn list_users_page(&self, bot_token: &str, cursor: Option<&str>)
    -> Result<Page<Profile>>;

    /// `users.info` for a single user.
    async fn user_info(&self, bot_token: &str, user_id: &str) -> Result<Profile>;

    /// `conversations.info` for a single channel.
    async fn channel_info(&self, bot_token: &str, channel_id: &str) -> Result<ChannelMeta>;

    /// `emoji.list`: the workspace's image-backed custom emoji.
    async fn list_emoji(&self, bot_token: &str) -> Result<Vec<CustomEmoji>>;

    /// Open a Socket Mode stream with the app token.
    async fn open_event_stream(&self, app_token: &str) -> Result<Box<dyn EventStream>>;
}

/// Every channel visible to the bot, following cursors to the end.
pub async fn list_all_channels(api: &dyn RemoteApi, bot_token: &str) -> Result<Vec<ChannelMeta>> {
    collect_pages(|cursor| async move {
        api.list_channels_page(bot_token, cursor.as_deref()).await
    })
    .await
}

/// Every workspace member, following cursors to the end.
pub async fn list_all_users(api: &dyn RemoteApi, bot_token: &str) -> Result<Vec<Profile>> {
    collect_pages(|cursor| async move { api.list_users_page(bot_token, cursor.as_deref()).await })
        .await
}

/// Follow `next_cursor` until it comes back empty. A cursor seen twice is
/// treated as a broken listing rather than looped on.
async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut seen_cursors: Vec<String> = Vec::new();

    loop {
        let page = fetch(seen_cursors.last().cloned()).await?;
        items.extend(page.items);

        match page.next_cursor.filter(|c| !c.is_empty()) {
            None => return Ok(items),
            Some(next) if seen_cursors.contains(&next) => {
                return Err(ConnectionError::data(format!(
                    "pagination cursor `{next}` repeated"
                )));
            },
            Some(next) => seen_cursors.push(next),
        }
    }
}
