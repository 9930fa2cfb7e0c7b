//! Slack Web API client over slack-morphism.
//!
//! Every call opens a short-lived session on the shared [`SlackClient`] with
//! the token it was handed. Slack error codes are mapped onto
//! [`ConnectionError`] here; the Socket Mode stream itself is ours (see
//! [`crate::socket`]).

use std::{future::Future, time::Duration};

use {
    async_trait::async_trait,
    slack_morphism::{errors::SlackClientError, prelude::*},
    tracing::debug,
    waigaya_common::{ChannelMeta, CustomEmoji, Profile},
};

use crate::{
    api::{AuthIdentity, EventStream, Page, RemoteApi},
    error::{ConnectionError, Result},
    socket::SocketModeStream,
};

/// The connector used in production: hyper over rustls.
pub type HttpsConnector = SlackClientHyperConnector<SlackHyperHttpsConnector>;

/// Upper bound on a single Web API round-trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SlackWebApi<C = HttpsConnector>
where
    C: SlackClientHttpConnector + Send + Sync,
{
    client: SlackClient<C>,
}

impl SlackWebApi {
    pub fn new() -> Result<Self> {
        let connector = SlackClientHyperConnector::new().map_err(ConnectionError::transport)?;
        Ok(Self::with_connector(connector))
    }
}

impl<C> SlackWebApi<C>
where
    C: SlackClientHttpConnector + Send + Sync,
{
    /// Build on a specific connector (tests point one at a local server).
    pub fn with_connector(connector: C) -> Self {
        Self {
            client: SlackClient::new(connector),
        }
    }
}

fn api_token(token: &str) -> SlackApiToken {
    SlackApiToken::new(token.to_owned().into())
}

/// Run one Web API call under the request timeout and classify its failure.
async fn guarded<T>(
    method: &str,
    call: impl Future<Output = std::result::Result<T, SlackClientError>>,
) -> Result<T> {
    match tokio::time::timeout(REQUEST_TIMEOUT, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(classify(method, err)),
        Err(_) => Err(ConnectionError::transport(format!(
            "{method} timed out after {}s",
            REQUEST_TIMEOUT.as_secs()
        ))),
    }
}

fn classify(method: &str, err: SlackClientError) -> ConnectionError {
    match err {
        SlackClientError::ApiError(api) => {
            let needed = api.http_response_body.as_deref().and_then(needed_scope);
            debug!(method, code = %api.code, ?needed, "slack api call failed");
            ConnectionError::from_api(&api.code, needed)
        },
        SlackClientError::ProtocolError(e) => {
            ConnectionError::data(format!("{method} response: {e}"))
        },
        other => ConnectionError::transport(format!("{method}: {other}")),
    }
}

/// The `needed` scope Slack attaches to `missing_scope` errors.
fn needed_scope(body: &str) -> Option<String> {
    let body: serde_json::Value = serde_json::from_str(body).ok()?;
    body.get("needed")?.as_str().map(str::to_owned)
}

fn non_empty(s: Option<&String>) -> Option<String> {
    s.filter(|s| !s.is_empty()).cloned()
}

fn next_cursor(meta: Option<SlackResponseMetadata>) -> Option<String> {
    meta.and_then(|m| m.next_cursor)
        .map(|c| c.to_string())
        .filter(|c| !c.is_empty())
}

fn cursor_id(cursor: Option<&str>) -> Option<SlackCursorId> {
    cursor.map(|c| SlackCursorId::new(c.to_owned()))
}

fn channel_meta(info: SlackChannelInfo) -> ChannelMeta {
    let id = info.id.to_string();
    ChannelMeta {
        name: non_empty(info.name.as_ref()).unwrap_or_else(|| id.clone()),
        id,
        is_private: info.flags.is_private.unwrap_or(false),
        is_member: info.flags.is_member,
        member_count: info.num_members.and_then(|n| u32::try_from(n).ok()),
    }
}

/// Avatar URL: the 72px rendition, then 48px.
fn icon_url(resolutions: &[(u32, String)]) -> Option<String> {
    [72, 48].into_iter().find_map(|size| {
        resolutions
            .iter()
            .find(|(px, url)| *px == size && !url.is_empty())
            .map(|(_, url)| url.clone())
    })
}

fn profile(user: SlackUser) -> Profile {
    let details = user.profile.as_ref();
    Profile {
        id: user.id.to_string(),
        name: user.name.clone().unwrap_or_default(),
        real_name: non_empty(details.and_then(|p| p.real_name.as_ref())),
        display_name: non_empty(details.and_then(|p| p.display_name.as_ref())),
        icon_url: details
            .and_then(|p| p.icon.as_ref())
            .and_then(|icon| icon.images.as_ref())
            .and_then(|images| icon_url(&images.resolutions)),
        is_bot: user.flags.is_bot.unwrap_or(false),
    }
}

#[async_trait]
impl<C> RemoteApi for SlackWebApi<C>
where
    C: SlackClientHttpConnector + Send + Sync + 'static,
{
    async fn test_auth(&self, bot_token: &str) -> Result<AuthIdentity> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let auth = guarded("auth.test", session.auth_test()).await?;
        Ok(AuthIdentity {
            user_id: auth.user_id.to_string(),
            user: auth.user.unwrap_or_default(),
            team: Some(auth.team),
            team_id: Some(auth.team_id.to_string()),
            bot_id: auth.bot_id.map(|id| id.to_string()),
        })
    }

    async fn list_channels_page(
        &self,
        bot_token: &str,
        cursor: Option<&str>,
    ) -> Result<Page<ChannelMeta>> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let request = SlackApiConversationsListRequest::new()
            .with_exclude_archived(true)
            .with_limit(200)
            .with_types(vec![
                SlackConversationType::Public,
                SlackConversationType::Private,
            ])
            .opt_cursor(cursor_id(cursor));
        let response = guarded("conversations.list", session.conversations_list(&request)).await?;
        Ok(Page {
            items: response.channels.into_iter().map(channel_meta).collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn list_users_page(
        &self,
        bot_token: &str,
        cursor: Option<&str>,
    ) -> Result<Page<Profile>> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let request = SlackApiUsersListRequest::new()
            .with_limit(200)
            .opt_cursor(cursor_id(cursor));
        let response = guarded("users.list", session.users_list(&request)).await?;
        Ok(Page {
            items: response.members.into_iter().map(profile).collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn user_info(&self, bot_token: &str, user_id: &str) -> Result<Profile> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let request = SlackApiUsersInfoRequest::new(SlackUserId::new(user_id.to_owned()));
        let response = guarded("users.info", session.users_info(&request)).await?;
        Ok(profile(response.user))
    }

    async fn channel_info(&self, bot_token: &str, channel_id: &str) -> Result<ChannelMeta> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let request =
            SlackApiConversationsInfoRequest::new(SlackChannelId::new(channel_id.to_owned()));
        let response = guarded("conversations.info", session.conversations_info(&request)).await?;
        Ok(channel_meta(response.channel))
    }

    async fn list_emoji(&self, bot_token: &str) -> Result<Vec<CustomEmoji>> {
        let token = api_token(bot_token);
        let session = self.client.open_session(&token);
        let response = guarded("emoji.list", session.emoji_list()).await?;
        let mut emojis: Vec<CustomEmoji> = response
            .emoji
            .into_iter()
            .filter_map(|(name, target)| match target {
                SlackEmojiRef::Url(url) => Some(CustomEmoji {
                    name: name.to_string(),
                    url: url.to_string(),
                }),
                SlackEmojiRef::Alias(_) => None,
            })
            .collect();
        emojis.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(emojis)
    }

    async fn open_event_stream(&self, app_token: &str) -> Result<Box<dyn EventStream>> {
        let token = api_token(app_token);
        let session = self.client.open_session(&token);
        let request = SlackApiAppsConnectionOpenRequest::new();
        let response = guarded(
            "apps.connections.open",
            session.apps_connections_open(&request),
        )
        .await?;
        debug!("socket mode url issued");
        let stream = SocketModeStream::connect(&response.url.0.to_string()).await?;
        Ok(Box::new(stream))
    }
}
