//! Domain types shared by the ingestion, identity, and display crates.

use std::time::{SystemTime, UNIX_EPOCH};

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::error::Coded;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ── Credentials ─────────────────────────────────────────────────────────────

/// Bot + app-level token pair for one session.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Bot user OAuth token (`xoxb-…`), used for Web API calls.
    #[serde(serialize_with = "serialize_secret")]
    pub bot_token: Secret<String>,
    /// App-level token (`xapp-…`), used to open the Socket Mode stream.
    #[serde(serialize_with = "serialize_secret")]
    pub app_token: Secret<String>,
}

impl Credentials {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> Self {
        Self {
            bot_token: Secret::new(bot_token.into()),
            app_token: Secret::new(app_token.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bot_token.expose_secret().is_empty() && self.app_token.expose_secret().is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bot_token", &"[REDACTED]")
            .field("app_token", &"[REDACTED]")
            .finish()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

// ── Identity ────────────────────────────────────────────────────────────────

/// A workspace member as far as display needs to know.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub is_bot: bool,
}

impl Profile {
    /// Placeholder returned when a lookup fails. Never cached.
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "unknown".into(),
            ..Default::default()
        }
    }

    /// Name shown as the author of a message: real name, then handle, then id.
    pub fn author_label(&self) -> &str {
        non_empty(self.real_name.as_deref())
            .or_else(|| non_empty(Some(&self.name)))
            .unwrap_or(&self.id)
    }

    /// Name used when rewriting `<@U…>` mentions: display name first.
    pub fn mention_label(&self) -> &str {
        non_empty(self.display_name.as_deref()).unwrap_or_else(|| self.author_label())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

/// Channel metadata returned by the directory and cached by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_private: bool,
    /// `None` when the API did not say (e.g. placeholder entries).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_member: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_count: Option<u32>,
}

impl ChannelMeta {
    pub fn unknown(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: "unknown".into(),
            ..Default::default()
        }
    }
}

/// A cached profile together with when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProfile {
    pub profile: Profile,
    pub fetched_at_ms: u64,
}

/// A cached channel together with when it was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedChannel {
    pub meta: ChannelMeta,
    pub fetched_at_ms: u64,
}

/// A workspace custom emoji backed by an image. Aliases are not kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmoji {
    pub name: String,
    pub url: String,
}

/// A cached custom emoji together with when the directory was fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEmoji {
    pub emoji: CustomEmoji,
    pub fetched_at_ms: u64,
}

/// True when an entry fetched at `fetched_at_ms` is still younger than `ttl_ms`.
pub fn is_fresh(fetched_at_ms: u64, now_ms: u64, ttl_ms: u64) -> bool {
    now_ms.saturating_sub(fetched_at_ms) < ttl_ms
}

impl CachedProfile {
    pub fn is_fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        is_fresh(self.fetched_at_ms, now_ms, ttl_ms)
    }
}

impl CachedChannel {
    pub fn is_fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        is_fresh(self.fetched_at_ms, now_ms, ttl_ms)
    }
}

impl CachedEmoji {
    pub fn is_fresh(&self, now_ms: u64, ttl_ms: u64) -> bool {
        is_fresh(self.fetched_at_ms, now_ms, ttl_ms)
    }
}

/// Point-in-time copy of the identity cache, used for local persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySnapshot {
    pub users: Vec<CachedProfile>,
    pub channels: Vec<CachedChannel>,
    pub emojis: Vec<CachedEmoji>,
}

// ── Messages ────────────────────────────────────────────────────────────────

/// A chat message ready for display. Built once by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub text: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_icon: Option<String>,
    pub user_id: String,
    pub channel_id: String,
    /// Platform timestamp of the source message (Slack `ts`).
    pub source_ts: String,
}

// ── Structured results ──────────────────────────────────────────────────────

/// Machine-readable failure code carried by every [`ActionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    CredentialFormat,
    Authentication,
    Permission,
    TransportTimeout,
    Transport,
    Data,
    AlreadyWatched,
    NotWatched,
    NotMember,
    Storage,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CredentialFormat => "credential_format",
            Self::Authentication => "authentication",
            Self::Permission => "permission",
            Self::TransportTimeout => "transport_timeout",
            Self::Transport => "transport",
            Self::Data => "data",
            Self::AlreadyWatched => "already_watched",
            Self::NotWatched => "not_watched",
            Self::NotMember => "not_member",
            Self::Storage => "storage",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{success, code, message}` value returned to callers instead of raw errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: None,
            message: Some(message.into()),
        }
    }

    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            message: Some(message.into()),
        }
    }

    pub fn from_error(err: &impl Coded) -> Self {
        Self::failure(err.code(), err.to_string())
    }

    /// Collapse a `Result` into an `ActionResult`, describing success with `describe`.
    pub fn from_result<T, E: Coded>(
        result: &Result<T, E>,
        describe: impl FnOnce(&T) -> String,
    ) -> Self {
        match result {
            Ok(value) => Self::ok(describe(value)),
            Err(e) => Self::from_error(e),
        }
    }
}
