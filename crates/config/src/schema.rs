//! Config schema: Slack credentials and watch list, display timing, identity
//! cache lifetimes, connection budgets and metrics.

use std::collections::HashMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    waigaya_channels::{StoredConfig, WatchedChannel},
    waigaya_common::Credentials,
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaigayaConfig {
    pub slack: SlackConfig,
    pub display: DisplayConfig,
    pub identity: IdentityConfig,
    pub connection: ConnectionConfig,
    pub metrics: MetricsConfig,
}

impl WaigayaConfig {
    /// The part of the config the core persists through `ConfigStore`.
    pub fn stored(&self) -> StoredConfig {
        StoredConfig {
            credentials: self.slack.credentials(),
            watched: self.slack.watched.clone(),
        }
    }

    /// Overwrite the persisted part, leaving tuning sections alone.
    pub fn apply_stored(&mut self, stored: &StoredConfig) {
        self.slack.set_credentials(&stored.credentials);
        self.slack.watched = stored.watched.clone();
    }
}

/// Slack workspace access.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Bot user OAuth token (`xoxb-…`).
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub bot_token: Option<Secret<String>>,
    /// App-level token (`xapp-…`) with `connections:write`.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_token: Option<Secret<String>>,
    /// Channels relayed to the display.
    pub watched: Vec<WatchedChannel>,
}

impl SlackConfig {
    pub fn credentials(&self) -> Credentials {
        let expose = |s: &Option<Secret<String>>| {
            s.as_ref()
                .map(|s| s.expose_secret().clone())
                .unwrap_or_default()
        };
        Credentials::new(expose(&self.bot_token), expose(&self.app_token))
    }

    pub fn set_credentials(&mut self, credentials: &Credentials) {
        let keep = |s: &Secret<String>| {
            let raw = s.expose_secret();
            (!raw.is_empty()).then(|| Secret::new(raw.clone()))
        };
        self.bot_token = keep(&credentials.bot_token);
        self.app_token = keep(&credentials.app_token);
    }
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "[REDACTED]"))
            .field("app_token", &self.app_token.as_ref().map(|_| "[REDACTED]"))
            .field("watched", &self.watched)
            .finish()
    }
}

/// How the display queue treats a backlog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayPolicy {
    /// A new arrival pre-empts whatever is on screen.
    #[default]
    JumpToLatest,
    /// Items are shown in arrival order, each for its full duration.
    Sequential,
}

/// Display queue timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub display_ms: u64,
    pub fade_ms: u64,
    /// Oldest items are evicted beyond this many.
    pub max_items: usize,
    pub policy: DisplayPolicy,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display_ms: 3_000,
            fade_ms: 500,
            max_items: 50,
            policy: DisplayPolicy::default(),
        }
    }
}

/// Identity cache lifetimes and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub user_ttl_days: u64,
    pub channel_ttl_days: u64,
    pub emoji_ttl_days: u64,
    /// Write the cache to the data directory on shutdown and reload it on start.
    pub persist: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_ttl_days: 7,
            channel_ttl_days: 30,
            emoji_ttl_days: 30,
            persist: true,
        }
    }
}

/// Connection budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Opening the stream plus the ready handshake must finish within this.
    pub connect_timeout_secs: u64,
    /// Budget for the credential round-trip.
    pub test_timeout_secs: u64,
    /// Events buffered between the stream reader and the pipeline.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            test_timeout_secs: 10,
            event_buffer: 256,
        }
    }
}

/// Metrics and observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    pub enabled: bool,
    /// Additional labels to add to all metrics.
    pub labels: HashMap<String, String>,
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg: WaigayaConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.display.display_ms, 3_000);
        assert_eq!(cfg.display.fade_ms, 500);
        assert_eq!(cfg.display.max_items, 50);
        assert_eq!(cfg.display.policy, DisplayPolicy::JumpToLatest);
        assert_eq!(cfg.identity.user_ttl_days, 7);
        assert_eq!(cfg.identity.channel_ttl_days, 30);
        assert_eq!(cfg.identity.emoji_ttl_days, 30);
        assert_eq!(cfg.connection.connect_timeout_secs, 30);
        assert!(cfg.slack.bot_token.is_none());
    }

    #[test]
    fn stored_round_trips_through_slack_section() {
        let mut cfg = WaigayaConfig::default();
        cfg.apply_stored(&StoredConfig {
            credentials: Credentials::new("xoxb-1", ""),
            watched: vec![WatchedChannel::new("C1", "general")],
        });
        assert!(cfg.slack.app_token.is_none());

        let stored = cfg.stored();
        assert_eq!(stored.credentials.bot_token.expose_secret(), "xoxb-1");
        assert_eq!(stored.watched, [WatchedChannel::new("C1", "general")]);
    }

    #[test]
    fn debug_hides_tokens() {
        let mut slack = SlackConfig::default();
        slack.set_credentials(&Credentials::new("xoxb-hidden", "xapp-hidden"));
        assert!(!format!("{slack:?}").contains("hidden"));
    }

    #[test]
    fn policy_parses_snake_case() {
        let cfg: WaigayaConfig = toml::from_str("[display]\npolicy = \"sequential\"\n").unwrap();
        assert_eq!(cfg.display.policy, DisplayPolicy::Sequential);
    }
}
