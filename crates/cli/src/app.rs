//! Wiring shared by every subcommand: config, API client, caches, stores.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Result,
    tracing::{debug, info, warn},
    waigaya_channels::Watchlist,
    waigaya_common::Credentials,
    waigaya_config::{
        ConfigPaths, DisplayPolicy, FileConfigStore, SnapshotFile, WaigayaConfig,
        discover_and_load,
    },
    waigaya_display::{DisplaySettings, QueuePolicy},
    waigaya_metrics::{MetricsHandle, MetricsRecorderConfig, init_metrics},
    waigaya_slack::{
        ChannelDirectory, ConnectionSettings, IdentityResolver, IdentitySettings, RemoteApi,
        SlackWebApi,
    },
};

const DAY_SECS: u64 = 24 * 60 * 60;

/// A TTL of `n` days; absurd values clamp instead of overflowing.
fn days(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(DAY_SECS))
}

pub struct App {
    pub paths: ConfigPaths,
    pub config: WaigayaConfig,
    pub credentials: Credentials,
    pub api: Arc<dyn RemoteApi>,
    pub watchlist: Watchlist,
    pub identity: Arc<IdentityResolver>,
    pub directory: ChannelDirectory,
    pub metrics: MetricsHandle,
    snapshot: SnapshotFile,
}

impl App {
    pub fn load(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let paths = ConfigPaths::resolve(config_dir, data_dir)?;
        let config = discover_and_load(&paths);
        debug!(config_dir = %paths.config_dir.display(), data_dir = %paths.data_dir.display(), "paths resolved");

        let metrics = init_metrics(MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: config
                .metrics
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })?;

        let credentials = config.slack.credentials();
        let api: Arc<dyn RemoteApi> = Arc::new(SlackWebApi::new()?);
        let watchlist = Watchlist::from_channels(config.slack.watched.iter().cloned());

        let identity = Arc::new(IdentityResolver::new(api.clone(), IdentitySettings {
            user_ttl: days(config.identity.user_ttl_days),
            channel_ttl: days(config.identity.channel_ttl_days),
            emoji_ttl: days(config.identity.emoji_ttl_days),
        }));
        identity.set_bot_token(&credentials.bot_token);

        let store = Arc::new(FileConfigStore::new(paths.config_file()));
        let directory =
            ChannelDirectory::new(api.clone(), identity.clone(), watchlist.clone(), store);
        directory.set_credentials(credentials.clone());

        let snapshot = SnapshotFile::new(paths.identity_snapshot());

        Ok(Self {
            paths,
            config,
            credentials,
            api,
            watchlist,
            identity,
            directory,
            metrics,
            snapshot,
        })
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        let c = &self.config.connection;
        ConnectionSettings {
            connect_timeout: Duration::from_secs(c.connect_timeout_secs),
            test_timeout: Duration::from_secs(c.test_timeout_secs),
            event_buffer: c.event_buffer,
        }
    }

    pub fn display_settings(&self) -> DisplaySettings {
        let d = &self.config.display;
        DisplaySettings {
            display_ms: d.display_ms,
            fade_ms: d.fade_ms,
            max_items: d.max_items,
            policy: match d.policy {
                DisplayPolicy::JumpToLatest => QueuePolicy::JumpToLatest,
                DisplayPolicy::Sequential => QueuePolicy::Sequential,
            },
        }
    }

    /// Load the identity snapshot from the data dir, dropping stale entries.
    pub async fn restore_identity(&self) {
        if !self.config.identity.persist {
            return;
        }
        match self.snapshot.load().await {
            Ok(Some(snapshot)) => {
                let kept = self.identity.load_snapshot(snapshot);
                info!(
                    users = kept.users,
                    channels = kept.channels,
                    emojis = kept.emojis,
                    "identity cache restored"
                );
            },
            Ok(None) => debug!("no identity snapshot yet"),
            Err(e) => warn!(error = %e, "could not read identity snapshot"),
        }
    }

    pub async fn persist_identity(&self) {
        if !self.config.identity.persist {
            return;
        }
        let snapshot = self.identity.snapshot();
        match self.snapshot.save(&snapshot).await {
            Ok(()) => debug!(
                users = snapshot.users.len(),
                channels = snapshot.channels.len(),
                emojis = snapshot.emojis.len(),
                "identity snapshot saved"
            ),
            Err(e) => warn!(error = %e, "could not save identity snapshot"),
        }
    }

    /// Write the Prometheus text rendering next to the identity snapshot.
    pub async fn dump_metrics(&self) {
        let rendered = self.metrics.render();
        if rendered.is_empty() {
            return;
        }
        let path = self.paths.data_dir.join("metrics.prom");
        if let Err(e) = tokio::fs::write(&path, rendered).await {
            warn!(path = %path.display(), error = %e, "could not write metrics");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_days_saturate() {
        assert_eq!(days(7), Duration::from_secs(7 * DAY_SECS));
        assert_eq!(days(u64::MAX), Duration::from_secs(u64::MAX));
    }
}
