//! File-backed persistence for credentials, the watch list and the identity
//! cache snapshot.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    tokio::fs,
    tracing::{debug, warn},
    waigaya_channels::{ConfigStore, StoredConfig},
    waigaya_common::IdentitySnapshot,
};

use crate::{
    error::{Error, Result},
    loader::{load_config, save_config},
    schema::WaigayaConfig,
};

/// Persists the `[slack]` section of the config file.
///
/// Saving re-reads the file so that hand-edited tuning sections survive.
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> waigaya_channels::Result<Option<StoredConfig>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(None);
        }
        let path = self.path.clone();
        let config = run_blocking(move || load_config(&path)).await?;
        Ok(Some(config.stored()))
    }

    async fn save(&self, stored: &StoredConfig) -> waigaya_channels::Result<()> {
        let path = self.path.clone();
        let stored = stored.clone();
        run_blocking(move || {
            let mut config = if path.exists() {
                load_config(&path)?
            } else {
                WaigayaConfig::default()
            };
            config.apply_stored(&stored);
            save_config(&config, &path)
        })
        .await?;
        debug!(path = %self.path.display(), "persisted slack settings");
        Ok(())
    }
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> waigaya_channels::Result<T> {
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(Into::into),
        Err(join) => Err(waigaya_channels::Error::storage("config store task", join)),
    }
}

/// JSON file holding the identity cache between runs.
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `Ok(None)` when no snapshot has been written yet. A corrupt file is
    /// logged and treated as absent.
    pub async fn load(&self) -> Result<Option<IdentitySnapshot>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::Read {
                    path: self.path.clone(),
                    source,
                });
            },
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable identity snapshot");
                Ok(None)
            },
        }
    }

    /// Write to a temp file, then rename over the target.
    pub async fn save(&self, snapshot: &IdentitySnapshot) -> Result<()> {
        let write_err = |source| Error::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).await.map_err(write_err)?;
        fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        debug!(
            path = %self.path.display(),
            users = snapshot.users.len(),
            channels = snapshot.channels.len(),
            "saved identity snapshot"
        );
        Ok(())
    }
}
