use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::WaigayaConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "waigaya.toml",
    "waigaya.yaml",
    "waigaya.yml",
    "waigaya.json",
];

/// Where the config file and the data directory live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl ConfigPaths {
    /// Per-user directories, with explicit overrides taking precedence.
    pub fn resolve(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "waigaya");
        let config_dir = match (config_dir, &dirs) {
            (Some(dir), _) => dir,
            (None, Some(d)) => d.config_dir().to_path_buf(),
            (None, None) => return Err(Error::NoHomeDir),
        };
        let data_dir = match (data_dir, &dirs) {
            (Some(dir), _) => dir,
            (None, Some(d)) => d.data_dir().to_path_buf(),
            (None, None) => return Err(Error::NoHomeDir),
        };
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// First existing config file: `./waigaya.*`, then `<config_dir>/waigaya.*`.
    pub fn find_config_file(&self) -> Option<PathBuf> {
        CONFIG_FILENAMES
            .iter()
            .map(PathBuf::from)
            .chain(CONFIG_FILENAMES.iter().map(|n| self.config_dir.join(n)))
            .find(|p| p.exists())
    }

    /// The existing config file, or where a new TOML one would go.
    pub fn config_file(&self) -> PathBuf {
        self.find_config_file()
            .unwrap_or_else(|| self.config_dir.join(CONFIG_FILENAMES[0]))
    }

    /// Where the identity cache snapshot is kept.
    pub fn identity_snapshot(&self) -> PathBuf {
        self.data_dir.join("identity-cache.json")
    }
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<WaigayaConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config, falling back to defaults.
///
/// A file that exists but fails to parse is logged and ignored rather than
/// aborting startup.
pub fn discover_and_load(paths: &ConfigPaths) -> WaigayaConfig {
    let mut config = match paths.find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                WaigayaConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            WaigayaConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Let `WAIGAYA_BOT_TOKEN` / `WAIGAYA_APP_TOKEN` (or the `SLACK_*` spellings)
/// replace tokens from the file.
pub fn apply_env_overrides(config: &mut WaigayaConfig, lookup: impl Fn(&str) -> Option<String>) {
    let pick = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| lookup(n).filter(|v| !v.is_empty()))
    };
    if let Some(token) = pick(&["WAIGAYA_BOT_TOKEN", "SLACK_BOT_TOKEN"]) {
        config.slack.bot_token = Some(Secret::new(token));
    }
    if let Some(token) = pick(&["WAIGAYA_APP_TOKEN", "SLACK_APP_TOKEN"]) {
        config.slack.app_token = Some(Secret::new(token));
    }
}

/// Serialize `config` to `path`, format chosen by extension.
///
/// Creates parent directories if needed.
pub fn save_config(config: &WaigayaConfig, path: &Path) -> Result<()> {
    let write_err = |source| Error::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let body = match extension(path) {
        "toml" => toml::to_string_pretty(config)?,
        "yaml" | "yml" => serde_yaml::to_string(config)?,
        "json" => serde_json::to_string_pretty(config)?,
        other => return Err(Error::UnsupportedFormat(other.to_string())),
    };
    std::fs::write(path, body).map_err(write_err)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

fn parse_config(raw: &str, path: &Path) -> Result<WaigayaConfig> {
    match extension(path) {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("toml")
}
