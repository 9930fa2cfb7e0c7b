//! Configuration loading, env substitution, and on-disk persistence.
//!
//! Config files: `waigaya.toml`, `waigaya.yaml`, `waigaya.yml` or `waigaya.json`,
//! searched in `./` then the per-user config directory.
//!
//! `${ENV_VAR}` and `${ENV_VAR:-fallback}` are substituted in the raw text
//! before parsing.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod store;

pub use {
    error::{Error, Result},
    loader::{ConfigPaths, apply_env_overrides, discover_and_load, load_config, save_config},
    schema::{
        ConnectionConfig, DisplayConfig, DisplayPolicy, IdentityConfig, MetricsConfig,
        SlackConfig, WaigayaConfig,
    },
    store::{FileConfigStore, SnapshotFile},
};
