//! Loading of the cloud adapter configuration.

use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use layercake_deploy::CloudConfig;

/// Configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = "layercake.toml";

/// Prefix of the environment variables overriding the configuration file.
pub const ENV_PREFIX: &str = "LAYERCAKE_";

/// Defaults, then `path`, then `LAYERCAKE_*` environment variables.
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(CloudConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX))
}

pub fn load_cloud_config(path: &Path) -> Result<CloudConfig> {
    let config: CloudConfig = figment(path)
        .extract()
        .context(format!("Failed to load configuration from {}", path.display()))?;

    tracing::debug!(?config, "Loaded cloud configuration");
    Ok(config)
}
