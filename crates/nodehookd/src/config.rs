use anyhow::{Context, Result};
use nodehook_engine::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub hooks: HooksConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HooksConfig {
    /// Manifest file; without one, hooks come from the store
    #[serde(default)]
    pub manifest: Option<String>,

    #[serde(default = "default_watch")]
    pub watch: bool,
}

fn default_store_path() -> String {
    "./nodehook.redb".to_string()
}

fn default_watch() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            manifest: None,
            watch: default_watch(),
        }
    }
}

impl Config {
    pub fn store_path(&self) -> Result<PathBuf> {
        expand_path(&self.store.path)
    }

    pub fn manifest_path(&self) -> Result<Option<PathBuf>> {
        self.hooks.manifest.as_deref().map(expand_path).transpose()
    }
}

/// Expand `~` and environment variables in a configured path
fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded =
        shellexpand::full(raw).with_context(|| format!("Failed to expand path '{}'", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

/// Load config from file or use defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse TOML config")?;

        Ok(config)
    } else {
        Ok(Config::default())
    }
}
