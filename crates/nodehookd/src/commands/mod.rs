pub mod hooks;
pub mod init;
pub mod serve;
pub mod trigger;

use crate::config::Config;
use anyhow::{Context, Result};
use nodehook_adapters::ScriptBodyFactory;
use nodehook_engine::{HookManifest, HookStore};
use std::path::Path;

/// Script paths in a manifest resolve relative to the manifest's directory
pub(crate) fn script_factory(manifest: Option<&Path>) -> ScriptBodyFactory {
    match manifest.and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => ScriptBodyFactory::new().with_base_dir(dir),
        _ => ScriptBodyFactory::new(),
    }
}

pub(crate) fn open_store(config: &Config) -> Result<HookStore> {
    let path = config.store_path()?;
    HookStore::open(&path).with_context(|| format!("Failed to open hook store {:?}", path))
}

pub(crate) fn load_manifest(path: &Path) -> Result<HookManifest> {
    HookManifest::load(path).with_context(|| format!("Invalid hook manifest {:?}", path))
}
