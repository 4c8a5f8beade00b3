pub mod script_hook;

pub use script_hook::{parse_directive, ScriptBodyFactory, ScriptHook, ACCEPT_DIRECTIVE, REJECT_DIRECTIVE};

use anyhow::{Context, Result};
use nodehook_engine::{HookManifest, HookRegistry, SyncReport};

/// Make the registry match a manifest, building script bodies for every entry.
/// Nothing changes if any entry is invalid.
pub fn install_manifest(
    registry: &HookRegistry,
    manifest: &HookManifest,
    factory: &ScriptBodyFactory,
) -> Result<SyncReport> {
    let defs = manifest
        .to_definitions(factory)
        .context("Invalid hook manifest")?;
    registry.sync(defs).context("Failed to sync hook registry")
}
