use super::{load_manifest, open_store, script_factory};
use crate::config::Config;
use anyhow::{Context, Result};
use nodehook_adapters::install_manifest;
use nodehook_engine::{HookEvent, HookRegistry, HookSpec};
use std::path::{Path, PathBuf};

pub enum HooksAction {
    List(Option<HookEvent>),
    Check(PathBuf),
    Import(PathBuf),
}

pub fn execute(action: HooksAction, config: &Config) -> Result<()> {
    match action {
        HooksAction::List(event) => list(event, config),
        HooksAction::Check(path) => check(&path),
        HooksAction::Import(path) => import(&path, config),
    }
}

fn list(event: Option<HookEvent>, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let specs: Vec<HookSpec> = store
        .load_all()
        .context("Failed to read hook store")?
        .into_iter()
        .filter(|s| event.map_or(true, |e| s.event == e))
        .collect();

    if specs.is_empty() {
        println!("No hooks installed");
        return Ok(());
    }

    println!(
        "{:<32} {:<18} {:>5} {:<8} {:>6} SOURCE",
        "NAME", "EVENT", "ORDER", "ENABLED", "ALARM"
    );
    for spec in specs {
        let alarm = spec
            .alarm
            .map(|a| format!("{}s", a))
            .unwrap_or_else(|| "-".to_string());
        let source = match &spec.path {
            Some(path) => format!("{} {}", spec.interpreter(), path.display()),
            None => format!("{} (inline)", spec.interpreter()),
        };
        println!(
            "{:<32} {:<18} {:>5} {:<8} {:>6} {}",
            spec.name,
            spec.event.as_str(),
            spec.order,
            spec.enabled,
            alarm,
            source
        );
    }
    Ok(())
}

/// Validate a manifest and print each event's effective chain
fn check(path: &Path) -> Result<()> {
    let manifest = load_manifest(path)?;
    let registry = HookRegistry::new();
    install_manifest(&registry, &manifest, &script_factory(Some(path)))?;

    println!("{:?}: {} hook(s) OK", path, manifest.hooks.len());
    for event in HookEvent::ALL {
        let chain = registry.lookup_chain(event);
        if chain.is_empty() {
            continue;
        }
        let names: Vec<String> = chain
            .iter()
            .map(|d| format!("{}({})", d.name, d.order))
            .collect();
        println!("  {}: {}", event, names.join(" -> "));
    }

    let disabled = manifest.hooks.iter().filter(|s| !s.enabled).count();
    if disabled > 0 {
        println!("  {} disabled hook(s) not shown", disabled);
    }
    Ok(())
}

fn import(path: &Path, config: &Config) -> Result<()> {
    let mut manifest = load_manifest(path)?;
    // Script files must exist before they are persisted
    install_manifest(&HookRegistry::new(), &manifest, &script_factory(Some(path)))?;

    // Stored hooks load without the manifest, so pin relative script paths
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        for spec in &mut manifest.hooks {
            if let Some(script) = spec.path.as_mut().filter(|p| p.is_relative()) {
                *script = dir.join(&*script);
            }
        }
    }

    let store = open_store(config)?;
    store
        .replace_all(&manifest.hooks)
        .context("Failed to write hook store")?;
    println!(
        "Imported {} hook(s) from {:?} into {:?}",
        manifest.hooks.len(),
        path,
        config.store_path()?
    );
    Ok(())
}
