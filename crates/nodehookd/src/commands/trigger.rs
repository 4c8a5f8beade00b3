use super::{load_manifest, open_store, script_factory};
use crate::config::Config;
use anyhow::{Context, Result};
use nodehook_adapters::install_manifest;
use nodehook_engine::{EventScheduler, HookEvent, HookManifest, HookRegistry, TriggerRequest};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub async fn execute(
    event: HookEvent,
    job: Option<String>,
    data: Option<String>,
    config: &Config,
) -> Result<()> {
    let data: Value = match data {
        Some(raw) => serde_json::from_str(&raw).context("Failed to parse --data JSON")?,
        None => Value::Null,
    };

    let manifest_path = config.manifest_path()?;
    let manifest = match &manifest_path {
        Some(path) => load_manifest(path)?,
        None => HookManifest {
            hooks: open_store(config)?
                .load_all()
                .context("Failed to read hook store")?,
        },
    };

    let registry = Arc::new(HookRegistry::new());
    install_manifest(&registry, &manifest, &script_factory(manifest_path.as_deref()))?;
    info!(%event, hooks = registry.lookup_chain(event).len(), "Running hook chain");

    let scheduler = EventScheduler::new(registry, &config.engine);
    let request = TriggerRequest {
        event,
        job_id: job,
        data,
    };
    let outcome = scheduler.trigger(request)?.await?;
    scheduler.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_accepted() {
        anyhow::bail!(
            "{} chain not accepted: {}",
            event,
            outcome.reason().unwrap_or("no reason given")
        );
    }
    Ok(())
}
