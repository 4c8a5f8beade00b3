use super::{open_store, script_factory};
use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use nodehook_adapters::{install_manifest, ScriptBodyFactory};
use nodehook_engine::{
    spawn_periodic, ChainObserver, ChainOutcome, EventScheduler, HookEvent, HookManifest,
    HookRegistry, HookStore, ManifestEvent, ManifestWatcher, SyncReport, TriggerRequest,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Prints every finished chain as one JSON line on stdout
struct OutcomePrinter;

#[async_trait]
impl ChainObserver for OutcomePrinter {
    async fn on_complete(&self, outcome: &ChainOutcome) {
        match serde_json::to_string(outcome) {
            Ok(line) => println!("{}", line),
            Err(e) => error!(chain = outcome.chain_id, error = %e, "Failed to encode chain outcome"),
        }
    }
}

pub async fn execute(config: &Config) -> Result<()> {
    let registry = Arc::new(HookRegistry::new());
    let store = Arc::new(open_store(config)?);

    let manifest_path = config.manifest_path()?;
    let factory = Arc::new(script_factory(manifest_path.as_deref()));

    let watcher = match &manifest_path {
        Some(path) => {
            let watcher = ManifestWatcher::load(path.clone())?;
            let report = apply_manifest(&registry, &store, &factory, &*watcher.current().await)?;
            info!(manifest = ?path, ?report, "Installed hooks from manifest");
            Some(watcher)
        }
        None => {
            let manifest = HookManifest {
                hooks: store.load_all().context("Failed to read hook store")?,
            };
            install_manifest(&registry, &manifest, &factory)?;
            info!(hooks = registry.len(), "Installed hooks from store");
            None
        }
    };

    let reload_task = match &watcher {
        Some(watcher) if config.hooks.watch => Some(spawn_reloader(
            watcher,
            registry.clone(),
            store.clone(),
            factory.clone(),
        )?),
        _ => None,
    };

    let scheduler = Arc::new(
        EventScheduler::new(registry.clone(), &config.engine)
            .with_observer(Arc::new(OutcomePrinter)),
    );

    if registry.has_hooks(HookEvent::ExechostStartup) {
        let outcome = scheduler
            .trigger(TriggerRequest::host(HookEvent::ExechostStartup))?
            .await?;
        if !outcome.is_accepted() {
            warn!(reason = outcome.reason(), "exechost_startup chain was not accepted");
        }
    }

    let periodic = config
        .engine
        .host_periodic()
        .map(|period| spawn_periodic(scheduler.clone(), HookEvent::ExechostPeriodic, period));

    info!(
        node = %config.engine.node_name,
        hooks = registry.len(),
        "nodehook engine ready, reading trigger requests from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => dispatch(&scheduler, &line),
                None => {
                    info!("stdin closed");
                    break;
                }
            },
        }
    }

    scheduler.shutdown().await;
    if let Some(periodic) = periodic {
        let _ = periodic.await;
    }
    if let Some(task) = reload_task {
        task.abort();
    }

    info!("nodehook engine stopped");
    Ok(())
}

/// Parse one trigger request line and start its chain
fn dispatch(scheduler: &EventScheduler, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let request: TriggerRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed trigger request");
            return;
        }
    };

    let event = request.event;
    // Outcome reaches stdout through the observer
    if let Err(e) = scheduler.trigger(request) {
        warn!(%event, error = %e, "Trigger refused");
    }
}

/// Install a manifest into the registry, then persist it
fn apply_manifest(
    registry: &HookRegistry,
    store: &HookStore,
    factory: &ScriptBodyFactory,
    manifest: &HookManifest,
) -> Result<SyncReport> {
    let report = install_manifest(registry, manifest, factory)?;
    store
        .replace_all(&manifest.hooks)
        .context("Failed to persist hooks")?;
    Ok(report)
}

fn spawn_reloader(
    watcher: &ManifestWatcher,
    registry: Arc<HookRegistry>,
    store: Arc<HookStore>,
    factory: Arc<ScriptBodyFactory>,
) -> Result<JoinHandle<()>> {
    let mut events = watcher.subscribe();
    let watch_task = watcher.watch()?;

    Ok(tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ManifestEvent::Loaded(manifest)) => {
                    match apply_manifest(&registry, &store, &factory, &manifest) {
                        Ok(report) => info!(?report, "Hook registry resynced from manifest"),
                        Err(e) => error!("Manifest reload rejected, keeping current hooks: {:#}", e),
                    }
                }
                Ok(ManifestEvent::Failed(reason)) => {
                    warn!(%reason, "Manifest reload failed, keeping current hooks")
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Missed manifest events")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        watch_task.abort();
    }))
}
