use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::manifest::HookManifest;

/// Outcome of a manifest (re)load
#[derive(Debug, Clone)]
pub enum ManifestEvent {
    Loaded(Arc<HookManifest>),
    /// Previous manifest stays in effect
    Failed(String),
}

/// Watches the hook manifest and re-parses it when the file changes
pub struct ManifestWatcher {
    path: PathBuf,
    current: Arc<RwLock<Arc<HookManifest>>>,
    events_tx: broadcast::Sender<ManifestEvent>,
}

impl ManifestWatcher {
    /// Load the manifest once; fails if the initial file is unusable
    pub fn load(path: PathBuf) -> Result<Self> {
        let manifest = HookManifest::load(&path)
            .with_context(|| format!("Failed to load hook manifest {:?}", path))?;
        let (events_tx, _) = broadcast::channel(16);

        Ok(Self {
            path,
            current: Arc::new(RwLock::new(Arc::new(manifest))),
            events_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last manifest that parsed successfully
    pub async fn current(&self) -> Arc<HookManifest> {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManifestEvent> {
        self.events_tx.subscribe()
    }

    /// Re-read the file now
    pub async fn reload(&self) -> ManifestEvent {
        reload_from(&self.path, &self.current, &self.events_tx).await
    }

    /// Start watching the manifest's directory. Changes are debounced (500ms)
    /// and each one triggers a reload plus a [`ManifestEvent`].
    pub fn watch(&self) -> Result<JoinHandle<()>> {
        let (fs_tx, fs_rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(Duration::from_millis(500), fs_tx)
            .context("Failed to create file watcher")?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        debouncer
            .watcher()
            .watch(&dir, notify::RecursiveMode::NonRecursive)
            .context("Failed to watch manifest directory")?;

        info!(path = ?self.path, "Watching hook manifest for changes");

        let file_name = self.path.file_name().map(|n| n.to_os_string());
        let (change_tx, mut change_rx) = mpsc::channel::<()>(1);

        // notify delivers on a std channel; bridge it from a blocking thread
        tokio::task::spawn_blocking(move || {
            let _debouncer = debouncer;

            loop {
                match fs_rx.recv_timeout(Duration::from_millis(250)) {
                    Ok(Ok(events)) => {
                        let relevant = events.iter().any(|e| {
                            e.kind == DebouncedEventKind::Any
                                && e.path.file_name().map(|n| n.to_os_string()) == file_name
                        });
                        if relevant && change_tx.blocking_send(()).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => error!("File watcher error: {:?}", e),
                    // Reload task gone: stop watching
                    Err(RecvTimeoutError::Timeout) if change_tx.is_closed() => break,
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        let path = self.path.clone();
        let current = self.current.clone();
        let events_tx = self.events_tx.clone();

        Ok(tokio::spawn(async move {
            while change_rx.recv().await.is_some() {
                info!(path = ?path, "Hook manifest changed, reloading");
                reload_from(&path, &current, &events_tx).await;
            }
            warn!(path = ?path, "Hook manifest watcher stopped");
        }))
    }
}

async fn reload_from(
    path: &Path,
    current: &RwLock<Arc<HookManifest>>,
    events_tx: &broadcast::Sender<ManifestEvent>,
) -> ManifestEvent {
    let event = match HookManifest::load(path) {
        Ok(manifest) => {
            let manifest = Arc::new(manifest);
            *current.write().await = manifest.clone();
            info!(hooks = manifest.hooks.len(), "Hook manifest reloaded");
            ManifestEvent::Loaded(manifest)
        }
        Err(e) => {
            error!("Hook manifest reload failed: {}. Keeping previous manifest.", e);
            ManifestEvent::Failed(e.to_string())
        }
    };
    let _ = events_tx.send(event.clone());
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_HOOK: &str = r#"
[[hook]]
name = "a"
event = "execjob_end"
script = "true"
"#;

    const TWO_HOOKS: &str = r#"
[[hook]]
name = "a"
event = "execjob_end"
script = "true"

[[hook]]
name = "b"
event = "exechost_periodic"
script = "true"
"#;

    #[tokio::test]
    async fn test_reload_keeps_last_good_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooks.toml");
        std::fs::write(&path, ONE_HOOK).unwrap();

        let watcher = ManifestWatcher::load(path.clone()).unwrap();
        let mut events = watcher.subscribe();
        assert_eq!(watcher.current().await.hooks.len(), 1);

        std::fs::write(&path, TWO_HOOKS).unwrap();
        assert!(matches!(watcher.reload().await, ManifestEvent::Loaded(_)));
        assert_eq!(watcher.current().await.hooks.len(), 2);

        std::fs::write(&path, "[[hook]]\nname = ").unwrap();
        assert!(matches!(watcher.reload().await, ManifestEvent::Failed(_)));
        assert_eq!(watcher.current().await.hooks.len(), 2);

        assert!(matches!(events.try_recv().unwrap(), ManifestEvent::Loaded(_)));
        assert!(matches!(events.try_recv().unwrap(), ManifestEvent::Failed(_)));
    }

    #[test]
    fn test_missing_manifest_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ManifestWatcher::load(dir.path().join("absent.toml")).is_err());
    }

    #[tokio::test]
    async fn test_watch_picks_up_file_change() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooks.toml");
        std::fs::write(&path, ONE_HOOK).unwrap();

        let watcher = ManifestWatcher::load(path.clone()).unwrap();
        let mut events = watcher.subscribe();
        let _task = watcher.watch().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, TWO_HOOKS).unwrap();

        // Editors and fs::write can surface a half-written file first
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let mut reloaded = false;
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
            if let ManifestEvent::Loaded(manifest) = event {
                if manifest.hooks.len() == 2 {
                    reloaded = true;
                    break;
                }
            }
        }
        assert!(reloaded);
    }
}
