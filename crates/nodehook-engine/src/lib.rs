pub mod config;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod storage;

pub use config::{EngineConfig, ManifestEvent, ManifestWatcher, TimeoutPolicy};
pub use error::HookError;
pub use hooks::{
    hook_fn, spawn_periodic, ChainExecutor, ChainHandle, ChainObserver, ChainOutcome, ChainState,
    Decision, EventContext, EventScheduler, FnHook, HookBody, HookDefinition, HookEvent,
    HookInvocation, HookInvocationResult, HookRegistry, HookRunner, HookSummary, HookVerdict,
    LogOrigin, LogRecord, SyncReport, TriggerRequest,
};
pub use manifest::{BodyFactory, BodySource, HookManifest, HookSpec};
pub use storage::HookStore;

/// Initialize structured JSON logging on stderr; stdout stays free for outcomes
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    fmt()
        .json()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
