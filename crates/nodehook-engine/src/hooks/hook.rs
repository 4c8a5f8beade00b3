use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::context::LogSink;
use super::events::HookEvent;

/// Verdict a hook body records on its invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject(String),
}

/// Executable hook body.
///
/// The body reports its verdict through [`HookInvocation::accept`] or
/// [`HookInvocation::reject`]. A body that returns `Ok(())` without recording
/// either is treated as accepted. Returning an error without a verdict is a
/// body fault and stops the chain.
///
/// `run` executes on a tokio worker and must not block it. The alarm and
/// shutdown stop a body by aborting its task, which only takes effect at an
/// `.await`; a body stuck in a blocking call keeps running and is abandoned
/// once the kill grace elapses. Wrap blocking work in
/// [`tokio::task::spawn_blocking`] or an external process that is killed
/// when dropped.
#[async_trait]
pub trait HookBody: Send + Sync {
    async fn run(&self, event: HookInvocation) -> Result<()>;

    /// Short label for logs ("native", "script", ...)
    fn kind(&self) -> &str {
        "native"
    }
}

struct InvocationState {
    hook_name: String,
    event: HookEvent,
    job_id: Option<String>,
    data: Arc<Value>,
    sink: LogSink,
    decision: OnceLock<Decision>,
    lines: Mutex<Vec<String>>,
    expired: AtomicBool,
}

/// Handle given to a hook body for one execution.
///
/// Once the runner expires it (alarm or shutdown), further log lines and
/// verdicts from the body are dropped.
#[derive(Clone)]
pub struct HookInvocation {
    state: Arc<InvocationState>,
}

impl HookInvocation {
    pub(crate) fn new(
        hook_name: String,
        event: HookEvent,
        job_id: Option<String>,
        data: Arc<Value>,
        sink: LogSink,
    ) -> Self {
        Self {
            state: Arc::new(InvocationState {
                hook_name,
                event,
                job_id,
                data,
                sink,
                decision: OnceLock::new(),
                lines: Mutex::new(Vec::new()),
                expired: AtomicBool::new(false),
            }),
        }
    }

    pub fn hook_name(&self) -> &str {
        &self.state.hook_name
    }

    pub fn event(&self) -> HookEvent {
        self.state.event
    }

    pub fn job_id(&self) -> Option<&str> {
        self.state.job_id.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.state.data
    }

    /// Write a line to the job (or host) log right away
    pub fn log(&self, message: impl AsRef<str>) {
        if self.is_expired() {
            return;
        }
        let message = message.as_ref();
        self.state.sink.hook_line(&self.state.hook_name, message);
        self.state
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
    }

    pub fn accept(&self) {
        self.decide(Decision::Accept);
    }

    pub fn reject(&self, reason: impl Into<String>) {
        self.decide(Decision::Reject(reason.into()));
    }

    /// Recorded verdict, `None` while undecided
    pub fn decision(&self) -> Option<Decision> {
        self.state.decision.get().cloned()
    }

    pub fn is_expired(&self) -> bool {
        self.state.expired.load(Ordering::Acquire)
    }

    pub(crate) fn expire(&self) {
        self.state.expired.store(true, Ordering::Release);
    }

    pub(crate) fn captured_lines(&self) -> Vec<String> {
        self.state
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn decide(&self, decision: Decision) {
        if self.is_expired() {
            return;
        }
        // First decision is final
        if let Err(ignored) = self.state.decision.set(decision) {
            debug!(hook = %self.state.hook_name, ?ignored, "Verdict already recorded");
        }
    }
}

/// Hook body backed by an async closure
pub struct FnHook<F> {
    f: F,
}

impl<F> FnHook<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> HookBody for FnHook<F>
where
    F: Fn(HookInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, event: HookInvocation) -> Result<()> {
        (self.f)(event).await
    }
}

/// Shorthand for `Arc::new(FnHook::new(f))`
pub fn hook_fn<F, Fut>(f: F) -> Arc<dyn HookBody>
where
    F: Fn(HookInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHook::new(f))
}
