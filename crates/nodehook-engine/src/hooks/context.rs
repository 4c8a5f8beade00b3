use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::HookEvent;
use super::hook::HookInvocation;
use crate::error::{HookError, Result};

/// Prefix that marks engine-authored lines in the log contract
pub const ENGINE_PREFIX: &str = "[engine]";

/// Who wrote a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOrigin {
    Hook,
    Engine,
}

/// One streamed log line, attributed to a job or to the host
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub chain_id: u64,
    /// `Job;<job-id>` or `Host;<node>`
    pub subject: String,
    pub hook: Option<String>,
    pub origin: LogOrigin,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            LogOrigin::Hook => write!(f, "{};{}", self.subject, self.message),
            LogOrigin::Engine => write!(f, "{};{} {}", self.subject, ENGINE_PREFIX, self.message),
        }
    }
}

/// Log sink bound to one chain. Lines go out as soon as they are written.
#[derive(Clone)]
pub struct LogSink {
    chain_id: u64,
    subject: Arc<str>,
    tx: broadcast::Sender<LogRecord>,
}

impl LogSink {
    pub(crate) fn new(chain_id: u64, subject: String, tx: broadcast::Sender<LogRecord>) -> Self {
        Self {
            chain_id,
            subject: subject.into(),
            tx,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Line written by a hook body
    pub fn hook_line(&self, hook: &str, message: &str) {
        info!(
            target: "nodehook::hook",
            chain = self.chain_id,
            hook,
            "{};{}",
            self.subject,
            message
        );
        self.publish(Some(hook), LogOrigin::Hook, message.to_string());
    }

    /// Engine event (chain start/end, verdicts)
    pub fn engine(&self, hook: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        info!(
            target: "nodehook::engine",
            chain = self.chain_id,
            hook,
            "{};{} {}",
            self.subject,
            ENGINE_PREFIX,
            message
        );
        self.publish(hook, LogOrigin::Engine, message);
    }

    /// Engine-detected failure (timeouts, faults, abandoned units)
    pub fn engine_warn(&self, hook: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(
            target: "nodehook::engine",
            chain = self.chain_id,
            hook,
            "{};{} {}",
            self.subject,
            ENGINE_PREFIX,
            message
        );
        self.publish(hook, LogOrigin::Engine, message);
    }

    fn publish(&self, hook: Option<&str>, origin: LogOrigin, message: String) {
        // No subscribers is fine: tracing already has the line
        let _ = self.tx.send(LogRecord {
            chain_id: self.chain_id,
            subject: self.subject.to_string(),
            hook: hook.map(str::to_string),
            origin,
            message,
            at: Utc::now(),
        });
    }
}

/// Per-chain context. Owned by exactly one chain execution.
pub struct EventContext {
    chain_id: u64,
    event: HookEvent,
    job_id: Option<String>,
    data: Arc<Value>,
    sink: LogSink,
    cancel: CancellationToken,
}

impl EventContext {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn event(&self) -> HookEvent {
        self.event
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    /// Opaque event metadata (exit status, resource usage, ...)
    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    /// Fires when the engine is shutting down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fresh invocation for one hook, verdict undecided
    pub fn invocation(&self, hook_name: &str) -> HookInvocation {
        HookInvocation::new(
            hook_name.to_string(),
            self.event,
            self.job_id.clone(),
            self.data.clone(),
            self.sink.clone(),
        )
    }
}

/// Builds [`EventContext`]s and hands out chain ids
pub struct ContextBuilder {
    node: String,
    log_tx: broadcast::Sender<LogRecord>,
    shutdown: CancellationToken,
    next_chain_id: AtomicU64,
}

impl ContextBuilder {
    pub fn new(
        node: impl Into<String>,
        log_tx: broadcast::Sender<LogRecord>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            node: node.into(),
            log_tx,
            shutdown,
            next_chain_id: AtomicU64::new(1),
        }
    }

    pub fn build(&self, event: HookEvent, job_id: Option<String>, data: Value) -> Result<EventContext> {
        let job_id = job_id.filter(|id| !id.trim().is_empty());

        let (job_id, subject) = if event.is_job_scoped() {
            let id = job_id.ok_or(HookError::MissingJobContext { event })?;
            let subject = format!("Job;{}", id);
            (Some(id), subject)
        } else {
            if let Some(id) = &job_id {
                debug!(%event, job = %id, "Dropping job id from host-scoped event");
            }
            (None, format!("Host;{}", self.node))
        };

        let chain_id = self.next_chain_id.fetch_add(1, Ordering::Relaxed);

        Ok(EventContext {
            chain_id,
            event,
            job_id,
            data: Arc::new(data),
            sink: LogSink::new(chain_id, subject, self.log_tx.clone()),
            cancel: self.shutdown.child_token(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> (ContextBuilder, broadcast::Receiver<LogRecord>) {
        let (tx, rx) = broadcast::channel(16);
        (
            ContextBuilder::new("node01", tx, CancellationToken::new()),
            rx,
        )
    }

    #[test]
    fn test_job_event_requires_job_id() {
        let (builder, _rx) = builder();
        let err = builder
            .build(HookEvent::ExecjobEnd, None, Value::Null)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            HookError::MissingJobContext {
                event: HookEvent::ExecjobEnd
            }
        ));

        // Blank ids count as missing
        assert!(builder
            .build(HookEvent::ExecjobEnd, Some("  ".into()), Value::Null)
            .is_err());
    }

    #[test]
    fn test_host_event_is_attributed_to_node() {
        let (builder, _rx) = builder();
        let ctx = builder
            .build(HookEvent::ExechostPeriodic, Some("12.server".into()), Value::Null)
            .unwrap();
        assert_eq!(ctx.job_id(), None);
        assert_eq!(ctx.sink().subject(), "Host;node01");
    }

    #[test]
    fn test_chain_ids_are_monotonic() {
        let (builder, _rx) = builder();
        let a = builder
            .build(HookEvent::ExecjobEnd, Some("1.server".into()), json!({"exit_status": 0}))
            .unwrap();
        let b = builder
            .build(HookEvent::ExecjobEnd, Some("1.server".into()), Value::Null)
            .unwrap();
        assert!(b.chain_id() > a.chain_id());
        assert_eq!(a.data()["exit_status"], 0);
    }

    #[test]
    fn test_sink_publishes_attributed_lines() {
        let (builder, mut rx) = builder();
        let ctx = builder
            .build(HookEvent::ExecjobEnd, Some("7.server".into()), Value::Null)
            .unwrap();

        ctx.sink().hook_line("logmsg", "executed execjob_end hook");
        ctx.sink().engine(None, "chain accepted");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.to_string(), "Job;7.server;executed execjob_end hook");
        assert_eq!(first.hook.as_deref(), Some("logmsg"));

        let second = rx.try_recv().unwrap();
        assert_eq!(second.origin, LogOrigin::Engine);
        assert_eq!(second.to_string(), "Job;7.server;[engine] chain accepted");
    }
}
