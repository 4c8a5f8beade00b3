use std::any::Any;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use super::context::{EventContext, LogSink};
use super::definition::HookDefinition;
use super::hook::{Decision, HookInvocation};
use crate::config::EngineConfig;

/// Alarm applied to hooks that don't set their own
pub const DEFAULT_ALARM: Duration = Duration::from_secs(30);
/// How long an aborted unit gets to actually stop before it is abandoned
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Outcome of one hook execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum HookVerdict {
    Accepted,
    /// Rejected by the hook itself
    Rejected(String),
    /// Body returned an error or panicked without a verdict
    Faulted(String),
    /// Alarm fired and the unit was terminated
    TimedOut,
    /// Engine shut down mid-execution
    Cancelled,
}

impl HookVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HookVerdict::Accepted)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HookInvocationResult {
    pub hook: String,
    pub verdict: HookVerdict,
    pub duration: Duration,
    /// Lines the body logged, in emission order
    pub log_lines: Vec<String>,
}

enum Ended {
    Finished(Result<anyhow::Result<()>, JoinError>),
    Alarm,
    Shutdown,
}

/// Runs single hooks in their own task under an alarm
#[derive(Debug, Clone)]
pub struct HookRunner {
    default_alarm: Duration,
    kill_grace: Duration,
}

impl HookRunner {
    pub fn new(default_alarm: Duration, kill_grace: Duration) -> Self {
        Self {
            default_alarm,
            kill_grace,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.default_alarm(), config.kill_grace())
    }

    /// Alarm that applies to `def`
    pub fn alarm_for(&self, def: &HookDefinition) -> Duration {
        def.alarm().unwrap_or(self.default_alarm)
    }

    /// Execute one hook. Never fails: faults, timeouts and shutdown all come
    /// back as verdicts.
    pub async fn run(&self, def: &HookDefinition, ctx: &EventContext) -> HookInvocationResult {
        let alarm = self.alarm_for(def);
        let invocation = ctx.invocation(&def.name);
        let sink = ctx.sink();

        debug!(
            hook = %def.name,
            chain = ctx.chain_id(),
            kind = def.body.kind(),
            alarm_ms = alarm.as_millis() as u64,
            "Starting hook"
        );

        let started = Instant::now();
        let body = def.body.clone();
        let unit = invocation.clone();
        let mut task = tokio::spawn(async move { body.run(unit).await });

        let ended = tokio::select! {
            joined = tokio::time::timeout(alarm, &mut task) => match joined {
                Ok(result) => Ended::Finished(result),
                Err(_) => Ended::Alarm,
            },
            _ = ctx.cancellation().cancelled() => Ended::Shutdown,
        };

        let verdict = match ended {
            Ended::Finished(Ok(Ok(()))) => settle(&invocation, None),
            Ended::Finished(Ok(Err(e))) => {
                settle(&invocation, Some(format!("hook {} failed: {:#}", def.name, e)))
            }
            Ended::Finished(Err(e)) if e.is_panic() => {
                let reason = format!("hook {} panicked: {}", def.name, panic_message(e.into_panic()));
                settle(&invocation, Some(reason))
            }
            Ended::Finished(Err(_)) => {
                HookVerdict::Faulted(format!("hook {} execution unit was cancelled", def.name))
            }
            Ended::Alarm => {
                invocation.expire();
                sink.engine_warn(
                    Some(&def.name),
                    format!(
                        "alarm call while running {} hook '{}', request rejected (alarm {}s)",
                        def.event,
                        def.name,
                        alarm.as_secs_f64()
                    ),
                );
                self.terminate(task, &def.name, sink).await;
                HookVerdict::TimedOut
            }
            Ended::Shutdown => {
                invocation.expire();
                sink.engine_warn(Some(&def.name), format!("hook '{}' cancelled by shutdown", def.name));
                self.terminate(task, &def.name, sink).await;
                HookVerdict::Cancelled
            }
        };

        // Anything the body left running can no longer write to this chain
        invocation.expire();

        match &verdict {
            // Rejection reason is reported under the job, like any hook line
            HookVerdict::Rejected(reason) => sink.hook_line(&def.name, reason),
            HookVerdict::Faulted(reason) => sink.engine_warn(Some(&def.name), reason.clone()),
            _ => {}
        }

        let duration = started.elapsed();
        debug!(
            hook = %def.name,
            chain = ctx.chain_id(),
            ?verdict,
            duration_ms = duration.as_millis() as u64,
            "Hook finished"
        );

        HookInvocationResult {
            hook: def.name.clone(),
            verdict,
            duration,
            log_lines: invocation.captured_lines(),
        }
    }

    async fn terminate(
        &self,
        mut task: JoinHandle<anyhow::Result<()>>,
        hook: &str,
        sink: &LogSink,
    ) {
        task.abort();
        match tokio::time::timeout(self.kill_grace, &mut task).await {
            Ok(_) => debug!(hook, "Hook execution unit terminated"),
            Err(_) => sink.engine_warn(
                Some(hook),
                format!(
                    "hook '{}' did not stop within {}ms of termination, abandoning it",
                    hook,
                    self.kill_grace.as_millis()
                ),
            ),
        }
    }
}

impl Default for HookRunner {
    fn default() -> Self {
        Self::new(DEFAULT_ALARM, DEFAULT_KILL_GRACE)
    }
}

/// A recorded decision beats a later error; silence means accept.
fn settle(invocation: &HookInvocation, error: Option<String>) -> HookVerdict {
    match (invocation.decision(), error) {
        (Some(Decision::Accept), _) => HookVerdict::Accepted,
        (Some(Decision::Reject(reason)), _) => HookVerdict::Rejected(reason),
        (None, None) => HookVerdict::Accepted,
        (None, Some(error)) => HookVerdict::Faulted(error),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
