use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use super::context::EventContext;
use super::definition::HookDefinition;
use super::events::HookEvent;
use super::runner::{HookInvocationResult, HookRunner, HookVerdict};
use crate::config::{EngineConfig, TimeoutPolicy};

/// Reason reported when a timeout ends a chain
pub const TIMEOUT_REASON: &str = "hook execution exceeded alarm";
/// Reason reported when shutdown ends a chain
pub const CANCELLED_REASON: &str = "hook execution cancelled by engine shutdown";

/// Chain state machine. `Accepted`, `Rejected`, `TimedOut` and `Cancelled`
/// are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainState {
    Pending,
    Running { index: usize },
    Accepted,
    Rejected { index: usize, reason: String },
    TimedOut { index: usize },
    Cancelled { index: usize },
}

impl ChainState {
    /// Leave `Pending` for a chain of `len` hooks
    pub fn start(len: usize) -> Self {
        if len == 0 {
            ChainState::Accepted
        } else {
            ChainState::Running { index: 0 }
        }
    }

    /// Transition out of `Running { index }` given that hook's verdict
    pub fn advance(index: usize, verdict: &HookVerdict, is_last: bool, policy: TimeoutPolicy) -> Self {
        let next = || {
            if is_last {
                ChainState::Accepted
            } else {
                ChainState::Running { index: index + 1 }
            }
        };

        match verdict {
            HookVerdict::Accepted => next(),
            HookVerdict::Rejected(reason) | HookVerdict::Faulted(reason) => ChainState::Rejected {
                index,
                reason: reason.clone(),
            },
            HookVerdict::TimedOut => match policy {
                TimeoutPolicy::Reject => ChainState::TimedOut { index },
                TimeoutPolicy::Continue => next(),
            },
            HookVerdict::Cancelled => ChainState::Cancelled { index },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChainState::Pending | ChainState::Running { .. })
    }
}

/// Aggregate result of one event dispatch
#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome {
    pub chain_id: u64,
    pub event: HookEvent,
    pub job_id: Option<String>,
    /// Always terminal
    pub state: ChainState,
    /// One entry per executed hook, in chain order
    pub results: Vec<HookInvocationResult>,
    pub duration: Duration,
}

impl ChainOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self.state, ChainState::Accepted)
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.state {
            ChainState::Rejected { reason, .. } => Some(reason),
            ChainState::TimedOut { .. } => Some(TIMEOUT_REASON),
            ChainState::Cancelled { .. } => Some(CANCELLED_REASON),
            _ => None,
        }
    }

    /// Index of the hook that ended the chain early
    pub fn terminated_at(&self) -> Option<usize> {
        match &self.state {
            ChainState::Rejected { index, .. }
            | ChainState::TimedOut { index }
            | ChainState::Cancelled { index } => Some(*index),
            _ => None,
        }
    }

    pub fn terminating_hook(&self) -> Option<&str> {
        self.terminated_at()
            .and_then(|i| self.results.get(i))
            .map(|r| r.hook.as_str())
    }

    pub fn executed_hooks(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.hook.as_str()).collect()
    }
}

/// Drives one event's chain through the runner, one hook at a time
#[derive(Debug, Clone)]
pub struct ChainExecutor {
    runner: HookRunner,
    timeout_policy: TimeoutPolicy,
}

impl ChainExecutor {
    pub fn new(runner: HookRunner, timeout_policy: TimeoutPolicy) -> Self {
        Self {
            runner,
            timeout_policy,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(HookRunner::from_config(config), config.timeout_policy)
    }

    pub async fn execute(&self, chain: &[Arc<HookDefinition>], ctx: &EventContext) -> ChainOutcome {
        let started = Instant::now();
        let sink = ctx.sink();
        let mut results = Vec::with_capacity(chain.len());

        sink.engine(
            None,
            format!("{} chain started with {} hook(s)", ctx.event(), chain.len()),
        );

        let mut state = ChainState::start(chain.len());
        while let ChainState::Running { index } = state {
            // Shutdown may land while this chain waits its turn or between hooks
            if ctx.cancellation().is_cancelled() {
                state = ChainState::Cancelled { index };
                break;
            }

            let def = &chain[index];
            let result = self.runner.run(def, ctx).await;

            if result.verdict == HookVerdict::TimedOut && self.timeout_policy == TimeoutPolicy::Continue {
                sink.engine_warn(
                    Some(&def.name),
                    format!("continuing {} chain after hook '{}' timed out", ctx.event(), def.name),
                );
            }

            state = ChainState::advance(
                index,
                &result.verdict,
                index + 1 == chain.len(),
                self.timeout_policy,
            );
            debug!(chain = ctx.chain_id(), hook = %def.name, ?state, "Chain advanced");
            results.push(result);
        }

        let outcome = ChainOutcome {
            chain_id: ctx.chain_id(),
            event: ctx.event(),
            job_id: ctx.job_id().map(str::to_string),
            state,
            results,
            duration: started.elapsed(),
        };

        log_terminal(ctx, &outcome);
        outcome
    }
}

/// Exactly one engine line per finished chain
fn log_terminal(ctx: &EventContext, outcome: &ChainOutcome) {
    let sink = ctx.sink();
    let hook = outcome.terminating_hook();
    match &outcome.state {
        ChainState::Accepted => sink.engine(
            None,
            format!(
                "{} chain accepted after {} hook(s)",
                outcome.event,
                outcome.results.len()
            ),
        ),
        ChainState::Rejected { reason, .. } => sink.engine(
            hook,
            format!(
                "{} hook '{}' rejected the event: {}",
                outcome.event,
                hook.unwrap_or("?"),
                reason
            ),
        ),
        ChainState::TimedOut { .. } => sink.engine_warn(
            hook,
            format!(
                "{} chain stopped at hook '{}': {}",
                outcome.event,
                hook.unwrap_or("?"),
                TIMEOUT_REASON
            ),
        ),
        ChainState::Cancelled { .. } => sink.engine_warn(
            hook,
            format!("{} chain stopped: {}", outcome.event, CANCELLED_REASON),
        ),
        ChainState::Pending | ChainState::Running { .. } => {}
    }
}
