//! Error taxonomy for registry, context and administrative calls.
//!
//! Hook rejections, timeouts and body faults are verdicts, not errors: they end
//! up in a [`ChainOutcome`](crate::hooks::ChainOutcome) and never surface here.

use crate::hooks::HookEvent;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook '{name}' is already registered for {event}")]
    DuplicateName { name: String, event: HookEvent },

    #[error("hook '{name}' is not registered for {event}")]
    NotFound { name: String, event: HookEvent },

    #[error("invalid hook definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("{event} is job-scoped and requires a job identifier")]
    MissingJobContext { event: HookEvent },

    #[error("unknown hook event: {0}")]
    UnknownEvent(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("hook store error: {0}")]
    Storage(String),

    #[error("event scheduler is shut down")]
    ShutDown,
}

impl HookError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HookError>;
