pub mod chain;
pub mod context;
pub mod definition;
pub mod events;
pub mod hook;
pub mod periodic;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use chain::{ChainExecutor, ChainOutcome, ChainState, CANCELLED_REASON, TIMEOUT_REASON};
pub use context::{ContextBuilder, EventContext, LogOrigin, LogRecord, LogSink, ENGINE_PREFIX};
pub use definition::{HookDefinition, DEFAULT_ORDER, MAX_ORDER, MIN_ORDER};
pub use events::HookEvent;
pub use hook::{hook_fn, Decision, FnHook, HookBody, HookInvocation};
pub use periodic::spawn_periodic;
pub use registry::{HookRegistry, HookSummary, SyncReport};
pub use runner::{HookInvocationResult, HookRunner, HookVerdict, DEFAULT_ALARM, DEFAULT_KILL_GRACE};
pub use scheduler::{ChainHandle, ChainObserver, EventScheduler, TriggerRequest};
