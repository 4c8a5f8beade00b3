use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::events::HookEvent;
use super::hook::HookBody;
use crate::error::{HookError, Result};

pub const MIN_ORDER: i32 = 1;
pub const MAX_ORDER: i32 = 1000;
/// Order given to hooks that don't ask for one
pub const DEFAULT_ORDER: i32 = 500;

/// A hook bound to one event
#[derive(Clone)]
pub struct HookDefinition {
    pub name: String,
    pub event: HookEvent,
    /// Position in the chain, ascending
    pub order: i32,
    pub enabled: bool,
    /// Wall-clock alarm; `None` uses the engine default
    pub alarm_secs: Option<u64>,
    pub body: Arc<dyn HookBody>,
}

impl HookDefinition {
    pub fn new(name: impl Into<String>, event: HookEvent, body: Arc<dyn HookBody>) -> Self {
        Self {
            name: name.into(),
            event,
            order: DEFAULT_ORDER,
            enabled: true,
            alarm_secs: None,
            body,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_alarm(mut self, secs: u64) -> Self {
        self.alarm_secs = Some(secs);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn alarm(&self) -> Option<Duration> {
        self.alarm_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.name, self.order, self.alarm_secs)
    }
}

/// Field checks shared by definitions and manifest entries
pub(crate) fn validate_fields(name: &str, order: i32, alarm_secs: Option<u64>) -> Result<()> {
    if name.trim().is_empty() {
        return Err(HookError::invalid(name, "name must not be empty"));
    }
    if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
        return Err(HookError::invalid(
            name,
            format!("order {} outside {}..={}", order, MIN_ORDER, MAX_ORDER),
        ));
    }
    if alarm_secs == Some(0) {
        return Err(HookError::invalid(name, "alarm must be positive"));
    }
    Ok(())
}

impl fmt::Debug for HookDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookDefinition")
            .field("name", &self.name)
            .field("event", &self.event)
            .field("order", &self.order)
            .field("enabled", &self.enabled)
            .field("alarm_secs", &self.alarm_secs)
            .field("body", &self.body.kind())
            .finish()
    }
}
