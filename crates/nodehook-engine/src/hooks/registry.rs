use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use super::definition::HookDefinition;
use super::events::HookEvent;
use crate::error::{HookError, Result};

struct RegisteredHook {
    /// Registration sequence, breaks ties between equal orders
    seq: u64,
    def: Arc<HookDefinition>,
}

/// Listing entry for admin output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookSummary {
    pub name: String,
    pub event: HookEvent,
    pub order: i32,
    pub enabled: bool,
    pub alarm_secs: Option<u64>,
    pub kind: String,
}

/// What [`HookRegistry::sync`] changed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Registry of hook definitions, organized by event type.
///
/// Lookups return a snapshot: definitions are immutable `Arc`s, so updates made
/// while a chain is running only affect chains fetched afterwards.
pub struct HookRegistry {
    hooks: DashMap<HookEvent, Vec<RegisteredHook>>,
    next_seq: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a new hook; names are unique per event
    pub fn register(&self, def: HookDefinition) -> Result<()> {
        def.validate()?;

        let mut chain = self.hooks.entry(def.event).or_default();
        if chain.iter().any(|h| h.def.name == def.name) {
            return Err(HookError::DuplicateName {
                name: def.name,
                event: def.event,
            });
        }

        info!(hook = %def.name, event = %def.event, order = def.order, "Hook registered");

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        chain.push(RegisteredHook {
            seq,
            def: Arc::new(def),
        });
        sort_chain(&mut chain);
        Ok(())
    }

    /// Replace an existing definition, keeping its registration sequence
    pub fn update(&self, def: HookDefinition) -> Result<()> {
        def.validate()?;

        let mut chain = self
            .hooks
            .get_mut(&def.event)
            .ok_or_else(|| not_found(def.event, &def.name))?;
        let entry = chain
            .iter_mut()
            .find(|h| h.def.name == def.name)
            .ok_or_else(|| not_found(def.event, &def.name))?;

        info!(hook = %def.name, event = %def.event, order = def.order, "Hook updated");

        entry.def = Arc::new(def);
        sort_chain(&mut chain);
        Ok(())
    }

    pub fn set_enabled(&self, event: HookEvent, name: &str, enabled: bool) -> Result<()> {
        let mut chain = self
            .hooks
            .get_mut(&event)
            .ok_or_else(|| not_found(event, name))?;
        let entry = chain
            .iter_mut()
            .find(|h| h.def.name == name)
            .ok_or_else(|| not_found(event, name))?;

        if entry.def.enabled != enabled {
            let def = HookDefinition {
                enabled,
                ..(*entry.def).clone()
            };
            entry.def = Arc::new(def);
            info!(hook = name, %event, enabled, "Hook enablement changed");
        }
        Ok(())
    }

    pub fn remove(&self, event: HookEvent, name: &str) -> Result<Arc<HookDefinition>> {
        let mut chain = self
            .hooks
            .get_mut(&event)
            .ok_or_else(|| not_found(event, name))?;
        let pos = chain
            .iter()
            .position(|h| h.def.name == name)
            .ok_or_else(|| not_found(event, name))?;

        info!(hook = name, %event, "Hook removed");
        Ok(chain.remove(pos).def)
    }

    /// Enabled hooks for an event, ascending by order then registration
    pub fn lookup_chain(&self, event: HookEvent) -> Vec<Arc<HookDefinition>> {
        self.hooks
            .get(&event)
            .map(|chain| {
                chain
                    .iter()
                    .filter(|h| h.def.enabled)
                    .map(|h| h.def.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get(&self, event: HookEvent, name: &str) -> Option<Arc<HookDefinition>> {
        self.hooks
            .get(&event)
            .and_then(|chain| chain.iter().find(|h| h.def.name == name).map(|h| h.def.clone()))
    }

    /// Check if any enabled hooks are bound to an event
    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.hooks
            .get(&event)
            .map(|chain| chain.iter().any(|h| h.def.enabled))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.hooks.iter().map(|chain| chain.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All hooks (or one event's), in event then chain order
    pub fn list(&self, event: Option<HookEvent>) -> Vec<HookSummary> {
        let events: Vec<HookEvent> = match event {
            Some(e) => vec![e],
            None => HookEvent::ALL.to_vec(),
        };

        let mut out = Vec::new();
        for event in events {
            if let Some(chain) = self.hooks.get(&event) {
                out.extend(chain.iter().map(|h| HookSummary {
                    name: h.def.name.clone(),
                    event,
                    order: h.def.order,
                    enabled: h.def.enabled,
                    alarm_secs: h.def.alarm_secs,
                    kind: h.def.body.kind().to_string(),
                }));
            }
        }
        out
    }

    /// Reconcile the registry to exactly `defs`.
    ///
    /// The whole set is validated before anything changes.
    pub fn sync(&self, defs: Vec<HookDefinition>) -> Result<SyncReport> {
        let mut wanted = HashSet::new();
        for def in &defs {
            def.validate()?;
            if !wanted.insert((def.event, def.name.clone())) {
                return Err(HookError::DuplicateName {
                    name: def.name.clone(),
                    event: def.event,
                });
            }
        }

        let mut report = SyncReport::default();
        for def in defs {
            if self.get(def.event, &def.name).is_some() {
                self.update(def)?;
                report.updated += 1;
            } else {
                self.register(def)?;
                report.added += 1;
            }
        }

        let stale: Vec<(HookEvent, String)> = self
            .hooks
            .iter()
            .flat_map(|chain| {
                let event = *chain.key();
                chain
                    .iter()
                    .map(|h| (event, h.def.name.clone()))
                    .collect::<Vec<_>>()
            })
            .filter(|key| !wanted.contains(key))
            .collect();

        for (event, name) in stale {
            self.remove(event, &name)?;
            report.removed += 1;
        }

        Ok(report)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_chain(chain: &mut [RegisteredHook]) {
    chain.sort_by_key(|h| (h.def.order, h.seq));
}

fn not_found(event: HookEvent, name: &str) -> HookError {
    HookError::NotFound {
        name: name.to_string(),
        event,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::hook::{hook_fn, HookBody};

    fn noop() -> Arc<dyn HookBody> {
        hook_fn(|_| async { Ok(()) })
    }

    fn def(name: &str, order: i32) -> HookDefinition {
        HookDefinition::new(name, HookEvent::ExecjobEnd, noop()).with_order(order)
    }

    fn names(chain: &[Arc<HookDefinition>]) -> Vec<&str> {
        chain.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn test_chain_sorted_by_order_then_registration() {
        let registry = HookRegistry::new();
        registry.register(def("late", 170)).unwrap();
        registry.register(def("first", 1)).unwrap();
        registry.register(def("tie_a", 2)).unwrap();
        registry.register(def("tie_b", 2)).unwrap();

        let chain = registry.lookup_chain(HookEvent::ExecjobEnd);
        assert_eq!(names(&chain), vec!["first", "tie_a", "tie_b", "late"]);

        // Unchanged registry gives the same sequence
        let again = registry.lookup_chain(HookEvent::ExecjobEnd);
        assert_eq!(names(&chain), names(&again));
    }

    #[test]
    fn test_duplicate_name_rejected_per_event() {
        let registry = HookRegistry::new();
        registry.register(def("logmsg", 1)).unwrap();

        let err = registry.register(def("logmsg", 2)).unwrap_err();
        assert!(matches!(err, HookError::DuplicateName { .. }));

        // Same name on another event is fine
        registry
            .register(HookDefinition::new("logmsg", HookEvent::ExechostPeriodic, noop()))
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_disabled_hooks_are_skipped() {
        let registry = HookRegistry::new();
        registry.register(def("a", 1)).unwrap();
        registry.register(def("b", 2).with_enabled(false)).unwrap();

        assert_eq!(names(&registry.lookup_chain(HookEvent::ExecjobEnd)), vec!["a"]);

        registry.set_enabled(HookEvent::ExecjobEnd, "b", true).unwrap();
        registry.set_enabled(HookEvent::ExecjobEnd, "a", false).unwrap();
        assert_eq!(names(&registry.lookup_chain(HookEvent::ExecjobEnd)), vec!["b"]);
        assert!(registry.has_hooks(HookEvent::ExecjobEnd));
        assert!(!registry.has_hooks(HookEvent::ExechostPeriodic));
    }

    #[test]
    fn test_snapshot_unaffected_by_later_update() {
        let registry = HookRegistry::new();
        registry.register(def("a", 1)).unwrap();
        registry.register(def("b", 2)).unwrap();

        let snapshot = registry.lookup_chain(HookEvent::ExecjobEnd);
        registry.update(def("a", 3)).unwrap();
        registry.remove(HookEvent::ExecjobEnd, "b").unwrap();

        assert_eq!(names(&snapshot), vec!["a", "b"]);
        assert_eq!(snapshot[0].order, 1);
        assert_eq!(names(&registry.lookup_chain(HookEvent::ExecjobEnd)), vec!["a"]);
    }

    #[test]
    fn test_update_keeps_registration_sequence() {
        let registry = HookRegistry::new();
        registry.register(def("a", 5)).unwrap();
        registry.register(def("b", 5)).unwrap();
        registry.update(def("a", 5).with_alarm(10)).unwrap();

        let chain = registry.lookup_chain(HookEvent::ExecjobEnd);
        assert_eq!(names(&chain), vec!["a", "b"]);
        assert_eq!(chain[0].alarm_secs, Some(10));
    }

    #[test]
    fn test_missing_hooks_report_not_found() {
        let registry = HookRegistry::new();
        assert!(matches!(
            registry.update(def("ghost", 1)),
            Err(HookError::NotFound { .. })
        ));
        assert!(registry.remove(HookEvent::ExecjobEnd, "ghost").is_err());
        assert!(registry
            .set_enabled(HookEvent::ExecjobEnd, "ghost", false)
            .is_err());
    }

    #[test]
    fn test_invalid_definition_rejected() {
        let registry = HookRegistry::new();
        assert!(matches!(
            registry.register(def("bad", 0)),
            Err(HookError::InvalidDefinition { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sync_reconciles_full_set() {
        let registry = HookRegistry::new();
        registry.register(def("keep", 1)).unwrap();
        registry.register(def("drop", 2)).unwrap();

        let report = registry
            .sync(vec![def("keep", 3), def("new", 4)])
            .unwrap();
        assert_eq!(
            report,
            SyncReport {
                added: 1,
                updated: 1,
                removed: 1
            }
        );

        let listed: Vec<String> = registry.list(None).into_iter().map(|s| s.name).collect();
        assert_eq!(listed, vec!["keep", "new"]);
    }

    #[test]
    fn test_sync_with_duplicates_changes_nothing() {
        let registry = HookRegistry::new();
        registry.register(def("a", 1)).unwrap();

        let err = registry.sync(vec![def("b", 1), def("b", 2)]).unwrap_err();
        assert!(matches!(err, HookError::DuplicateName { .. }));
        assert_eq!(names(&registry.lookup_chain(HookEvent::ExecjobEnd)), vec!["a"]);
    }
}
