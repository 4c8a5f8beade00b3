use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{HookError, Result};
use crate::hooks::HookEvent;
use crate::manifest::HookSpec;

const HOOKS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("hooks");

/// Stored record; `seq` keeps registration order across restarts
#[derive(Debug, Serialize, Deserialize)]
struct StoredHook {
    seq: u64,
    spec: HookSpec,
}

/// Durable on-node copy of installed hooks
pub struct HookStore {
    db: Database,
}

impl HookStore {
    /// Open or create the redb database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(store_err)?;

        // Create table if not exists
        let write_txn = db.begin_write().map_err(store_err)?;
        {
            let _ = write_txn.open_table(HOOKS_TABLE).map_err(store_err)?;
        }
        write_txn.commit().map_err(store_err)?;

        Ok(Self { db })
    }

    /// Insert or replace one hook; replacements keep their sequence
    pub fn put(&self, spec: &HookSpec) -> Result<()> {
        spec.validate()?;
        let key = key(spec.event, &spec.name);

        let write_txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = write_txn.open_table(HOOKS_TABLE).map_err(store_err)?;

            let existing = match table.get(key.as_str()).map_err(store_err)? {
                Some(value) => Some(decode(value.value())?.seq),
                None => None,
            };
            let seq = match existing {
                Some(seq) => seq,
                None => next_seq(&table)?,
            };

            let record = encode(&StoredHook {
                seq,
                spec: spec.clone(),
            })?;
            table
                .insert(key.as_str(), record.as_str())
                .map_err(store_err)?;
        }
        write_txn.commit().map_err(store_err)?;
        Ok(())
    }

    /// Returns whether the hook existed
    pub fn remove(&self, event: HookEvent, name: &str) -> Result<bool> {
        let write_txn = self.db.begin_write().map_err(store_err)?;
        let removed = {
            let mut table = write_txn.open_table(HOOKS_TABLE).map_err(store_err)?;
            let removed = table
                .remove(key(event, name).as_str())
                .map_err(store_err)?
                .is_some();
            removed
        };
        write_txn.commit().map_err(store_err)?;
        Ok(removed)
    }

    /// Replace the whole store in one transaction, sequence = slice order
    pub fn replace_all(&self, specs: &[HookSpec]) -> Result<()> {
        for spec in specs {
            spec.validate()?;
        }

        let write_txn = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = write_txn.open_table(HOOKS_TABLE).map_err(store_err)?;

            let mut stale = Vec::new();
            for entry in table.iter().map_err(store_err)? {
                let (key, _) = entry.map_err(store_err)?;
                stale.push(key.value().to_string());
            }
            for key in stale {
                table.remove(key.as_str()).map_err(store_err)?;
            }

            for (seq, spec) in specs.iter().enumerate() {
                let record = encode(&StoredHook {
                    seq: seq as u64,
                    spec: spec.clone(),
                })?;
                table
                    .insert(key(spec.event, &spec.name).as_str(), record.as_str())
                    .map_err(store_err)?;
            }
        }
        write_txn.commit().map_err(store_err)?;
        Ok(())
    }

    /// All stored hooks in registration order
    pub fn load_all(&self) -> Result<Vec<HookSpec>> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(HOOKS_TABLE).map_err(store_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(store_err)? {
            let (_, value) = entry.map_err(store_err)?;
            records.push(decode(value.value())?);
        }
        records.sort_by_key(|r| r.seq);

        Ok(records.into_iter().map(|r| r.spec).collect())
    }
}

fn key(event: HookEvent, name: &str) -> String {
    format!("{}/{}", event, name)
}

fn next_seq<T: ReadableTable<&'static str, &'static str>>(table: &T) -> Result<u64> {
    let mut max = None;
    for entry in table.iter().map_err(store_err)? {
        let (_, value) = entry.map_err(store_err)?;
        let seq = decode(value.value())?.seq;
        max = Some(max.map_or(seq, |m: u64| m.max(seq)));
    }
    Ok(max.map_or(0, |m| m + 1))
}

fn encode(record: &StoredHook) -> Result<String> {
    serde_json::to_string(record).map_err(|e| HookError::Storage(e.to_string()))
}

fn decode(raw: &str) -> Result<StoredHook> {
    serde_json::from_str(raw).map_err(|e| HookError::Storage(format!("corrupt hook record: {}", e)))
}

fn store_err(e: impl std::fmt::Display) -> HookError {
    HookError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::HookManifest;

    fn spec(name: &str, order: i32) -> HookSpec {
        HookSpec {
            name: name.to_string(),
            event: HookEvent::ExecjobEnd,
            order,
            enabled: true,
            alarm: None,
            interpreter: None,
            script: Some("true".to_string()),
            path: None,
        }
    }

    #[test]
    fn test_put_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::open(dir.path().join("hooks.redb")).unwrap();

        // Inserted "zeta" first: load order follows registration, not key order
        store.put(&spec("zeta", 1)).unwrap();
        store.put(&spec("alpha", 1)).unwrap();
        store.put(&spec("zeta", 5)).unwrap();

        let loaded = store.load_all().unwrap();
        let names: Vec<&str> = loaded.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(loaded[0].order, 5);

        assert!(store.remove(HookEvent::ExecjobEnd, "zeta").unwrap());
        assert!(!store.remove(HookEvent::ExecjobEnd, "zeta").unwrap());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_replace_all_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooks.redb");

        {
            let store = HookStore::open(&path).unwrap();
            store.put(&spec("old", 1)).unwrap();
            let manifest = HookManifest {
                hooks: vec![spec("b", 2), spec("a", 2)],
            };
            store.replace_all(&manifest.hooks).unwrap();
        }

        let store = HookStore::open(&path).unwrap();
        let names: Vec<String> = store.load_all().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_invalid_spec_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = HookStore::open(dir.path().join("hooks.redb")).unwrap();
        let mut bad = spec("bad", 1);
        bad.script = None;
        assert!(store.put(&bad).is_err());
        assert!(store.load_all().unwrap().is_empty());
    }
}
