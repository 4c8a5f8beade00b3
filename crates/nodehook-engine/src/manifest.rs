//! Hook manifest: the TOML file administrators use to install hooks on a node.
//!
//! ```toml
//! [[hook]]
//! name = "execjob_end_logmsg"
//! event = "execjob_end"
//! order = 1
//! alarm = 50
//! script = """
//! echo "executed execjob_end hook"
//! echo "nodehook:accept"
//! """
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HookError, Result};
use crate::hooks::definition::validate_fields;
use crate::hooks::{HookBody, HookDefinition, HookEvent, DEFAULT_ORDER};

/// Interpreter used when an entry doesn't name one
pub const DEFAULT_INTERPRETER: &str = "sh";

/// Serializable hook entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    pub name: String,
    pub event: HookEvent,

    #[serde(default = "default_order")]
    pub order: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Alarm in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Inline hook source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    /// Hook source on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Where a hook's source lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySource<'a> {
    Inline(&'a str),
    File(&'a Path),
}

impl HookSpec {
    pub fn interpreter(&self) -> &str {
        self.interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER)
    }

    pub fn source(&self) -> Result<BodySource<'_>> {
        match (&self.script, &self.path) {
            (Some(script), None) => Ok(BodySource::Inline(script)),
            (None, Some(path)) => Ok(BodySource::File(path)),
            (Some(_), Some(_)) => Err(HookError::invalid(
                &self.name,
                "set either 'script' or 'path', not both",
            )),
            (None, None) => Err(HookError::invalid(&self.name, "missing 'script' or 'path'")),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_fields(&self.name, self.order, self.alarm)?;
        self.source()?;
        Ok(())
    }

    pub fn to_definition(&self, factory: &dyn BodyFactory) -> Result<HookDefinition> {
        self.validate()?;
        let body = factory
            .build(self)
            .map_err(|e| HookError::invalid(&self.name, format!("{:#}", e)))?;

        Ok(HookDefinition {
            name: self.name.clone(),
            event: self.event,
            order: self.order,
            enabled: self.enabled,
            alarm_secs: self.alarm,
            body,
        })
    }
}

/// Turns manifest entries into executable bodies
pub trait BodyFactory: Send + Sync {
    fn build(&self, spec: &HookSpec) -> anyhow::Result<Arc<dyn HookBody>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookManifest {
    #[serde(default, rename = "hook")]
    pub hooks: Vec<HookSpec>,
}

impl HookManifest {
    /// Parse and validate
    pub fn parse(content: &str) -> Result<Self> {
        let manifest: HookManifest =
            toml::from_str(content).map_err(|e| HookError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HookError::Manifest(format!("failed to read {:?}: {}", path, e)))?;
        Self::parse(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.hooks {
            spec.validate()?;
            if !seen.insert((spec.event, spec.name.as_str())) {
                return Err(HookError::DuplicateName {
                    name: spec.name.clone(),
                    event: spec.event,
                });
            }
        }
        Ok(())
    }

    pub fn to_definitions(&self, factory: &dyn BodyFactory) -> Result<Vec<HookDefinition>> {
        self.hooks
            .iter()
            .map(|spec| spec.to_definition(factory))
            .collect()
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HookError::Manifest(e.to_string()))
    }
}

fn default_order() -> i32 {
    DEFAULT_ORDER
}

fn default_enabled() -> bool {
    true
}
