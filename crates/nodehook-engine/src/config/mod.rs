pub mod watcher;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use watcher::{ManifestEvent, ManifestWatcher};

/// What a chain does when one of its hooks hits the alarm
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Stop the chain, event is not accepted
    #[default]
    Reject,
    /// Record the timeout and run the next hook
    Continue,
}

/// Engine tuning, the `[engine]` table of the daemon config
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_alarm_secs")]
    pub default_alarm_secs: u64,

    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,

    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    #[serde(default = "default_node_name")]
    pub node_name: String,

    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// 0 disables the host-periodic ticker
    #[serde(default = "default_host_periodic_secs")]
    pub host_periodic_secs: u64,
}

impl EngineConfig {
    pub fn default_alarm(&self) -> Duration {
        Duration::from_secs(self.default_alarm_secs.max(1))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn host_periodic(&self) -> Option<Duration> {
        (self.host_periodic_secs > 0).then(|| Duration::from_secs(self.host_periodic_secs))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_alarm_secs: default_alarm_secs(),
            timeout_policy: TimeoutPolicy::default(),
            kill_grace_ms: default_kill_grace_ms(),
            node_name: default_node_name(),
            log_capacity: default_log_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            host_periodic_secs: default_host_periodic_secs(),
        }
    }
}

fn default_alarm_secs() -> u64 {
    30
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

fn default_log_capacity() -> usize {
    1024
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_host_periodic_secs() -> u64 {
    120
}
