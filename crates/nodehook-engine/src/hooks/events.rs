use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HookError;

/// Node lifecycle events hooks can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Job arrived on the node, before any setup
    ExecjobBegin,
    /// Before the job's top shell starts
    ExecjobPrologue,
    /// Job's top shell is about to launch
    ExecjobLaunch,
    /// A task is attaching to a running job
    ExecjobAttach,
    /// Job is about to be terminated (qdel, walltime)
    ExecjobPreterm,
    /// Job's top shell exited
    ExecjobEpilogue,
    /// Job finished and is being cleaned up
    ExecjobEnd,
    /// Periodic check for each running job
    ExecjobPeriodic,
    /// Node agent started
    ExechostStartup,
    /// Periodic host check
    ExechostPeriodic,
}

impl HookEvent {
    pub const ALL: [HookEvent; 10] = [
        HookEvent::ExecjobBegin,
        HookEvent::ExecjobPrologue,
        HookEvent::ExecjobLaunch,
        HookEvent::ExecjobAttach,
        HookEvent::ExecjobPreterm,
        HookEvent::ExecjobEpilogue,
        HookEvent::ExecjobEnd,
        HookEvent::ExecjobPeriodic,
        HookEvent::ExechostStartup,
        HookEvent::ExechostPeriodic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::ExecjobBegin => "execjob_begin",
            HookEvent::ExecjobPrologue => "execjob_prologue",
            HookEvent::ExecjobLaunch => "execjob_launch",
            HookEvent::ExecjobAttach => "execjob_attach",
            HookEvent::ExecjobPreterm => "execjob_preterm",
            HookEvent::ExecjobEpilogue => "execjob_epilogue",
            HookEvent::ExecjobEnd => "execjob_end",
            HookEvent::ExecjobPeriodic => "execjob_periodic",
            HookEvent::ExechostStartup => "exechost_startup",
            HookEvent::ExechostPeriodic => "exechost_periodic",
        }
    }

    /// Whether a trigger for this event must carry a job identifier
    pub fn is_job_scoped(&self) -> bool {
        !matches!(
            self,
            HookEvent::ExechostStartup | HookEvent::ExechostPeriodic
        )
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HookEvent::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| HookError::UnknownEvent(s.to_string()))
    }
}
