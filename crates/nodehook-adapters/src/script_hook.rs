use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nodehook_engine::{BodyFactory, BodySource, Decision, HookBody, HookInvocation, HookSpec};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Stdout line that accepts the event
pub const ACCEPT_DIRECTIVE: &str = "nodehook:accept";
/// Stdout line prefix that rejects the event; the rest of the line is the reason
pub const REJECT_DIRECTIVE: &str = "nodehook:reject";

const DEFAULT_REJECT_REASON: &str = "rejected by hook script";

#[derive(Debug, Clone)]
enum Script {
    Inline(String),
    File(PathBuf),
}

/// Hook body backed by an external interpreter process.
///
/// The process gets the event through `NODEHOOK_*` environment variables.
/// Stdout lines go to the chain log as they arrive; `nodehook:accept` and
/// `nodehook:reject <reason>` lines record the decision instead.
pub struct ScriptHook {
    interpreter: String,
    script: Script,
}

impl ScriptHook {
    /// Run `<interpreter> -c <script>`
    pub fn inline(interpreter: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: Script::Inline(script.into()),
        }
    }

    /// Run `<interpreter> <path>`
    pub fn file(interpreter: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: Script::File(path.into()),
        }
    }

    fn command(&self, ev: &HookInvocation) -> Result<Command> {
        let mut cmd = Command::new(&self.interpreter);
        match &self.script {
            Script::Inline(source) => cmd.arg("-c").arg(source),
            Script::File(path) => cmd.arg(path),
        };

        cmd.env("NODEHOOK_EVENT", ev.event().as_str())
            .env("NODEHOOK_HOOK_NAME", ev.hook_name())
            .env(
                "NODEHOOK_DATA",
                serde_json::to_string(ev.data()).context("Failed to encode event data")?,
            )
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Alarm and shutdown drop the hook task, which must take the process with it
            .kill_on_drop(true);

        // Own process group, so anything the script forks can be killed with it
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        match ev.job_id() {
            Some(job_id) => cmd.env("NODEHOOK_JOB_ID", job_id),
            None => cmd.env_remove("NODEHOOK_JOB_ID"),
        };

        Ok(cmd)
    }
}

#[async_trait]
impl HookBody for ScriptHook {
    async fn run(&self, ev: HookInvocation) -> Result<()> {
        let mut child = self
            .command(&ev)?
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.interpreter))?;

        debug!(hook = ev.hook_name(), pid = child.id(), "Hook script started");
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout = child.stdout.take().context("Failed to get stdout")?;
        let stderr = child.stderr.take().context("Failed to get stderr")?;

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match parse_directive(&line) {
                    Some(Decision::Accept) => ev.accept(),
                    Some(Decision::Reject(reason)) => ev.reject(reason),
                    None => ev.log(&line),
                }
            }
            Ok::<_, std::io::Error>(())
        };

        let read_stderr = async {
            let mut last = None;
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                debug!(hook = ev.hook_name(), stderr = %line, "Hook script stderr");
                if !line.trim().is_empty() {
                    last = Some(line);
                }
            }
            Ok::<_, std::io::Error>(last)
        };

        let (out, err) = tokio::join!(read_stdout, read_stderr);
        out.context("Failed to read hook script stdout")?;
        let last_stderr = err.context("Failed to read hook script stderr")?;

        let status = child.wait().await.context("Failed to wait for hook script")?;
        group.disarm();

        if ev.decision().is_some() || status.success() {
            return Ok(());
        }

        let exit = match status.code() {
            Some(code) => format!("exit code {}", code),
            None => "termination by signal".to_string(),
        };
        info!(hook = ev.hook_name(), %exit, "Hook script failed without a decision");

        match last_stderr {
            Some(line) => anyhow::bail!("script ended with {}: {}", exit, line),
            None => anyhow::bail!("script ended with {}", exit),
        }
    }

    fn kind(&self) -> &str {
        "script"
    }
}

/// Kills the script's whole process group unless the script exited on its own.
/// Armed while the hook task can still be dropped by the alarm or shutdown.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    // SAFETY: killpg takes plain integers and touches no memory of ours
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, "Hook script process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

/// Recognize a decision line on the script's stdout
pub fn parse_directive(line: &str) -> Option<Decision> {
    let line = line.trim();
    if line == ACCEPT_DIRECTIVE {
        return Some(Decision::Accept);
    }

    let rest = line.strip_prefix(REJECT_DIRECTIVE)?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let reason = rest.trim();
    Some(Decision::Reject(if reason.is_empty() {
        DEFAULT_REJECT_REASON.to_string()
    } else {
        reason.to_string()
    }))
}

/// Builds [`ScriptHook`] bodies for manifest entries. Relative script paths
/// resolve against `base_dir` when one is set.
#[derive(Debug, Clone, Default)]
pub struct ScriptBodyFactory {
    base_dir: Option<PathBuf>,
}

impl ScriptBodyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl BodyFactory for ScriptBodyFactory {
    fn build(&self, spec: &HookSpec) -> Result<Arc<dyn HookBody>> {
        let body = match spec.source()? {
            BodySource::Inline(source) => ScriptHook::inline(spec.interpreter(), source),
            BodySource::File(path) => {
                let path = self.resolve(path);
                if !path.is_file() {
                    anyhow::bail!("hook script {:?} not found", path);
                }
                ScriptHook::file(spec.interpreter(), path)
            }
        };
        Ok(Arc::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directive() {
        assert_eq!(parse_directive("nodehook:accept"), Some(Decision::Accept));
        assert_eq!(parse_directive("  nodehook:accept\r"), Some(Decision::Accept));
        assert_eq!(
            parse_directive("nodehook:reject Job is rejected"),
            Some(Decision::Reject("Job is rejected".into()))
        );
        assert_eq!(
            parse_directive("nodehook:reject"),
            Some(Decision::Reject(DEFAULT_REJECT_REASON.into()))
        );
        assert_eq!(parse_directive("nodehook:rejected"), None);
        assert_eq!(parse_directive("executed hook1"), None);
        assert_eq!(parse_directive("echo nodehook:accept"), None);
    }

    #[test]
    fn test_factory_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("end.sh"), "exit 0\n").unwrap();

        let spec: HookSpec = toml::from_str(
            r#"
name = "end"
event = "execjob_end"
path = "end.sh"
"#,
        )
        .unwrap();

        assert!(ScriptBodyFactory::new().build(&spec).is_err());

        let factory = ScriptBodyFactory::new().with_base_dir(dir.path());
        let body = factory.build(&spec).unwrap();
        assert_eq!(body.kind(), "script");
    }
}
