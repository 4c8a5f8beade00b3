//! Script hooks driven through the real scheduler with `sh`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nodehook_adapters::{install_manifest, ScriptBodyFactory, ScriptHook};
use nodehook_engine::{
    ChainOutcome, ChainState, EngineConfig, EventScheduler, HookDefinition, HookEvent,
    HookManifest, HookRegistry, HookVerdict, SyncReport, TriggerRequest,
};
use serde_json::json;

fn config() -> EngineConfig {
    EngineConfig {
        node_name: "node01".into(),
        kill_grace_ms: 500,
        ..EngineConfig::default()
    }
}

async fn run_one(def: HookDefinition, request: TriggerRequest) -> ChainOutcome {
    let registry = Arc::new(HookRegistry::new());
    registry.register(def).unwrap();
    let scheduler = EventScheduler::new(registry, &config());
    scheduler.trigger(request).unwrap().await.unwrap()
}

fn inline(name: &str, event: HookEvent, script: &str) -> HookDefinition {
    HookDefinition::new(name, event, Arc::new(ScriptHook::inline("sh", script)))
}

// ── Decisions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_script_logs_and_accepts() {
    let def = inline(
        "hook1",
        HookEvent::ExecjobEnd,
        "echo 'executed hook1'\necho nodehook:accept\necho after",
    );
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobEnd, "1.server")).await;

    assert!(outcome.is_accepted());
    assert_eq!(outcome.results[0].log_lines, vec!["executed hook1", "after"]);
}

#[tokio::test]
async fn test_script_rejects_with_reason() {
    let def = inline(
        "hook2",
        HookEvent::ExecjobEnd,
        "echo 'nodehook:reject Job is rejected'",
    );
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobEnd, "2.server")).await;

    assert_eq!(outcome.reason(), Some("Job is rejected"));
    assert_eq!(
        outcome.results[0].verdict,
        HookVerdict::Rejected("Job is rejected".into())
    );
}

#[tokio::test]
async fn test_clean_exit_without_directive_accepts() {
    let def = inline("quiet", HookEvent::ExecjobBegin, "true");
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobBegin, "3.server")).await;
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_failing_script_faults() {
    let def = inline(
        "broken",
        HookEvent::ExecjobBegin,
        "echo 'ImportError: no module pbs' >&2; exit 3",
    );
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobBegin, "4.server")).await;

    match &outcome.results[0].verdict {
        HookVerdict::Faulted(reason) => {
            assert!(reason.contains("exit code 3"), "{}", reason);
            assert!(reason.contains("ImportError: no module pbs"), "{}", reason);
        }
        other => panic!("unexpected verdict {:?}", other),
    }
    assert!(matches!(outcome.state, ChainState::Rejected { index: 0, .. }));
}

#[tokio::test]
async fn test_decision_survives_nonzero_exit() {
    let def = inline("strict", HookEvent::ExecjobBegin, "echo nodehook:accept; exit 1");
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobBegin, "5.server")).await;
    assert!(outcome.is_accepted());
}

// ── Environment ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_script_sees_event_environment() {
    let def = inline(
        "env",
        HookEvent::ExecjobEnd,
        r#"echo "$NODEHOOK_EVENT $NODEHOOK_HOOK_NAME $NODEHOOK_JOB_ID"; echo "$NODEHOOK_DATA""#,
    );
    let request = TriggerRequest::job(HookEvent::ExecjobEnd, "6.server")
        .with_data(json!({ "exit_status": 0 }));
    let outcome = run_one(def, request).await;

    let lines = &outcome.results[0].log_lines;
    assert_eq!(lines[0], "execjob_end env 6.server");
    let data: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(data["exit_status"], 0);
}

#[tokio::test]
async fn test_host_event_has_no_job_id() {
    let def = inline(
        "periodic",
        HookEvent::ExechostPeriodic,
        r#"echo "job=${NODEHOOK_JOB_ID:-none}""#,
    );
    let outcome = run_one(def, TriggerRequest::host(HookEvent::ExechostPeriodic)).await;
    assert_eq!(outcome.results[0].log_lines, vec!["job=none"]);
}

// ── Termination ─────────────────────────────────────────────────────────

/// Killed processes may linger briefly as zombies until reaped
async fn wait_until_dead(pid: &str, limit: Duration) -> bool {
    let proc_stat = format!("/proc/{}/stat", pid.trim());
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        match std::fs::read_to_string(&proc_stat) {
            Err(_) => return true,
            Ok(stat) if stat.contains(") Z") => return true,
            Ok(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alarm_kills_script_process() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());

    let def = inline("runaway", HookEvent::ExecjobEnd, &script).with_alarm(1);

    let started = Instant::now();
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobEnd, "7.server")).await;

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(outcome.state, ChainState::TimedOut { index: 0 });

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    assert!(
        wait_until_dead(&pid, Duration::from_secs(3)).await,
        "hook script process still running"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alarm_kills_processes_forked_by_script() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("pid");
    // The outer shell waits on a child instead of exec'ing into it
    let script = format!(
        "sh -c 'echo $$ > {}; exec sleep 30'; echo after",
        pid_file.display()
    );

    let def = inline("forking", HookEvent::ExecjobEnd, &script).with_alarm(1);
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobEnd, "8.server")).await;

    assert_eq!(outcome.state, ChainState::TimedOut { index: 0 });
    assert!(outcome.results[0].log_lines.is_empty());

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    assert!(
        wait_until_dead(&pid, Duration::from_secs(3)).await,
        "process forked by the hook script outlived the alarm"
    );
}

#[tokio::test]
async fn test_nested_commands_complete_normally() {
    let def = inline("short", HookEvent::ExecjobEnd, "sh -c 'echo nested'; echo done");
    let outcome = run_one(def, TriggerRequest::job(HookEvent::ExecjobEnd, "9.server")).await;

    assert!(outcome.is_accepted());
    assert_eq!(outcome.results[0].log_lines, vec!["nested", "done"]);
}

// ── Manifest ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_manifest_hooks_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("logmsg3.sh"),
        "echo 'executed execjob_end_logmsg3 hook'\n",
    )
    .unwrap();

    let manifest = HookManifest::parse(
        r#"
[[hook]]
name = "execjob_end_logmsg3"
event = "execjob_end"
order = 170
path = "logmsg3.sh"

[[hook]]
name = "execjob_end_logmsg1"
event = "execjob_end"
order = 1
script = "echo 'executed execjob_end_logmsg1 hook'"
"#,
    )
    .unwrap();

    let registry = Arc::new(HookRegistry::new());
    let factory = ScriptBodyFactory::new().with_base_dir(dir.path());
    let report = install_manifest(&registry, &manifest, &factory).unwrap();
    assert_eq!(
        report,
        SyncReport {
            added: 2,
            updated: 0,
            removed: 0
        }
    );

    let scheduler = EventScheduler::new(registry, &config());
    let outcome = scheduler
        .trigger(TriggerRequest::job(HookEvent::ExecjobEnd, "18.server"))
        .unwrap()
        .await
        .unwrap();

    assert!(outcome.is_accepted());
    assert_eq!(
        outcome.executed_hooks(),
        vec!["execjob_end_logmsg1", "execjob_end_logmsg3"]
    );
}

#[test]
fn test_missing_script_file_leaves_registry_untouched() {
    let manifest = HookManifest::parse(
        r#"
[[hook]]
name = "gone"
event = "execjob_end"
path = "/nonexistent/nodehook/gone.sh"
"#,
    )
    .unwrap();

    let registry = HookRegistry::new();
    let result = install_manifest(&registry, &manifest, &ScriptBodyFactory::new());
    assert!(result.is_err());
    assert!(registry.is_empty());
}
