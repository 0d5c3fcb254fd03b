use std::time::{Duration, Instant};

use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::config::Phase as PhaseKind;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::contracts::{self, ContractInputs};
use crate::shepherd::phase::{Phase, PhaseResult, PhaseStatus};

/// Outcome of waiting on a spawned worker session, mirroring the original's
/// exit-code contract (0 success, 3 shutdown, 4 stuck) without the
/// process-exit-code plumbing: tmux sessions don't expose one directly, so
/// liveness is inferred from the session/worker-process check instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Exited,
    Stuck,
    Shutdown,
}

/// Session name a spawned worker runs under, matching the teardown name
/// `run_phase` already computes for the phase itself.
pub fn worker_session_name(role: &str, issue: u64) -> String {
    format!("loom-{role}-issue-{issue}")
}

/// Spawns a worker for `role` and waits for it to exit, retrying on a stuck
/// detection up to the role's configured retry budget. Reports a heartbeat
/// milestone on each retry so operators can see it in progress output.
pub fn spawn_worker_with_retry(
    ctx: &mut ShepherdContext,
    sessions: &SessionManager,
    config: &Config,
    role: &str,
    timeout: Duration,
) -> anyhow::Result<WorkerOutcome> {
    let max_retries = match role {
        "doctor" => config.doctor_max_retries,
        "judge" => config.judge_max_retries,
        _ => config.stuck_max_retries,
    };

    let mut attempt = 0;
    loop {
        let outcome = spawn_worker_once(ctx, sessions, config, role, timeout)?;
        if outcome != WorkerOutcome::Stuck || attempt >= max_retries {
            return Ok(outcome);
        }
        attempt += 1;
        ctx.report_milestone(crate::models::progress::MilestoneEvent::Heartbeat, {
            let mut m = serde_json::Map::new();
            m.insert("action".into(), serde_json::json!(format!("retrying {role} after stuck detection (attempt {attempt})")));
            m
        })?;
    }
}

fn spawn_worker_once(
    ctx: &mut ShepherdContext,
    sessions: &SessionManager,
    config: &Config,
    role: &str,
    timeout: Duration,
) -> anyhow::Result<WorkerOutcome> {
    let issue = ctx.config.issue;
    let session_name = worker_session_name(role, issue);
    let log_path = ctx.paths.worker_log_file(role, issue);
    sessions.spawn(&session_name, &ctx.worktree_path, &log_path, &config.worker_command)?;

    let deadline = Instant::now() + timeout;
    loop {
        if ctx.check_shutdown() {
            let _ = sessions.kill(&session_name);
            return Ok(WorkerOutcome::Shutdown);
        }
        if !sessions.exists(&session_name) || !sessions.worker_alive(&session_name, &config.worker_command) {
            let _ = sessions.kill(&session_name);
            return Ok(WorkerOutcome::Exited);
        }
        if Instant::now() >= deadline {
            let _ = sessions.kill(&session_name);
            return Ok(WorkerOutcome::Stuck);
        }
        std::thread::sleep(config.heartbeat_poll_interval);
    }
}

/// Runs a single phase, with contract checking before and session lifecycle
/// around it. Worker spawning/waiting over tmux is the bulk of
/// the original `PhaseRunner`; the session manager handles that half.
pub fn run_phase(
    phase: &dyn Phase,
    ctx: &mut ShepherdContext,
    sessions: &SessionManager,
    config: &Config,
    contracts: &[contracts::Contract],
) -> anyhow::Result<PhaseResult> {
    let (skip, reason) = phase.should_skip(ctx);
    if skip {
        return Ok(PhaseResult::skipped(phase.name(), reason));
    }

    let issue_meta = ctx.github.issue_view(ctx.config.issue).ok();
    let pr_meta = ctx.pr_number.and_then(|pr| ctx.github.pr_view(pr).ok());
    let inputs = ContractInputs { issue: issue_meta.as_ref(), pr: pr_meta.as_ref() };
    if let Some(violation) = contracts::check_preconditions(contracts, &inputs) {
        contracts::apply_contract_violation(&ctx.github, ctx.config.issue, phase.name(), &violation)?;
        return Ok(PhaseResult::failed(phase.name(), violation.message));
    }

    let session_name = format!("loom-{}-issue-{}", phase.name(), ctx.config.issue);
    ctx.report_milestone(
        crate::models::progress::MilestoneEvent::PhaseEntered,
        {
            let mut m = serde_json::Map::new();
            m.insert("phase".into(), serde_json::json!(phase.name()));
            m
        },
    )?;

    let result = phase.run(ctx, sessions, config);

    // Session teardown is best-effort: a failure to kill the session is
    // logged, never propagated — the phase's own result is authoritative.
    if sessions.exists(&session_name) {
        if let Err(err) = sessions.kill(&session_name) {
            tracing::warn!(session = %session_name, error = %err, "failed to tear down session");
        }
    }

    let result = result?;
    if result.is_success() {
        ctx.completed_phases.push(phase.name().to_string());
        ctx.report_milestone(
            crate::models::progress::MilestoneEvent::PhaseCompleted,
            {
                let mut m = serde_json::Map::new();
                m.insert("phase".into(), serde_json::json!(phase.name()));
                m
            },
        )?;
    }
    Ok(result)
}

/// Doctor/Judge loop: after Builder, repeat Judge -> (if
/// changes requested) Doctor -> Judge, up to `doctor_max_retries` cycles.
pub fn run_doctor_judge_loop(
    ctx: &mut ShepherdContext,
    sessions: &SessionManager,
    config: &Config,
    judge: &dyn Phase,
    doctor_factory: impl Fn() -> Box<dyn Phase>,
) -> anyhow::Result<PhaseResult> {
    for _cycle in 0..=config.doctor_max_retries {
        let judge_result = run_phase(judge, ctx, sessions, config, contracts::JUDGE_CONTRACTS)?;
        if judge_result.status == PhaseStatus::Shutdown {
            return Ok(judge_result);
        }
        let changes_requested = judge_result.data.get("changes_requested").and_then(|v| v.as_bool()).unwrap_or(false);
        if !changes_requested {
            return Ok(judge_result);
        }
        let doctor = doctor_factory();
        let doctor_result = run_phase(doctor.as_ref(), ctx, sessions, config, contracts::DOCTOR_CONTRACTS)?;
        if doctor_result.status == PhaseStatus::Shutdown || doctor_result.status == PhaseStatus::Stuck {
            return Ok(doctor_result);
        }
    }
    Ok(PhaseResult::failed(PhaseKind::Doctor.as_label(), "doctor_exhausted")
        .with_data("error_class", serde_json::json!("doctor_exhausted")))
}

impl PhaseKind {
    pub fn as_label(self) -> &'static str {
        match self {
            PhaseKind::Curator => "curator",
            PhaseKind::Approval => "approval",
            PhaseKind::Builder => "builder",
            PhaseKind::Judge => "judge",
            PhaseKind::Doctor => "doctor",
            PhaseKind::Merge => "merge",
        }
    }
}

/// Bounds a worker process wait to a phase timeout; exceeding it is treated
/// as exit code 4 ("stuck") without killing-then-retrying indefinitely.
pub fn wait_with_timeout(mut child: std::process::Child, timeout: Duration) -> anyhow::Result<Option<i32>> {
    use wait_timeout::ChildExt;
    match child.wait_timeout(timeout)? {
        Some(status) => Ok(status.code()),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Ok(None)
        }
    }
}
