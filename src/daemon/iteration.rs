use std::collections::HashSet;
use std::time::Instant;

use crate::config::Config;
use crate::daemon::stall::StallAction;
use crate::github::GitHubAdapter;
use crate::models::daemon_state::{DaemonState, ShepherdEntry, ShepherdStatus};
use crate::models::failure_log::IssueFailureLog;
use crate::models::health_metrics::HealthMetrics;
use crate::paths::LoomPaths;
use crate::session::SessionManager;
use crate::snapshot::{build_snapshot, Snapshot, SnapshotInputs};
use crate::systematic_failure;

/// Everything the tick changed, for the caller to log and feed into stall
/// tracking on the next iteration.
pub struct IterationReport {
    pub snapshot: Snapshot,
    pub actions_taken: Vec<String>,
}

/// Runs one daemon tick: the nine-step sequence (snapshot, stall check,
/// dispatch, rotate, ...) described at the module root. State and the
/// failure log are read at the top and written back, atomically, at the
/// bottom — nothing in between holds a lock across a GitHub call.
pub fn run_iteration(
    config: &Config,
    paths: &LoomPaths,
    github: &GitHubAdapter,
    sessions: &SessionManager,
    stall_action: StallAction,
) -> anyhow::Result<IterationReport> {
    let start = Instant::now();
    let mut succeeded = true;

    // 2. load state (ahead of snapshot build so retries/backoff use it)
    let mut state: DaemonState = crate::store::read(&paths.daemon_state_file());
    let mut failure_log: IssueFailureLog = crate::store::read(&paths.issue_failures_file());
    let mut health: HealthMetrics = crate::store::read(&paths.health_metrics_file());

    state.iteration += 1;
    state.last_poll = chrono::Utc::now();

    // 1. snapshot build
    let raw_ready = github.issues_with_label("loom:ready").unwrap_or_default();
    let raw_building = github.issues_with_label("loom:building").unwrap_or_default();
    let raw_blocked = github.issues_with_label("loom:blocked").unwrap_or_default();
    let raw_review_requested = github.issues_with_label("loom:review-requested").unwrap_or_default();
    let raw_changes_requested = github.issues_with_label("loom:changes-requested").unwrap_or_default();
    let raw_merge_conflict = github.issues_with_label("loom:merge-conflict").unwrap_or_default();

    let progress_by_task = read_all_progress(paths);
    let progress_by_task_for_stall = progress_by_task.clone();
    let live_sessions: HashSet<String> = state
        .shepherds
        .keys()
        .filter(|name| sessions.exists(name))
        .cloned()
        .collect();
    let live_role_sessions: HashSet<String> = ["loom-role-architect", "loom-role-hermit"]
        .into_iter()
        .filter(|name| sessions.exists(name))
        .map(|s| s.to_string())
        .collect();

    let snapshot = build_snapshot(
        config,
        SnapshotInputs {
            state: &state,
            failure_log: &failure_log,
            raw_ready_issues: raw_ready,
            raw_building_issues: raw_building,
            raw_blocked_issues: raw_blocked,
            raw_review_requested,
            raw_changes_requested,
            raw_merge_conflict,
            progress_by_task,
            live_sessions,
            live_role_sessions,
            current_iteration: state.iteration,
        },
    );

    // 3. detect completions: a working shepherd whose issue left the
    // building bucket (merged, closed) is done.
    let mut completed_issues = Vec::new();
    for (name, entry) in state.shepherds.iter_mut() {
        if entry.status != ShepherdStatus::Working {
            continue;
        }
        let Some(issue) = entry.issue else { continue };
        if !snapshot.pipeline.building.contains(&issue) {
            tracing::info!(shepherd = %name, issue, "issue left the building bucket, reclaiming shepherd");
            entry.reclaim("completed");
            completed_issues.push(issue);
        }
    }
    for issue in &completed_issues {
        failure_log.record_success(*issue);
        state.completed_issues.push(*issue);
        state.total_prs_merged += 1;
    }

    // 5. proactive reclaim: working shepherds with a dead session
    let dead: Vec<String> = snapshot.validation.dead_sessions.clone();
    for name in &dead {
        if let Some(entry) = state.shepherds.get_mut(name) {
            tracing::warn!(shepherd = %name, "reclaiming shepherd with dead session");
            entry.reclaim("dead_session");
            succeeded = false;
        }
    }

    // 4 + 6. slots already recomputed in the snapshot; execute recommended
    // actions in the fixed order the snapshot proposed them.
    let mut actions_taken = Vec::new();
    for action in &snapshot.computed.recommended_actions {
        match action.as_str() {
            "spawn_shepherds" => {
                let available = config.max_shepherds.saturating_sub(state.active_shepherds());
                let to_spawn: Vec<u64> = snapshot.pipeline.ready.iter().take(available).copied().collect();
                for issue in to_spawn {
                    let Some(slot_name) = next_idle_slot_name(&mut state, config.max_shepherds) else { break };
                    match spawn_single_shepherd(github, sessions, paths, &slot_name, issue, state.force_mode) {
                        Ok(task_id) => {
                            let entry = state.shepherds.entry(slot_name.clone()).or_insert_with(ShepherdEntry::idle);
                            entry.status = ShepherdStatus::Working;
                            entry.issue = Some(issue);
                            entry.task_id = Some(task_id);
                            entry.started = Some(chrono::Utc::now());
                            entry.last_phase = None;
                            entry.pr_number = None;
                            entry.idle_since = None;
                            entry.idle_reason = None;
                            actions_taken.push(format!("spawned {slot_name} on issue {issue}"));
                        }
                        Err(err) => {
                            tracing::warn!(issue, error = %err, "failed to spawn shepherd");
                            succeeded = false;
                        }
                    }
                }
            }
            "recover_orphans" => {
                for issue in &snapshot.validation.orphaned_building {
                    state.warnings.push(crate::models::daemon_state::Warning::new(
                        "orphaned_building",
                        format!("issue {issue} is loom:building with no owning shepherd"),
                    ));
                }
                actions_taken.push("flagged orphaned building issues".to_string());
            }
            "retry_blocked" => {
                let now = chrono::Utc::now();
                let mut retried = 0u32;
                for issue in &snapshot.pipeline.blocked {
                    let key = issue.to_string();
                    let retry = state.blocked_issue_retries.entry(key).or_default();
                    if retry.retry_exhausted {
                        continue;
                    }
                    let policy = crate::error::retry_policy_for(retry.error_class.as_deref().unwrap_or("unknown"));
                    let cooldown_elapsed = retry
                        .last_retry_at
                        .map(|t| now.signed_duration_since(t) >= chrono::Duration::seconds(policy.cooldown_seconds as i64))
                        .unwrap_or(true);
                    if !cooldown_elapsed {
                        continue;
                    }
                    if github.issue_transition_label(*issue, "loom:blocked", "loom:issue").is_err() {
                        continue;
                    }
                    retry.retry_count += 1;
                    retry.last_retry_at = Some(now);
                    if retry.retry_count >= policy.max_retries {
                        retry.retry_exhausted = true;
                    }
                    let _ = github.issue_comment(*issue, &format!("Retrying after cooldown (attempt {}).", retry.retry_count));
                    retried += 1;
                }
                actions_taken.push(format!("retried {retried} blocked issue(s)"));
            }
            "escalate_blocked" => {
                for (issue_key, retry) in state.blocked_issue_retries.iter_mut() {
                    if retry.retry_exhausted && !retry.escalated_to_human {
                        retry.escalated_to_human = true;
                        if let Ok(issue) = issue_key.parse() {
                            state.needs_human_input.push(crate::models::daemon_state::HumanEscalation {
                                issue,
                                error_class: retry.error_class.clone().unwrap_or_default(),
                                at: chrono::Utc::now(),
                                reason: "retries exhausted".to_string(),
                            });
                        }
                    }
                }
                actions_taken.push("escalated exhausted blocked issues".to_string());
            }
            "promote_proposals" => {
                if !state.force_mode {
                    actions_taken.push("pipeline below threshold, work generation recommended".to_string());
                    continue;
                }
                let proposals = github.issues_with_label("loom:proposal").unwrap_or_default();
                let mut promoted = 0u32;
                for issue in proposals {
                    if github.issue_transition_label(issue, "loom:proposal", "loom:ready").is_ok() {
                        promoted += 1;
                    }
                }
                actions_taken.push(format!("promoted {promoted} proposal issue(s)"));
            }
            other if other.starts_with("spawn_role:") => {
                let role = other.trim_start_matches("spawn_role:").to_string();
                let session_name = format!("loom-role-{role}");
                if sessions.exists(&session_name) {
                    // became alive between snapshot and dispatch: no-op, not an error.
                    continue;
                }
                let now = chrono::Utc::now();
                match role.as_str() {
                    "architect" => state.last_architect_trigger = Some(now),
                    "hermit" => state.last_hermit_trigger = Some(now),
                    _ => {}
                }
                let entry = state.support_roles.entry(role.clone()).or_default();
                entry.status = crate::models::daemon_state::SupportRoleStatus::Running;
                entry.started = Some(now);
                entry.tmux_session = Some(session_name);
                actions_taken.push(format!("triggered support role {role}"));
            }
            _ => {}
        }
    }

    // 7. stall escalation: the level decided from the *previous* tick's
    // counter executes now, inside the same state-locked iteration.
    match stall_action {
        StallAction::Recovery => {
            force_reclaim_stale_shepherds(&mut state, github, sessions, &progress_by_task_for_stall, config);
            for issue in &snapshot.validation.orphaned_building {
                let _ = github.issue_transition_label(*issue, "loom:building", "loom:ready");
            }
            actions_taken.push("stall level 2: force-reclaimed stale shepherds and orphans".to_string());
        }
        StallAction::Restart => {
            restart_pool(&mut state, github, sessions, paths);
            actions_taken.push("stall level 3: restarted shepherd pool".to_string());
        }
        StallAction::Diagnostic | StallAction::None => {}
    }

    // systematic failure detection runs off whatever failures this tick saw
    systematic_failure::detect_systematic_failure(
        &mut state.systematic_failure,
        &state.recent_failures,
        config.systematic_failure_threshold,
        chrono::Duration::from_std(config.systematic_failure_cooldown).unwrap_or(chrono::Duration::seconds(1800)),
    );

    // 8. health metrics
    let duration = start.elapsed().as_secs_f64();
    let timed_out = duration > config.builder_timeout.as_secs_f64();
    health.record_iteration(duration, succeeded, timed_out);

    // 9. write state atomically
    crate::store::write(&paths.daemon_state_file(), &state)?;
    crate::store::write(&paths.issue_failures_file(), &failure_log)?;
    crate::store::write(&paths.health_metrics_file(), &health)?;

    Ok(IterationReport { snapshot, actions_taken })
}

/// Claims `issue` (loom:ready -> loom:building) and spawns a `loom shepherd`
/// session under `slot_name` to drive it. Returns the generated task ID on
/// success; the caller is responsible for unclaiming on error.
fn spawn_single_shepherd(
    github: &GitHubAdapter,
    sessions: &SessionManager,
    paths: &LoomPaths,
    slot_name: &str,
    issue: u64,
    force_mode: bool,
) -> anyhow::Result<String> {
    github.issue_transition_label(issue, "loom:ready", "loom:building")?;

    let task_id = crate::shepherd::config::generate_task_id();
    let command = if force_mode {
        format!("loom shepherd {issue} --force-merge")
    } else {
        format!("loom shepherd {issue}")
    };
    let log_path = paths.logs_dir().join(format!("{slot_name}.log"));
    if let Err(err) = sessions.spawn(slot_name, paths.repo_root(), &log_path, &command) {
        let _ = github.issue_transition_label(issue, "loom:building", "loom:ready");
        return Err(err);
    }
    Ok(task_id)
}

/// Stall Level 2: reclaims every working shepherd whose session is gone or
/// whose progress heartbeat has gone stale, bypassing the usual
/// orphans-only-if-nonempty gate. Unlike the per-tick proactive reclaim
/// (step 5), this also catches a session that's technically alive but whose
/// worker stopped reporting.
fn force_reclaim_stale_shepherds(
    state: &mut DaemonState,
    github: &GitHubAdapter,
    sessions: &SessionManager,
    progress_by_task: &[crate::models::progress::ShepherdProgress],
    config: &Config,
) {
    let threshold = chrono::Duration::from_std(config.heartbeat_stale_threshold).unwrap_or(chrono::Duration::seconds(120));
    let now = chrono::Utc::now();
    let names: Vec<String> = state.shepherds.keys().cloned().collect();
    for name in names {
        let Some(entry) = state.shepherds.get(&name) else { continue };
        if entry.status != ShepherdStatus::Working {
            continue;
        }
        let session_dead = !sessions.exists(&name);
        let heartbeat_stale = entry
            .task_id
            .as_ref()
            .and_then(|task_id| progress_by_task.iter().find(|p| &p.task_id == task_id))
            .map(|p| p.is_stale(now, threshold))
            .unwrap_or(false);
        if !session_dead && !heartbeat_stale {
            continue;
        }
        if let Some(issue) = entry.issue {
            let _ = github.issue_transition_label(issue, "loom:building", "loom:ready");
        }
        let _ = sessions.kill(&name);
        if let Some(entry) = state.shepherds.get_mut(&name) {
            entry.reclaim("stall_force_reclaim");
        }
    }
}

/// Stall Level 3: kills every working shepherd's session, reverts its
/// issue's label, resets its slot to idle, and clears progress files and any
/// active systematic-failure flag.
fn restart_pool(state: &mut DaemonState, github: &GitHubAdapter, sessions: &SessionManager, paths: &LoomPaths) {
    let names: Vec<String> = state.shepherds.keys().cloned().collect();
    for name in names {
        let Some(entry) = state.shepherds.get(&name).cloned() else { continue };
        if entry.status != ShepherdStatus::Working {
            continue;
        }
        if let Some(issue) = entry.issue {
            let _ = github.issue_transition_label(issue, "loom:building", "loom:issue");
        }
        let _ = sessions.kill(&name);
        if let Some(entry) = state.shepherds.get_mut(&name) {
            entry.reclaim("pool_restart");
        }
    }

    if let Ok(entries) = std::fs::read_dir(paths.progress_dir()) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with("shepherd-") && name.ends_with(".json") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    if state.systematic_failure.active {
        state.systematic_failure = crate::models::daemon_state::SystematicFailure::default();
        state.recent_failures.clear();
    }
}

fn next_idle_slot_name(state: &mut DaemonState, max_shepherds: usize) -> Option<String> {
    for i in 0..max_shepherds {
        let name = format!("shepherd-{i}");
        match state.shepherds.get(&name) {
            None => return Some(name),
            Some(entry) if entry.status == ShepherdStatus::Idle => return Some(name),
            _ => continue,
        }
    }
    None
}

fn read_all_progress(paths: &LoomPaths) -> Vec<crate::models::progress::ShepherdProgress> {
    let Ok(entries) = std::fs::read_dir(paths.progress_dir()) else { return Vec::new() };
    entries
        .flatten()
        .filter_map(|e| std::fs::read(e.path()).ok())
        .filter_map(|bytes| serde_json::from_slice(&bytes).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_idle_slot_name_picks_first_free() {
        let mut state = DaemonState::default();
        state.shepherds.insert("shepherd-0".to_string(), {
            let mut e = ShepherdEntry::idle();
            e.status = ShepherdStatus::Working;
            e
        });
        let name = next_idle_slot_name(&mut state, 3).unwrap();
        assert_eq!(name, "shepherd-1");
    }

    #[test]
    fn next_idle_slot_name_none_when_full() {
        let mut state = DaemonState::default();
        for i in 0..3 {
            state.shepherds.insert(format!("shepherd-{i}"), {
                let mut e = ShepherdEntry::idle();
                e.status = ShepherdStatus::Working;
                e
            });
        }
        assert!(next_idle_slot_name(&mut state, 3).is_none());
    }
}
