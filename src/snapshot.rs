use serde::Serialize;
use std::collections::HashSet;

use crate::config::Config;
use crate::models::daemon_state::{DaemonState, ShepherdStatus};
use crate::models::failure_log::{passes_backoff_filter, IssueFailureLog};
use crate::models::progress::ShepherdProgress;

/// Issues bucketed by their current GitHub label.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pipeline {
    pub ready: Vec<u64>,
    pub building: Vec<u64>,
    pub blocked: Vec<u64>,
    pub review_requested: Vec<u64>,
    pub changes_requested: Vec<u64>,
    pub ready_to_merge: Vec<u64>,
    pub merge_conflict: Vec<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Validation {
    pub orphaned_building: Vec<u64>,
    pub invalid_task_ids: Vec<String>,
    pub dead_sessions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stalled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Computed {
    pub active_shepherds: usize,
    pub available_shepherd_slots: usize,
    pub total_ready: usize,
    pub total_building: usize,
    pub total_blocked: usize,
    pub needs_work_generation: bool,
    pub recommended_actions: Vec<String>,
    pub health_status: HealthStatus,
    pub health_warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub pipeline: Pipeline,
    pub validation: Validation,
    pub computed: Computed,
}

pub struct SnapshotInputs<'a> {
    pub state: &'a DaemonState,
    pub failure_log: &'a IssueFailureLog,
    pub raw_ready_issues: Vec<u64>,
    pub raw_building_issues: Vec<u64>,
    pub raw_blocked_issues: Vec<u64>,
    pub raw_review_requested: Vec<u64>,
    pub raw_changes_requested: Vec<u64>,
    pub raw_merge_conflict: Vec<u64>,
    pub progress_by_task: Vec<ShepherdProgress>,
    pub live_sessions: HashSet<String>,
    /// Tmux session names, keyed the same way `live_sessions` is, for named
    /// support roles rather than issue-bound shepherd slots.
    pub live_role_sessions: HashSet<String>,
    pub current_iteration: u64,
}

/// A named support singleton and the cooldown governing how often it may be
/// spawned again, per the resolved role-interval-cooldown open question.
struct RoleCooldown {
    name: &'static str,
    last_spawn: Option<chrono::DateTime<chrono::Utc>>,
    interval: std::time::Duration,
}

/// Build a pure, immutable view of system state for this iteration. Input
/// collections are expected pre-fetched (GitHub queries, progress file
/// reads, session liveness) — this function performs no I/O itself.
pub fn build_snapshot(config: &Config, inputs: SnapshotInputs) -> Snapshot {
    let ready: Vec<u64> = inputs
        .raw_ready_issues
        .into_iter()
        .filter(|issue| passes_backoff_filter(inputs.failure_log.failures_for(*issue), inputs.current_iteration))
        .collect();

    let pipeline = Pipeline {
        ready: ready.clone(),
        building: inputs.raw_building_issues.clone(),
        blocked: inputs.raw_blocked_issues.clone(),
        review_requested: inputs.raw_review_requested,
        changes_requested: inputs.raw_changes_requested,
        ready_to_merge: Vec::new(),
        merge_conflict: inputs.raw_merge_conflict,
    };

    let owned_issues: HashSet<u64> = inputs
        .state
        .shepherds
        .values()
        .filter(|e| e.status == ShepherdStatus::Working)
        .filter_map(|e| e.issue)
        .collect();
    let orphaned_building: Vec<u64> =
        pipeline.building.iter().filter(|i| !owned_issues.contains(i)).copied().collect();

    let invalid_task_ids: Vec<String> = inputs
        .progress_by_task
        .iter()
        .filter(|p| !crate::models::progress::is_valid_task_id(&p.task_id))
        .map(|p| p.task_id.clone())
        .collect();

    let dead_sessions: Vec<String> = inputs
        .state
        .shepherds
        .iter()
        .filter(|(_, e)| e.status == ShepherdStatus::Working)
        .filter(|(name, _)| !inputs.live_sessions.contains(*name))
        .map(|(name, _)| name.clone())
        .collect();

    let validation = Validation { orphaned_building, invalid_task_ids, dead_sessions };

    let active_shepherds = inputs.state.active_shepherds();
    let available_shepherd_slots = config.max_shepherds.saturating_sub(active_shepherds);
    let total_ready = pipeline.ready.len();
    let total_building = pipeline.building.len();
    let total_blocked = pipeline.blocked.len();
    let needs_work_generation = total_ready < config.issue_threshold;

    let mut recommended_actions = Vec::new();
    if needs_work_generation {
        recommended_actions.push("promote_proposals".to_string());
    }
    if total_ready > 0 && available_shepherd_slots > 0 {
        recommended_actions.push("spawn_shepherds".to_string());
    }
    if !validation.orphaned_building.is_empty() {
        recommended_actions.push("recover_orphans".to_string());
    }
    if !inputs.state.blocked_issue_retries.is_empty() {
        recommended_actions.push("retry_blocked".to_string());
    }
    if inputs.state.blocked_issue_retries.values().any(|r| r.retry_exhausted && !r.escalated_to_human) {
        recommended_actions.push("escalate_blocked".to_string());
    }

    let now = chrono::Utc::now();
    let roles = [
        RoleCooldown { name: "architect", last_spawn: inputs.state.last_architect_trigger, interval: config.architect_cooldown },
        RoleCooldown { name: "hermit", last_spawn: inputs.state.last_hermit_trigger, interval: config.hermit_cooldown },
    ];
    for role in &roles {
        let session_name = format!("loom-role-{}", role.name);
        if inputs.live_role_sessions.contains(&session_name) {
            continue;
        }
        let due = match role.last_spawn {
            None => true,
            Some(last) => chrono::Duration::from_std(role.interval)
                .map(|interval| now.signed_duration_since(last) >= interval)
                .unwrap_or(true),
        };
        if due {
            recommended_actions.push(format!("spawn_role:{}", role.name));
        }
    }

    let mut health_warnings = Vec::new();
    if inputs.state.systematic_failure.active {
        health_warnings.push(format!(
            "systematic failure active: {}",
            inputs.state.systematic_failure.pattern.clone().unwrap_or_else(|| "unknown".to_string())
        ));
    }
    if !validation.dead_sessions.is_empty() {
        health_warnings.push(format!("{} working shepherd(s) have dead sessions", validation.dead_sessions.len()));
    }
    if !validation.orphaned_building.is_empty() {
        health_warnings.push(format!("{} orphaned building issue(s)", validation.orphaned_building.len()));
    }

    let health_status = if !validation.dead_sessions.is_empty() && active_shepherds > 0 && available_shepherd_slots == 0 {
        HealthStatus::Stalled
    } else if !health_warnings.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let computed = Computed {
        active_shepherds,
        available_shepherd_slots,
        total_ready,
        total_building,
        total_blocked,
        needs_work_generation,
        recommended_actions,
        health_status,
        health_warnings,
    };

    Snapshot { pipeline, validation, computed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs(state: &DaemonState, log: &IssueFailureLog) -> SnapshotInputs<'_> {
        SnapshotInputs {
            state,
            failure_log: log,
            raw_ready_issues: vec![1, 2, 3],
            raw_building_issues: vec![],
            raw_blocked_issues: vec![],
            raw_review_requested: vec![],
            raw_changes_requested: vec![],
            raw_merge_conflict: vec![],
            progress_by_task: vec![],
            live_sessions: HashSet::new(),
            live_role_sessions: HashSet::new(),
            current_iteration: 1,
        }
    }

    #[test]
    fn slot_conservation_holds() {
        let config = Config::default();
        let state = DaemonState::default();
        let log = IssueFailureLog::default();
        let snap = build_snapshot(&config, base_inputs(&state, &log));
        assert_eq!(snap.computed.active_shepherds + snap.computed.available_shepherd_slots, config.max_shepherds);
    }

    #[test]
    fn backoff_filter_applied_before_ready_is_exposed() {
        let config = Config::default();
        let state = DaemonState::default();
        let mut log = IssueFailureLog::default();
        log.record_failure(2, "builder_stuck", "builder", None);
        log.record_failure(2, "builder_stuck", "builder", None);
        log.record_failure(2, "builder_stuck", "builder", None);
        let mut inputs = base_inputs(&state, &log);
        inputs.current_iteration = 1; // 3 failures -> period 5, iteration 1 should be filtered out
        let snap = build_snapshot(&config, inputs);
        assert!(!snap.pipeline.ready.contains(&2));
        assert!(snap.pipeline.ready.contains(&1));
    }

    #[test]
    fn spawn_shepherds_recommended_when_ready_and_slots_available() {
        let config = Config::default();
        let state = DaemonState::default();
        let log = IssueFailureLog::default();
        let snap = build_snapshot(&config, base_inputs(&state, &log));
        assert!(snap.computed.recommended_actions.contains(&"spawn_shepherds".to_string()));
    }
}
