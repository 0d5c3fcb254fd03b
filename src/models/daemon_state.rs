use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One daemon session's worth of orchestration state.
///
/// `session_id`, `recent_failures`, and `needs_human_input` are kept even
/// though they're absent from the particular original-source snapshot this
/// was grounded on — other daemon-state dumps in the corpus carry them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub started_at: DateTime<Utc>,
    pub last_poll: DateTime<Utc>,
    pub running: bool,
    pub iteration: u64,
    pub force_mode: bool,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,
    pub session_id: String,
    #[serde(default)]
    pub shepherds: HashMap<String, ShepherdEntry>,
    #[serde(default)]
    pub support_roles: HashMap<String, SupportRoleEntry>,
    #[serde(default)]
    pub pipeline_state: PipelineState,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default)]
    pub completed_issues: Vec<u64>,
    #[serde(default)]
    pub total_prs_merged: u64,
    pub last_architect_trigger: Option<DateTime<Utc>>,
    pub last_hermit_trigger: Option<DateTime<Utc>>,
    #[serde(default)]
    pub systematic_failure: SystematicFailure,
    #[serde(default)]
    pub blocked_issue_retries: HashMap<String, BlockedIssueRetry>,
    /// Bounded to 20 entries; see `push_recent_failure`.
    #[serde(default)]
    pub recent_failures: Vec<RecentFailure>,
    #[serde(default)]
    pub needs_human_input: Vec<HumanEscalation>,
}

fn default_execution_mode() -> String {
    "direct".to_string()
}

impl Default for DaemonState {
    fn default() -> Self {
        let now = Utc::now();
        DaemonState {
            started_at: now,
            last_poll: now,
            running: false,
            iteration: 0,
            force_mode: false,
            execution_mode: default_execution_mode(),
            session_id: uuid::Uuid::new_v4().to_string(),
            shepherds: HashMap::new(),
            support_roles: HashMap::new(),
            pipeline_state: PipelineState::default(),
            warnings: Vec::new(),
            completed_issues: Vec::new(),
            total_prs_merged: 0,
            last_architect_trigger: None,
            last_hermit_trigger: None,
            systematic_failure: SystematicFailure::default(),
            blocked_issue_retries: HashMap::new(),
            recent_failures: Vec::new(),
            needs_human_input: Vec::new(),
        }
    }
}

const RECENT_FAILURES_CAP: usize = 20;

impl DaemonState {
    /// Keeps `recent_failures` at or below the cap, dropping the oldest first.
    pub fn push_recent_failure(&mut self, failure: RecentFailure) {
        self.recent_failures.push(failure);
        if self.recent_failures.len() > RECENT_FAILURES_CAP {
            let overflow = self.recent_failures.len() - RECENT_FAILURES_CAP;
            self.recent_failures.drain(0..overflow);
        }
    }

    /// Invariant: at most one working shepherd owns a given issue. Returns
    /// the slot names that (incorrectly) claim the same issue, for
    /// `validate-state` to report.
    pub fn duplicate_issue_claims(&self) -> Vec<(u64, Vec<String>)> {
        let mut owners: HashMap<u64, Vec<String>> = HashMap::new();
        for (name, entry) in &self.shepherds {
            if entry.status == ShepherdStatus::Working {
                if let Some(issue) = entry.issue {
                    owners.entry(issue).or_default().push(name.clone());
                }
            }
        }
        owners.into_iter().filter(|(_, names)| names.len() > 1).collect()
    }

    pub fn active_shepherds(&self) -> usize {
        self.shepherds
            .values()
            .filter(|e| e.status == ShepherdStatus::Working)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShepherdStatus {
    Idle,
    Working,
    Errored,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShepherdEntry {
    pub status: ShepherdStatus,
    #[serde(default)]
    pub issue: Option<u64>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_phase: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub idle_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub idle_reason: Option<String>,
    #[serde(default)]
    pub last_issue: Option<u64>,
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_mode: Option<String>,
}

impl ShepherdEntry {
    pub fn idle() -> Self {
        ShepherdEntry {
            status: ShepherdStatus::Idle,
            issue: None,
            task_id: None,
            started: None,
            last_phase: None,
            pr_number: None,
            idle_since: Some(Utc::now()),
            idle_reason: None,
            last_issue: None,
            last_completed: None,
            execution_mode: None,
        }
    }

    /// Resets a slot back to idle, preserving `last_issue`/`last_completed`
    /// provenance for post-mortem inspection.
    pub fn reclaim(&mut self, reason: &str) {
        self.last_issue = self.issue;
        self.status = ShepherdStatus::Idle;
        self.issue = None;
        self.task_id = None;
        self.started = None;
        self.last_phase = None;
        self.pr_number = None;
        self.idle_since = Some(Utc::now());
        self.idle_reason = Some(reason.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportRoleStatus {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRoleEntry {
    pub status: SupportRoleStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub tmux_session: Option<String>,
    #[serde(default)]
    pub started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_completed: Option<DateTime<Utc>>,
}

impl Default for SupportRoleEntry {
    fn default() -> Self {
        SupportRoleEntry {
            status: SupportRoleStatus::Idle,
            task_id: None,
            tmux_session: None,
            started: None,
            last_completed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub acknowledged: bool,
}

fn default_severity() -> String {
    "warning".to_string()
}

impl Warning {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Warning {
            time: Utc::now(),
            kind: kind.into(),
            severity: default_severity(),
            message: message.into(),
            context: serde_json::Map::new(),
            acknowledged: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineState {
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub building: Vec<String>,
    #[serde(default)]
    pub review_requested: Vec<String>,
    #[serde(default)]
    pub changes_requested: Vec<String>,
    #[serde(default)]
    pub ready_to_merge: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<serde_json::Value>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystematicFailure {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub count: u32,
    pub detected_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub probe_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BlockedIssueRetry {
    #[serde(default)]
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_exhausted: bool,
    #[serde(default)]
    pub error_class: Option<String>,
    pub last_blocked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_blocked_phase: Option<String>,
    #[serde(default)]
    pub last_blocked_details: Option<String>,
    #[serde(default)]
    pub escalated_to_human: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentFailure {
    pub issue: u64,
    pub error_class: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub force_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanEscalation {
    pub issue: u64,
    pub error_class: String,
    pub at: DateTime<Utc>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_failures_capped_at_twenty() {
        let mut state = DaemonState::default();
        for i in 0..25 {
            state.push_recent_failure(RecentFailure {
                issue: i,
                error_class: "builder_stuck".into(),
                at: Utc::now(),
                force_mode: false,
            });
        }
        assert_eq!(state.recent_failures.len(), 20);
        // oldest five (issues 0..5) should have been dropped
        assert_eq!(state.recent_failures.first().unwrap().issue, 5);
        assert_eq!(state.recent_failures.last().unwrap().issue, 24);
    }

    #[test]
    fn detects_duplicate_issue_claims() {
        let mut state = DaemonState::default();
        let mut a = ShepherdEntry::idle();
        a.status = ShepherdStatus::Working;
        a.issue = Some(5);
        let mut b = ShepherdEntry::idle();
        b.status = ShepherdStatus::Working;
        b.issue = Some(5);
        state.shepherds.insert("shepherd-1".into(), a);
        state.shepherds.insert("shepherd-2".into(), b);
        let dupes = state.duplicate_issue_claims();
        assert_eq!(dupes.len(), 1);
        assert_eq!(dupes[0].0, 5);
    }

    #[test]
    fn reclaim_resets_slot_and_remembers_last_issue() {
        let mut entry = ShepherdEntry::idle();
        entry.status = ShepherdStatus::Working;
        entry.issue = Some(9);
        entry.reclaim("pool_restart");
        assert_eq!(entry.status, ShepherdStatus::Idle);
        assert_eq!(entry.issue, None);
        assert_eq!(entry.last_issue, Some(9));
        assert_eq!(entry.idle_reason.as_deref(), Some("pool_restart"));
    }

    #[test]
    fn round_trip_through_json() {
        let state = DaemonState::default();
        let json = serde_json::to_string(&state).unwrap();
        let back: DaemonState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, state.session_id);
        assert_eq!(back.iteration, state.iteration);
    }
}
