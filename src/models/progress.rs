use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// 7 lowercase hex characters, matching the original's
/// `_TASK_ID_RE`.
pub fn task_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{7}$").unwrap())
}

pub fn is_valid_task_id(task_id: &str) -> bool {
    task_id_regex().is_match(task_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneEvent {
    Started,
    PhaseEntered,
    PhaseCompleted,
    WorktreeCreated,
    FirstCommit,
    PrCreated,
    Heartbeat,
    Completed,
    Blocked,
    Error,
}

impl MilestoneEvent {
    /// Fields this event requires in `data`, mirroring the original's
    /// `_REQUIRED` table. Reporting with a missing field is a caller error,
    /// rejected before any file I/O.
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            MilestoneEvent::Started => &["issue"],
            MilestoneEvent::PhaseEntered | MilestoneEvent::PhaseCompleted => &["phase"],
            MilestoneEvent::PrCreated => &["pr_number"],
            MilestoneEvent::Blocked => &["reason"],
            MilestoneEvent::Error => &["error"],
            MilestoneEvent::WorktreeCreated
            | MilestoneEvent::FirstCommit
            | MilestoneEvent::Heartbeat
            | MilestoneEvent::Completed => &[],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub event: MilestoneEvent,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Working,
    Completed,
    Blocked,
    Errored,
    Retrying,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShepherdProgress {
    pub task_id: String,
    pub issue: u64,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub current_phase: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub status: ProgressStatus,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

impl ShepherdProgress {
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) > threshold
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("invalid task_id {0:?}: must be 7 lowercase hex characters")]
    InvalidTaskId(String),
    #[error("event {event:?} requires field {field:?}")]
    MissingField { event: MilestoneEvent, field: &'static str },
}

/// Validates a milestone report before any file I/O happens — required
/// fields and task-id shape are checked first, matching the original's
/// up-front validation in `report_milestone`.
pub fn validate_report(
    task_id: &str,
    event: MilestoneEvent,
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<(), ReportError> {
    if !is_valid_task_id(task_id) {
        return Err(ReportError::InvalidTaskId(task_id.to_string()));
    }
    for field in event.required_fields() {
        if !data.contains_key(*field) {
            return Err(ReportError::MissingField { event, field });
        }
    }
    Ok(())
}

/// Applies an event's side effects to the in-memory progress document,
/// mirroring the original's `_apply_state_updates`: `completed` clears the
/// current phase, `error` chooses `retrying` vs `errored` from `will_retry`.
pub fn apply_event(progress: &mut ShepherdProgress, event: MilestoneEvent, data: &serde_json::Map<String, serde_json::Value>) {
    match event {
        MilestoneEvent::PhaseEntered => {
            if let Some(phase) = data.get("phase").and_then(|v| v.as_str()) {
                progress.current_phase = Some(phase.to_string());
            }
        }
        MilestoneEvent::Completed => {
            progress.status = ProgressStatus::Completed;
            progress.current_phase = None;
        }
        MilestoneEvent::Blocked => {
            progress.status = ProgressStatus::Blocked;
        }
        MilestoneEvent::Error => {
            let will_retry = data.get("will_retry").and_then(|v| v.as_bool()).unwrap_or(false);
            progress.status = if will_retry { ProgressStatus::Retrying } else { ProgressStatus::Errored };
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_task_id_shape() {
        assert!(is_valid_task_id("abc1234"));
        assert!(!is_valid_task_id("ABC1234"));
        assert!(!is_valid_task_id("abc123"));
        assert!(!is_valid_task_id("abc12345"));
    }

    #[test]
    fn started_requires_issue() {
        let data = serde_json::Map::new();
        let err = validate_report("abc1234", MilestoneEvent::Started, &data).unwrap_err();
        assert!(matches!(err, ReportError::MissingField { field: "issue", .. }));
    }

    #[test]
    fn heartbeat_requires_nothing() {
        let data = serde_json::Map::new();
        assert!(validate_report("abc1234", MilestoneEvent::Heartbeat, &data).is_ok());
    }

    #[test]
    fn completed_clears_current_phase() {
        let mut progress = ShepherdProgress {
            task_id: "abc1234".into(),
            issue: 1,
            mode: "default".into(),
            started_at: Utc::now(),
            current_phase: Some("judge".into()),
            last_heartbeat: Utc::now(),
            status: ProgressStatus::Working,
            milestones: vec![],
        };
        apply_event(&mut progress, MilestoneEvent::Completed, &serde_json::Map::new());
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert!(progress.current_phase.is_none());
    }

    #[test]
    fn heartbeat_staleness_is_strict() {
        let now = Utc::now();
        let progress = ShepherdProgress {
            task_id: "abc1234".into(),
            issue: 1,
            mode: "default".into(),
            started_at: now,
            current_phase: None,
            last_heartbeat: now - chrono::Duration::seconds(120),
            status: ProgressStatus::Working,
            milestones: vec![],
        };
        // exactly at threshold is not stale, one second past is
        assert!(!progress.is_stale(now, chrono::Duration::seconds(120)));
        assert!(progress.is_stale(now + chrono::Duration::seconds(1), chrono::Duration::seconds(120)));
    }
}
