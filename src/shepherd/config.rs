use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Curator,
    Approval,
    Builder,
    Judge,
    Doctor,
    Merge,
}

pub const PHASE_ORDER: [Phase; 4] = [Phase::Curator, Phase::Builder, Phase::Judge, Phase::Merge];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Default,
    ForceMerge,
    /// Deprecated, treated identically to `Default`.
    Normal,
}

impl ExecutionMode {
    pub fn is_force_mode(self) -> bool {
        matches!(self, ExecutionMode::ForceMerge)
    }

    pub fn should_auto_approve(self) -> bool {
        !matches!(self, ExecutionMode::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGateLevel {
    Info,
    Warn,
    Block,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityGates {
    pub test_plan: QualityGateLevel,
    pub file_refs: QualityGateLevel,
    pub acceptance_criteria: QualityGateLevel,
    pub vague_criteria: QualityGateLevel,
}

impl Default for QualityGates {
    fn default() -> Self {
        QualityGates {
            test_plan: QualityGateLevel::Info,
            file_refs: QualityGateLevel::Info,
            acceptance_criteria: QualityGateLevel::Warn,
            vague_criteria: QualityGateLevel::Warn,
        }
    }
}

impl QualityGates {
    pub fn strict() -> Self {
        QualityGates {
            test_plan: QualityGateLevel::Block,
            file_refs: QualityGateLevel::Block,
            acceptance_criteria: QualityGateLevel::Block,
            vague_criteria: QualityGateLevel::Block,
        }
    }
}

/// 7 random hex characters, matching the original's
/// `secrets.token_hex(4)[:7]` — drawn from a fresh UUID's hex form since
/// `uuid` is already the crate this codebase uses for randomness.
pub fn generate_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..7].to_string()
}

#[derive(Debug, Clone)]
pub struct ShepherdConfig {
    pub issue: u64,
    pub mode: ExecutionMode,
    pub task_id: String,
    pub start_from: Option<Phase>,
    pub stop_after: Option<Phase>,
    pub worktree_marker_file: &'static str,
    pub quality_gates: QualityGates,
}

impl ShepherdConfig {
    pub fn new(issue: u64, mode: ExecutionMode) -> Self {
        ShepherdConfig {
            issue,
            mode,
            task_id: generate_task_id(),
            start_from: None,
            stop_after: None,
            worktree_marker_file: crate::worktree::IN_USE_MARKER_FILENAME,
            quality_gates: QualityGates::default(),
        }
    }

    pub fn should_skip_phase(&self, phase: Phase) -> bool {
        let Some(start_from) = self.start_from else { return false };
        let Some(start_idx) = PHASE_ORDER.iter().position(|p| *p == start_from) else { return false };
        let Some(phase_idx) = PHASE_ORDER.iter().position(|p| *p == phase) else { return false };
        phase_idx < start_idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_merge_auto_approves_and_is_force_mode() {
        assert!(ExecutionMode::ForceMerge.is_force_mode());
        assert!(ExecutionMode::ForceMerge.should_auto_approve());
        assert!(ExecutionMode::Default.should_auto_approve());
        assert!(!ExecutionMode::Default.is_force_mode());
    }

    #[test]
    fn legacy_normal_mode_does_not_auto_approve() {
        assert!(!ExecutionMode::Normal.should_auto_approve());
    }

    #[test]
    fn should_skip_phase_before_start_from() {
        let mut cfg = ShepherdConfig::new(1, ExecutionMode::Default);
        cfg.start_from = Some(Phase::Judge);
        assert!(cfg.should_skip_phase(Phase::Curator));
        assert!(cfg.should_skip_phase(Phase::Builder));
        assert!(!cfg.should_skip_phase(Phase::Judge));
        assert!(!cfg.should_skip_phase(Phase::Merge));
    }

    #[test]
    fn task_id_is_seven_hex_chars() {
        let id = generate_task_id();
        assert_eq!(id.len(), 7);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
