use serde::Serialize;

use crate::config::Config;
use crate::session::SessionManager;

use super::context::ShepherdContext;

/// Direct translation of the original `PhaseStatus` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Success,
    Skipped,
    Failed,
    Shutdown,
    Stuck,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseResult {
    pub status: PhaseStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub phase_name: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl PhaseResult {
    pub fn success(phase_name: &str, message: impl Into<String>) -> Self {
        PhaseResult { status: PhaseStatus::Success, message: message.into(), phase_name: phase_name.into(), data: Default::default() }
    }

    pub fn skipped(phase_name: &str, reason: impl Into<String>) -> Self {
        PhaseResult { status: PhaseStatus::Skipped, message: reason.into(), phase_name: phase_name.into(), data: Default::default() }
    }

    pub fn failed(phase_name: &str, message: impl Into<String>) -> Self {
        PhaseResult { status: PhaseStatus::Failed, message: message.into(), phase_name: phase_name.into(), data: Default::default() }
    }

    pub fn shutdown(phase_name: &str) -> Self {
        PhaseResult {
            status: PhaseStatus::Shutdown,
            message: "shutdown signal received".into(),
            phase_name: phase_name.into(),
            data: Default::default(),
        }
    }

    pub fn stuck(phase_name: &str) -> Self {
        PhaseResult { status: PhaseStatus::Stuck, message: "worker got stuck".into(), phase_name: phase_name.into(), data: Default::default() }
    }

    pub fn with_data(mut self, key: &str, value: serde_json::Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, PhaseStatus::Success | PhaseStatus::Skipped)
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self.status, PhaseStatus::Shutdown)
    }
}

/// Interface every phase implements (direct translation of the original's
/// `PhaseRunner` Protocol).
pub trait Phase {
    fn name(&self) -> &'static str;

    /// `(should_skip, reason)`.
    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String);

    fn run(&self, ctx: &mut ShepherdContext, sessions: &SessionManager, config: &Config) -> anyhow::Result<PhaseResult>;

    fn validate(&self, ctx: &ShepherdContext) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_and_skipped_are_both_is_success() {
        assert!(PhaseResult::success("builder", "ok").is_success());
        assert!(PhaseResult::skipped("builder", "already done").is_success());
        assert!(!PhaseResult::failed("builder", "boom").is_success());
    }

    #[test]
    fn only_shutdown_is_is_shutdown() {
        assert!(PhaseResult::shutdown("judge").is_shutdown());
        assert!(!PhaseResult::stuck("judge").is_shutdown());
    }
}
