use std::path::{Path, PathBuf};

/// Canonical layout of the on-disk state tree, rooted at a repo.
/// Every path the rest of the crate touches is a method here — nothing else
/// hand-builds a ".loom/..." string.
#[derive(Debug, Clone)]
pub struct LoomPaths {
    root: PathBuf,
}

impl LoomPaths {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self { root: repo_root.into() }
    }

    pub fn repo_root(&self) -> &Path {
        &self.root
    }

    pub fn loom_dir(&self) -> PathBuf {
        self.root.join(".loom")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.loom_dir().join("scripts")
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.loom_dir().join("progress")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.loom_dir().join("worktrees")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.loom_dir().join("logs")
    }

    pub fn claims_dir(&self) -> PathBuf {
        self.loom_dir().join("claims")
    }

    pub fn signals_dir(&self) -> PathBuf {
        self.loom_dir().join("signals")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.loom_dir().join("metrics")
    }

    pub fn daemon_state_file(&self) -> PathBuf {
        self.loom_dir().join("daemon-state.json")
    }

    pub fn health_metrics_file(&self) -> PathBuf {
        self.loom_dir().join("health-metrics.json")
    }

    pub fn alerts_file(&self) -> PathBuf {
        self.loom_dir().join("alerts.json")
    }

    pub fn stuck_history_file(&self) -> PathBuf {
        self.loom_dir().join("stuck-history.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.loom_dir().join("config.json")
    }

    pub fn stop_daemon_file(&self) -> PathBuf {
        self.loom_dir().join("stop-daemon")
    }

    pub fn stop_shepherds_file(&self) -> PathBuf {
        self.loom_dir().join("stop-shepherds")
    }

    pub fn baseline_health_file(&self) -> PathBuf {
        self.loom_dir().join("baseline-health.json")
    }

    pub fn usage_cache_file(&self) -> PathBuf {
        self.loom_dir().join("usage-cache.json")
    }

    pub fn issue_failures_file(&self) -> PathBuf {
        self.loom_dir().join("issue-failures.json")
    }

    pub fn daemon_pid_file(&self) -> PathBuf {
        self.loom_dir().join("daemon-loop.pid")
    }

    pub fn recovery_events_file(&self) -> PathBuf {
        self.metrics_dir().join("recovery-events.json")
    }

    pub fn worktree_path(&self, issue: u64) -> PathBuf {
        self.worktrees_dir().join(naming::worktree_name(issue))
    }

    pub fn progress_file(&self, task_id: &str) -> PathBuf {
        self.progress_dir().join(format!("shepherd-{task_id}.json"))
    }

    pub fn builder_log_file(&self, issue: u64) -> PathBuf {
        self.logs_dir().join(format!("loom-builder-issue-{issue}.log"))
    }

    pub fn worker_log_file(&self, role: &str, issue: u64) -> PathBuf {
        self.logs_dir().join(format!("loom-{role}-issue-{issue}.log"))
    }

    pub fn claim_dir(&self, issue: u64) -> PathBuf {
        self.claims_dir().join(format!("issue-{issue}.lock"))
    }

    pub fn claim_file(&self, issue: u64) -> PathBuf {
        self.claim_dir(issue).join("claim.json")
    }

    pub fn archived_state_file(&self, index: u8) -> PathBuf {
        self.loom_dir().join(format!("{index:02}-daemon-state.json"))
    }
}

/// Pure naming helpers: issue <-> branch <-> worktree directory name.
pub mod naming {
    pub fn branch_name(issue: u64) -> String {
        format!("feature/issue-{issue}")
    }

    pub fn worktree_name(issue: u64) -> String {
        format!("issue-{issue}")
    }

    pub fn issue_from_branch(branch: &str) -> Option<u64> {
        branch.strip_prefix("feature/issue-")?.parse().ok()
    }

    pub fn issue_from_worktree(name: &str) -> Option<u64> {
        name.strip_prefix("issue-")?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_round_trips() {
        assert_eq!(naming::branch_name(42), "feature/issue-42");
        assert_eq!(naming::worktree_name(42), "issue-42");
        assert_eq!(naming::issue_from_branch("feature/issue-42"), Some(42));
        assert_eq!(naming::issue_from_worktree("issue-42"), Some(42));
        assert_eq!(naming::issue_from_branch("main"), None);
    }

    #[test]
    fn paths_are_rooted() {
        let p = LoomPaths::new("/repo");
        assert_eq!(p.loom_dir(), PathBuf::from("/repo/.loom"));
        assert_eq!(p.worktree_path(7), PathBuf::from("/repo/.loom/worktrees/issue-7"));
        assert_eq!(
            p.progress_file("abc1234"),
            PathBuf::from("/repo/.loom/progress/shepherd-abc1234.json")
        );
        assert_eq!(
            p.claim_file(7),
            PathBuf::from("/repo/.loom/claims/issue-7.lock/claim.json")
        );
    }
}
