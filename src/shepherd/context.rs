use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::error::LoomError;
use crate::github::GitHubAdapter;
use crate::models::progress::{self, MilestoneEvent};
use crate::paths::LoomPaths;

use super::config::ShepherdConfig;

/// Per-run context threaded through every phase (direct translation of the
/// original `ShepherdContext`).
pub struct ShepherdContext {
    pub config: ShepherdConfig,
    pub paths: LoomPaths,
    pub github: GitHubAdapter,
    pub issue_title: Option<String>,
    pub pr_number: Option<u64>,
    pub worktree_path: PathBuf,
    pub completed_phases: Vec<String>,
    pub label_cache: HashSet<String>,
    progress_initialized: bool,
}

impl ShepherdContext {
    pub fn new(config: ShepherdConfig, paths: LoomPaths) -> Self {
        let worktree_path = paths.worktree_path(config.issue);
        let github = GitHubAdapter::new(paths.repo_root());
        let ctx = ShepherdContext {
            config,
            paths,
            github,
            issue_title: None,
            pr_number: None,
            worktree_path,
            completed_phases: Vec::new(),
            label_cache: HashSet::new(),
            progress_initialized: false,
        };
        ctx.cleanup_stale_progress_for_issue();
        ctx
    }

    /// Removes any progress file for this issue left by a crashed or
    /// orphaned prior run under a different task_id.
    fn cleanup_stale_progress_for_issue(&self) {
        let Ok(entries) = fs::read_dir(self.paths.progress_dir()) else { return };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("shepherd-") || !name.ends_with(".json") {
                continue;
            }
            let Ok(bytes) = fs::read(entry.path()) else { continue };
            let Ok(p): Result<crate::models::progress::ShepherdProgress, _> = serde_json::from_slice(&bytes) else { continue };
            if p.issue == self.config.issue && p.task_id != self.config.task_id {
                let _ = fs::remove_file(entry.path());
            }
        }
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.paths.scripts_dir()
    }

    pub fn progress_dir(&self) -> PathBuf {
        self.paths.progress_dir()
    }

    /// Validates the issue exists, is open, not actually a PR, and is not
    /// blocked (unless force mode, which strips the block label and warns).
    pub fn validate_issue(&mut self) -> Result<(), LoomError> {
        let issue = self.config.issue;
        let meta = self.github.issue_view(issue).map_err(|_| LoomError::IssueNotFound(issue))?;
        if meta.is_actually_a_pr() {
            return Err(LoomError::IssueNotFound(issue));
        }
        if meta.state != "OPEN" {
            return Err(LoomError::IssueClosed(issue, meta.state.clone()));
        }
        self.label_cache = meta.labels.iter().map(|l| l.name.clone()).collect();
        if self.has_issue_label("loom:blocked") {
            if self.config.mode.is_force_mode() {
                tracing::warn!(issue, "force mode: removing loom:blocked to proceed");
                let _ = self.github.issue_remove_label(issue, "loom:blocked");
                self.label_cache.remove("loom:blocked");
            } else {
                return Err(LoomError::IssueBlocked { issue });
            }
        }
        self.issue_title = Some(meta.title);
        Ok(())
    }

    pub fn has_issue_label(&self, label: &str) -> bool {
        self.label_cache.contains(label)
    }

    pub fn has_pr_label(&self, label: &str, pr_labels: &[crate::github::Label]) -> bool {
        let _ = label;
        pr_labels.iter().any(|l| l.name == label)
    }

    pub fn check_shutdown(&self) -> bool {
        self.paths.stop_shepherds_file().exists() || self.has_issue_label("loom:abort")
    }

    /// Writes a milestone. If the progress file doesn't exist yet and the
    /// event isn't `started`, this fails silently (returns `Ok(false)`) —
    /// but the very first `started` failure is logged once.
    pub fn report_milestone(
        &mut self,
        event: MilestoneEvent,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> anyhow::Result<bool> {
        progress::validate_report(&self.config.task_id, event, &data)?;
        let path = self.paths.progress_file(&self.config.task_id);
        let exists = path.exists();
        if !exists && event != MilestoneEvent::Started {
            return Ok(false);
        }

        let mut doc: progress::ShepherdProgress = if exists {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            progress::ShepherdProgress {
                task_id: self.config.task_id.clone(),
                issue: self.config.issue,
                mode: format!("{:?}", self.config.mode),
                started_at: chrono::Utc::now(),
                current_phase: None,
                last_heartbeat: chrono::Utc::now(),
                status: progress::ProgressStatus::Working,
                milestones: Vec::new(),
            }
        };

        doc.last_heartbeat = chrono::Utc::now();
        progress::apply_event(&mut doc, event, &data);
        doc.milestones.push(progress::Milestone { event, timestamp: chrono::Utc::now(), data });

        crate::store::write(&path, &doc)?;

        if event == MilestoneEvent::Started {
            self.progress_initialized = true;
        } else if !self.progress_initialized {
            tracing::warn!(task_id = %self.config.task_id, "reporting milestone before a successful 'started' event");
        }
        Ok(true)
    }
}
