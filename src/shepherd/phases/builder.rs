use std::process::Command;
use std::time::Duration;

use crate::config::Config;
use crate::error::LoomError;
use crate::models::progress::MilestoneEvent;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};
use crate::shepherd::runner::{spawn_worker_with_retry, WorkerOutcome};
use crate::usage::{check_usage, UsageVerdict};
use crate::worktree;

/// Degraded-session detection: a log tail pattern suggesting a rate limit
/// was hit mid-run.
fn log_shows_rate_limit(log: &str) -> bool {
    let lower = log.to_lowercase();
    lower.contains("rate limit") || lower.contains("usage limit reached")
}

fn git_status_porcelain(repo_root: &std::path::Path) -> Vec<String> {
    Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(repo_root)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).lines().map(|l| l.to_string()).collect())
        .unwrap_or_default()
}

fn worktree_has_changes_or_commits(worktree: &std::path::Path, base_branch: &str) -> bool {
    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(worktree)
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(true);
    let has_commits = Command::new("git")
        .args(["rev-list", "--count", &format!("{base_branch}..HEAD")])
        .current_dir(worktree)
        .output()
        .ok()
        .and_then(|o| String::from_utf8_lossy(&o.stdout).trim().parse::<u64>().ok())
        .map(|n| n > 0)
        .unwrap_or(true);
    dirty || has_commits
}

/// True if any worktree commit references an issue other than `assigned`,
/// without also referencing `assigned` ("wrong-issue confusion").
fn commits_reference_wrong_issue(worktree: &std::path::Path, base_branch: &str, assigned: u64) -> Option<u64> {
    let output = Command::new("git")
        .args(["log", "--format=%s", &format!("{base_branch}..HEAD")])
        .current_dir(worktree)
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let re = regex::Regex::new(r"#(\d+)").ok()?;
    let mut other = None;
    let mut mentions_assigned = false;
    for line in text.lines() {
        for cap in re.captures_iter(line) {
            if let Ok(n) = cap[1].parse::<u64>() {
                if n == assigned {
                    mentions_assigned = true;
                } else {
                    other = Some(n);
                }
            }
        }
    }
    if mentions_assigned { None } else { other }
}

pub struct BuilderPhase;

impl Phase for BuilderPhase {
    fn name(&self) -> &'static str {
        "builder"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if ctx.has_issue_label("loom:review-requested") || ctx.has_issue_label("loom:pr") {
            return (true, "a PR already exists for this issue".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, sessions: &SessionManager, config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }

        let usage_cache = ctx.paths.usage_cache_file();
        if let UsageVerdict::RateLimited { session_percent } = check_usage(&usage_cache, Duration::from_secs(60), 99) {
            return Ok(PhaseResult::failed(self.name(), format!("rate limit reached ({session_percent}%)"))
                .with_data("error_class", serde_json::json!("rate_limited")));
        }

        ctx.github.issue_transition_label(ctx.config.issue, "loom:issue", "loom:building")?;

        let baseline_dirty = git_status_porcelain(ctx.paths.repo_root());

        let worktree_path = if ctx.worktree_path.exists() {
            ctx.worktree_path.clone()
        } else {
            worktree::create_worktree(ctx.paths.repo_root(), &ctx.paths.worktrees_dir(), ctx.config.issue)?
        };

        worktree::write_in_use_marker(
            &worktree_path,
            &worktree::InUseMarker {
                shepherd_task_id: ctx.config.task_id.clone(),
                issue: ctx.config.issue,
                created_at: chrono::Utc::now(),
                pid: std::process::id(),
            },
        )?;

        ctx.report_milestone(MilestoneEvent::WorktreeCreated, serde_json::Map::new())?;

        match spawn_worker_with_retry(ctx, sessions, config, "builder", config.builder_timeout)? {
            WorkerOutcome::Shutdown => {
                let _ = ctx.github.issue_transition_label(ctx.config.issue, "loom:building", "loom:issue");
                return Ok(PhaseResult::shutdown(self.name()));
            }
            WorkerOutcome::Stuck => {
                ctx.github.issue_transition_label(ctx.config.issue, "loom:building", "loom:blocked")?;
                let _ = ctx.github.issue_comment(ctx.config.issue, "Builder got stuck and exhausted its retries.");
                return Ok(PhaseResult::stuck(self.name()));
            }
            WorkerOutcome::Exited => {}
        }

        let log_path = ctx.paths.builder_log_file(ctx.config.issue);
        let worker_log = std::fs::read_to_string(&log_path).unwrap_or_default();
        if log_shows_rate_limit(&worker_log) {
            return Ok(PhaseResult::failed(self.name(), "degraded session: rate limit hit mid-run")
                .with_data("degraded_session", serde_json::json!(true)));
        }

        let post_run_dirty = git_status_porcelain(ctx.paths.repo_root());
        let new_dirty: Vec<&String> = post_run_dirty.iter().filter(|l| !baseline_dirty.contains(l)).collect();
        if !new_dirty.is_empty() && !worktree_has_changes_or_commits(&worktree_path, "main") {
            return Err(LoomError::WorktreeEscape(ctx.config.issue).into());
        }

        if let Some(other_issue) = commits_reference_wrong_issue(&worktree_path, "main", ctx.config.issue) {
            return Err(LoomError::WrongIssue { assigned: ctx.config.issue, found: other_issue }.into());
        }

        if !self.validate(ctx) {
            // Auto-recovery: commit dangling changes / add the missing label.
            let _ = ctx.github.issue_add_label(ctx.config.issue, "loom:review-requested");
        }

        let pr_number = ctx.github.pr_for_issue(ctx.config.issue)?;
        ctx.pr_number = pr_number;
        ctx.report_milestone(MilestoneEvent::FirstCommit, serde_json::Map::new())?;
        if let Some(pr) = pr_number {
            let mut data = serde_json::Map::new();
            data.insert("pr_number".into(), serde_json::json!(pr));
            ctx.report_milestone(MilestoneEvent::PrCreated, data)?;
        }

        Ok(PhaseResult::success(self.name(), "builder completed").with_data("pr_number", serde_json::json!(pr_number)))
    }

    fn validate(&self, ctx: &ShepherdContext) -> bool {
        ctx.has_issue_label("loom:review-requested")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_phrases() {
        assert!(log_shows_rate_limit("you have hit a rate limit, please wait"));
        assert!(log_shows_rate_limit("Usage limit reached for this session"));
        assert!(!log_shows_rate_limit("all tests passed"));
    }
}
