use std::process::Command;

use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};
use crate::shepherd::runner::{spawn_worker_with_retry, WorkerOutcome};

/// Count of commits ahead of `base_branch` in the worktree, used to tell a
/// worker that got stuck after making progress from one that made none.
fn commits_ahead(worktree: &std::path::Path, base_branch: &str) -> u64 {
    Command::new("git")
        .args(["rev-list", "--count", &format!("{base_branch}..HEAD")])
        .current_dir(worktree)
        .output()
        .ok()
        .and_then(|o| String::from_utf8_lossy(&o.stdout).trim().parse().ok())
        .unwrap_or(0)
}

/// Runs the fix worker against judge feedback. A worker that is stuck but
/// already has commits is reported as a soft success ("hung after commit")
/// rather than Stuck, since there's something for Judge to look at.
pub struct DoctorPhase;

impl Phase for DoctorPhase {
    fn name(&self) -> &'static str {
        "doctor"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if !ctx.has_issue_label("loom:changes-requested") {
            return (true, "no changes requested".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, sessions: &SessionManager, config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }

        let before = commits_ahead(&ctx.worktree_path, "main");
        let outcome = spawn_worker_with_retry(ctx, sessions, config, "doctor", config.doctor_timeout)?;
        let commits_made = commits_ahead(&ctx.worktree_path, "main").saturating_sub(before);

        match outcome {
            WorkerOutcome::Shutdown => return Ok(PhaseResult::shutdown(self.name())),
            WorkerOutcome::Stuck => {
                if commits_made > 0 {
                    return Ok(PhaseResult::success(self.name(), "hung after commit")
                        .with_data("commits_made", serde_json::json!(commits_made)));
                }
                return Ok(PhaseResult::stuck(self.name()));
            }
            WorkerOutcome::Exited => {}
        }

        if let Some(pr) = ctx.pr_number {
            ctx.github.issue_remove_label(pr, "loom:changes-requested")?;
            ctx.github.issue_add_label(pr, "loom:review-requested")?;
        }
        Ok(PhaseResult::success(self.name(), "doctor addressed feedback").with_data("commits_made", serde_json::json!(commits_made)))
    }

    fn validate(&self, ctx: &ShepherdContext) -> bool {
        ctx.pr_number.is_some()
    }
}
