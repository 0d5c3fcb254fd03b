use std::process::Command;

use crate::config::Config;
use crate::paths::naming;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};

fn branch_behind_main(worktree: &std::path::Path) -> bool {
    Command::new("git")
        .args(["rev-list", "--count", "HEAD..origin/main"])
        .current_dir(worktree)
        .output()
        .ok()
        .and_then(|o| String::from_utf8_lossy(&o.stdout).trim().parse::<u64>().ok())
        .map(|n| n > 0)
        .unwrap_or(false)
}

fn rebase_onto_main(worktree: &std::path::Path) -> bool {
    let fetch = Command::new("git").args(["fetch", "origin", "main"]).current_dir(worktree).output();
    if fetch.map(|o| !o.status.success()).unwrap_or(true) {
        return false;
    }
    let rebase = Command::new("git").args(["rebase", "origin/main"]).current_dir(worktree).output();
    if rebase.map(|o| !o.status.success()).unwrap_or(true) {
        return false;
    }
    let push = Command::new("git")
        .args(["push", "--force-with-lease"])
        .current_dir(worktree)
        .output();
    push.map(|o| o.status.success()).unwrap_or(false)
}

/// Rebases the feature branch onto main if it's behind. On conflict, falls
/// back to GitHub's own mergeability verdict before giving up.
pub struct RebasePhase;

impl Phase for RebasePhase {
    fn name(&self) -> &'static str {
        "rebase"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if !branch_behind_main(&ctx.worktree_path) {
            return (true, "branch is up to date with main".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, _sessions: &SessionManager, _config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }
        if rebase_onto_main(&ctx.worktree_path) {
            return Ok(PhaseResult::success(self.name(), "rebased onto main"));
        }

        let Some(pr) = ctx.pr_number else {
            ctx.github.issue_add_label(ctx.config.issue, "loom:merge-conflict")?;
            return Ok(PhaseResult::failed(self.name(), "rebase failed and no PR to check mergeability"));
        };

        let meta = ctx.github.pr_view(pr)?;
        if meta.state == "MERGED" || meta.is_mergeable_clean() {
            return Ok(PhaseResult::success(self.name(), "github reports PR mergeable")
                .with_data("reason", serde_json::json!("github_mergeable_fallback")));
        }

        ctx.github.issue_add_label(ctx.config.issue, "loom:merge-conflict")?;
        let branch = naming::branch_name(ctx.config.issue);
        ctx.github
            .issue_comment(ctx.config.issue, &format!("Rebase of `{branch}` onto main failed with conflicts."))?;
        Ok(PhaseResult::failed(self.name(), "rebase conflict"))
    }

    fn validate(&self, _ctx: &ShepherdContext) -> bool {
        true
    }
}
