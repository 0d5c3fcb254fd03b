use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};

/// In force mode, merges and deletes the branch. Otherwise, this is a no-op
/// success: the PR is left awaiting a human or the Champion role.
pub struct MergePhase;

impl Phase for MergePhase {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if !ctx.has_issue_label("loom:pr") {
            return (true, "PR not yet approved".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, _sessions: &SessionManager, _config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }
        let Some(pr) = ctx.pr_number else {
            return Ok(PhaseResult::failed(self.name(), "no PR to merge"));
        };
        if ctx.config.mode.is_force_mode() {
            ctx.github.pr_merge(pr, true, true)?;
            return Ok(PhaseResult::success(self.name(), "merged"));
        }
        Ok(PhaseResult::success(self.name(), "awaiting merge"))
    }

    fn validate(&self, _ctx: &ShepherdContext) -> bool {
        true
    }
}
