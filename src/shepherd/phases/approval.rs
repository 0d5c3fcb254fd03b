use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::config::ExecutionMode;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};

/// Gates on loom:issue. Default and ForceMerge modes auto-approve by adding
/// the label unconditionally; the legacy Normal mode waits for a human to
/// add it (returns Skipped rather than Failed — "not yet" is not an error).
pub struct ApprovalPhase;

impl Phase for ApprovalPhase {
    fn name(&self) -> &'static str {
        "approval"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if ctx.has_issue_label("loom:issue") {
            return (true, "issue already approved".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, _sessions: &SessionManager, _config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }
        if ctx.config.mode.should_auto_approve() {
            ctx.github.issue_add_label(ctx.config.issue, "loom:issue")?;
            return Ok(PhaseResult::success(self.name(), "auto-approved"));
        }
        if matches!(ctx.config.mode, ExecutionMode::Normal) {
            return Ok(PhaseResult::skipped(self.name(), "waiting for human approval"));
        }
        Ok(PhaseResult::success(self.name(), "approved"))
    }

    fn validate(&self, ctx: &ShepherdContext) -> bool {
        ctx.has_issue_label("loom:issue")
    }
}
