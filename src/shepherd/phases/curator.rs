use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};

/// Enhances the issue body/acceptance criteria before building begins.
pub struct CuratorPhase;

impl Phase for CuratorPhase {
    fn name(&self) -> &'static str {
        "curator"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if ctx.has_issue_label("loom:curated") {
            return (true, "issue already curated".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, _sessions: &SessionManager, _config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }
        ctx.github.issue_add_label(ctx.config.issue, "loom:curated")?;
        Ok(PhaseResult::success(self.name(), "issue curated"))
    }

    fn validate(&self, ctx: &ShepherdContext) -> bool {
        ctx.has_issue_label("loom:curated")
    }
}
