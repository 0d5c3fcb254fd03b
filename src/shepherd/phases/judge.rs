use crate::config::Config;
use crate::session::SessionManager;
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::phase::{Phase, PhaseResult};
use crate::shepherd::runner::{spawn_worker_with_retry, WorkerOutcome};

/// Runs the review worker. A non-terminal "changes requested" outcome
/// re-enters the Judge/Doctor loop rather than failing the shepherd.
pub struct JudgePhase;

impl Phase for JudgePhase {
    fn name(&self) -> &'static str {
        "judge"
    }

    fn should_skip(&self, ctx: &ShepherdContext) -> (bool, String) {
        if ctx.has_issue_label("loom:pr") {
            return (true, "PR already approved".to_string());
        }
        (false, String::new())
    }

    fn run(&self, ctx: &mut ShepherdContext, sessions: &SessionManager, config: &Config) -> anyhow::Result<PhaseResult> {
        if ctx.check_shutdown() {
            return Ok(PhaseResult::shutdown(self.name()));
        }
        let Some(pr) = ctx.pr_number else {
            return Ok(PhaseResult::failed(self.name(), "no PR to review"));
        };

        match spawn_worker_with_retry(ctx, sessions, config, "judge", config.judge_timeout)? {
            WorkerOutcome::Shutdown => return Ok(PhaseResult::shutdown(self.name())),
            WorkerOutcome::Stuck => return Ok(PhaseResult::stuck(self.name())),
            WorkerOutcome::Exited => {}
        }

        let meta = ctx.github.pr_view(pr)?;
        if meta.has_label("loom:changes-requested") {
            return Ok(PhaseResult::success(self.name(), "changes requested")
                .with_data("changes_requested", serde_json::json!(true)));
        }
        ctx.github.issue_transition_label(pr, "loom:review-requested", "loom:pr")?;
        Ok(PhaseResult::success(self.name(), "review approved"))
    }

    fn validate(&self, ctx: &ShepherdContext) -> bool {
        ctx.has_issue_label("loom:pr")
    }
}
