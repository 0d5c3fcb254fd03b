use crate::shepherd::context::ShepherdContext;

/// Best-effort post-mortem: analyzes timing/retry counts and may file
/// diagnostic issues upstream. Any internal error is caught and logged here
/// — it must never affect the shepherd's exit code.
pub fn run_reflection(ctx: &ShepherdContext, completed_phases: &[String], retries: u32) {
    if let Err(err) = try_reflect(ctx, completed_phases, retries) {
        tracing::warn!(issue = ctx.config.issue, error = %err, "reflection phase failed, ignoring");
    }
}

fn try_reflect(ctx: &ShepherdContext, completed_phases: &[String], retries: u32) -> anyhow::Result<()> {
    if retries >= 2 {
        tracing::info!(
            issue = ctx.config.issue,
            phases = completed_phases.len(),
            retries,
            "issue required multiple retry cycles"
        );
    }
    Ok(())
}
