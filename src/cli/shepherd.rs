use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::paths::LoomPaths;
use crate::session::SessionManager;
use crate::shepherd::config::{ExecutionMode, ShepherdConfig};
use crate::shepherd::context::ShepherdContext;
use crate::shepherd::contracts;
use crate::shepherd::phase::{Phase, PhaseStatus};
use crate::shepherd::phases::{approval, builder, curator, doctor, judge, merge, rebase, reflection};
use crate::shepherd::runner::{run_doctor_judge_loop, run_phase};

use super::exit_code;

#[derive(Args)]
pub struct ShepherdArgs {
    /// Issue number to drive through its phases.
    issue: u64,
    /// Merge automatically once the PR carries loom:pr.
    #[arg(long)]
    force_merge: bool,
}

/// Runs the Curator -> Approval -> Builder -> (Judge/Doctor loop) -> Rebase
/// -> Merge -> Reflection pipeline for one issue. Any
/// non-success result from an earlier phase short-circuits the rest, except
/// Reflection, which always runs best-effort.
pub fn run(args: ShepherdArgs) -> Result<i32> {
    let paths = LoomPaths::new(super::repo_root());
    let config = Config::from_env();
    let sessions = SessionManager::new();

    let mode = if args.force_merge { ExecutionMode::ForceMerge } else { ExecutionMode::Default };
    let shepherd_config = ShepherdConfig::new(args.issue, mode);
    let mut ctx = ShepherdContext::new(shepherd_config, paths);

    if let Err(err) = ctx.validate_issue() {
        eprintln!("{err}");
        return Ok(exit_code::NOT_FOUND);
    }

    ctx.report_milestone(crate::models::progress::MilestoneEvent::Started, {
        let mut m = serde_json::Map::new();
        m.insert("issue".into(), serde_json::json!(ctx.config.issue));
        m
    })?;

    let mut retries = 0u32;
    let final_status = loop {
        let curator = run_phase(&curator::CuratorPhase, &mut ctx, &sessions, &config, contracts::CURATOR_CONTRACTS)?;
        if !curator.is_success() {
            break curator.status;
        }

        let approval = run_phase(&approval::ApprovalPhase, &mut ctx, &sessions, &config, &[])?;
        if !approval.is_success() {
            break approval.status;
        }

        let builder = run_phase(&builder::BuilderPhase, &mut ctx, &sessions, &config, contracts::BUILDER_CONTRACTS)?;
        if !builder.is_success() {
            if builder.status == PhaseStatus::Failed {
                retries += 1;
            }
            break builder.status;
        }
        if let Some(pr) = builder.data.get("pr_number").and_then(|v| v.as_u64()) {
            ctx.pr_number = Some(pr);
        }

        let judge_phase = judge::JudgePhase;
        let judge_result =
            run_doctor_judge_loop(&mut ctx, &sessions, &config, &judge_phase as &dyn Phase, || {
                Box::new(doctor::DoctorPhase)
            })?;
        if !judge_result.is_success() {
            if judge_result.status == PhaseStatus::Failed {
                retries += 1;
            }
            break judge_result.status;
        }

        let rebase_result = run_phase(&rebase::RebasePhase, &mut ctx, &sessions, &config, &[])?;
        if !rebase_result.is_success() {
            break rebase_result.status;
        }

        let merge_result = run_phase(&merge::MergePhase, &mut ctx, &sessions, &config, contracts::MERGE_CONTRACTS)?;
        break merge_result.status;
    };

    reflection::run_reflection(&ctx, &ctx.completed_phases, retries);

    match final_status {
        PhaseStatus::Success | PhaseStatus::Skipped => {
            ctx.report_milestone(crate::models::progress::MilestoneEvent::Completed, Default::default())?;
            Ok(exit_code::SUCCESS)
        }
        PhaseStatus::Shutdown => Ok(exit_code::SHUTDOWN),
        PhaseStatus::Stuck => Ok(exit_code::STUCK),
        PhaseStatus::Failed => Ok(exit_code::FAILURE),
    }
}
