use anyhow::{Context, Result};
use clap::Args;

use crate::models::progress::{self, MilestoneEvent, ProgressStatus, ShepherdProgress};
use crate::paths::LoomPaths;

use super::exit_code;

#[derive(Args)]
pub struct MilestoneArgs {
    task_id: String,
    issue: u64,
    #[arg(value_enum)]
    event: MilestoneEventArg,
    /// Extra fields required by some events, as `key=value` pairs.
    #[arg(long = "data", value_parser = parse_kv)]
    data: Vec<(String, String)>,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum MilestoneEventArg {
    Started,
    PhaseEntered,
    PhaseCompleted,
    WorktreeCreated,
    FirstCommit,
    PrCreated,
    Heartbeat,
    Completed,
    Blocked,
    Error,
}

impl From<MilestoneEventArg> for MilestoneEvent {
    fn from(value: MilestoneEventArg) -> Self {
        match value {
            MilestoneEventArg::Started => MilestoneEvent::Started,
            MilestoneEventArg::PhaseEntered => MilestoneEvent::PhaseEntered,
            MilestoneEventArg::PhaseCompleted => MilestoneEvent::PhaseCompleted,
            MilestoneEventArg::WorktreeCreated => MilestoneEvent::WorktreeCreated,
            MilestoneEventArg::FirstCommit => MilestoneEvent::FirstCommit,
            MilestoneEventArg::PrCreated => MilestoneEvent::PrCreated,
            MilestoneEventArg::Heartbeat => MilestoneEvent::Heartbeat,
            MilestoneEventArg::Completed => MilestoneEvent::Completed,
            MilestoneEventArg::Blocked => MilestoneEvent::Blocked,
            MilestoneEventArg::Error => MilestoneEvent::Error,
        }
    }
}

fn parse_kv(input: &str) -> Result<(String, String), String> {
    let (key, value) = input.split_once('=').ok_or_else(|| format!("expected key=value, got {input:?}"))?;
    Ok((key.to_string(), value.to_string()))
}

/// Standalone CLI path for reporting a milestone outside of a running
/// shepherd process — used by workers that shell out rather than link
/// against this crate directly.
pub fn run(args: MilestoneArgs) -> Result<i32> {
    let paths = LoomPaths::new(super::repo_root());
    let event: MilestoneEvent = args.event.into();

    let mut data = serde_json::Map::new();
    data.insert("issue".to_string(), serde_json::json!(args.issue));
    for (key, value) in &args.data {
        data.insert(key.clone(), serde_json::Value::String(value.clone()));
    }

    if let Err(err) = progress::validate_report(&args.task_id, event, &data) {
        eprintln!("{err}");
        return Ok(exit_code::FAILURE);
    }

    let path = paths.progress_file(&args.task_id);
    let exists = path.exists();
    if !exists && event != MilestoneEvent::Started {
        return Ok(exit_code::NOT_FOUND);
    }

    let mut doc: ShepherdProgress = if exists {
        serde_json::from_slice(&std::fs::read(&path).context("failed to read progress file")?)?
    } else {
        ShepherdProgress {
            task_id: args.task_id.clone(),
            issue: args.issue,
            mode: "default".to_string(),
            started_at: chrono::Utc::now(),
            current_phase: None,
            last_heartbeat: chrono::Utc::now(),
            status: ProgressStatus::Working,
            milestones: Vec::new(),
        }
    };

    doc.last_heartbeat = chrono::Utc::now();
    progress::apply_event(&mut doc, event, &data);
    doc.milestones.push(progress::Milestone { event, timestamp: chrono::Utc::now(), data });

    crate::store::write(&path, &doc)?;
    println!("milestone recorded: {:?}", event);
    Ok(exit_code::SUCCESS)
}
