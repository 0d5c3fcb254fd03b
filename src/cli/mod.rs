pub mod claim;
pub mod daemon;
pub mod milestone;
pub mod shepherd;

use clap::{Parser, Subcommand};

/// Exit code conventions used across every subcommand: 0 success,
/// 1 generic failure, 2 not-found/environment error, 3 shutdown requested,
/// 4 stuck/blocked.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const NOT_FOUND: i32 = 2;
    pub const SHUTDOWN: i32 = 3;
    pub const STUCK: i32 = 4;
}

#[derive(Parser)]
#[command(name = "loom", about = "Autonomous software-development orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestration loop.
    Daemon(daemon::DaemonArgs),
    /// Drive a single issue through its phases.
    Shepherd(shepherd::ShepherdArgs),
    /// Claim, release, or inspect an issue lock.
    Claim(claim::ClaimArgs),
    /// Report a shepherd progress milestone.
    Milestone(milestone::MilestoneArgs),
}

pub fn dispatch(command: Command) -> i32 {
    let result = match command {
        Command::Daemon(args) => daemon::run(args),
        Command::Shepherd(args) => shepherd::run(args),
        Command::Claim(args) => claim::run(args),
        Command::Milestone(args) => milestone::run(args),
    };
    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", err);
            exit_code::FAILURE
        }
    }
}

/// Repo root every subcommand operates against: the current directory. The
/// original resolves this the same way, relying on the operator invoking
/// `loom` from inside the repo.
pub(crate) fn repo_root() -> std::path::PathBuf {
    std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
}
