use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::github::GitHubAdapter;
use crate::paths::LoomPaths;

use super::exit_code;

#[derive(Args)]
pub struct DaemonArgs {
    #[command(subcommand)]
    action: DaemonAction,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Run the loop in the foreground until stopped.
    Start,
    /// Write the stop-daemon signal file; the daemon clears its own PID file
    /// once it observes it and exits.
    Stop,
    /// Print whether a daemon is currently running.
    Status,
}

pub fn run(args: DaemonArgs) -> Result<i32> {
    let paths = LoomPaths::new(super::repo_root());
    match args.action {
        DaemonAction::Start => {
            let config = Config::from_env();
            let github = GitHubAdapter::new(paths.repo_root());
            crate::daemon::run(&paths, &config, &github)?;
            Ok(exit_code::SUCCESS)
        }
        DaemonAction::Stop => {
            if let Some(parent) = paths.stop_daemon_file().parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(paths.stop_daemon_file(), b"")?;
            println!("stop signal written");
            Ok(exit_code::SUCCESS)
        }
        DaemonAction::Status => {
            let pid_file = paths.daemon_pid_file();
            match std::fs::read_to_string(&pid_file) {
                Ok(contents) => {
                    let pid: u32 = contents.trim().parse().unwrap_or(0);
                    if pid != 0 && crate::session::pid_alive(pid) {
                        println!("running (pid {pid})");
                        Ok(exit_code::SUCCESS)
                    } else {
                        println!("not running (stale pid file)");
                        Ok(exit_code::NOT_FOUND)
                    }
                }
                Err(_) => {
                    println!("not running");
                    Ok(exit_code::NOT_FOUND)
                }
            }
        }
    }
}
