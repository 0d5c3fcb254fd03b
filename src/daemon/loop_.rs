use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::daemon::iteration::run_iteration;
use crate::daemon::signals::drain_signals;
use crate::daemon::stall::{evaluate_stall, StallAction};
use crate::github::GitHubAdapter;
use crate::models::signal::SignalAction;
use crate::paths::LoomPaths;
use crate::session::SessionManager;

/// Writes the daemon's own PID file, refusing to start if a live process
/// already holds it.
pub fn preflight(paths: &LoomPaths) -> anyhow::Result<()> {
    let pid_file = paths.daemon_pid_file();
    if let Ok(contents) = std::fs::read_to_string(&pid_file) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if crate::session::pid_alive(pid) {
                anyhow::bail!("daemon already running with pid {pid}");
            }
        }
    }
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&pid_file, std::process::id().to_string())?;
    Ok(())
}

/// Rotates the current state file into a numbered archive slot (00-99,
/// wrapping), keeping at most `config.max_archived_sessions` of them.
///
/// Pruning sorts by file modification time rather than slot index: once all
/// 100 slots have been used once, freed low indices get reused, so index
/// order no longer tracks recency.
pub fn rotate_state(paths: &LoomPaths, config: &Config) -> anyhow::Result<()> {
    let current = paths.daemon_state_file();
    if !current.exists() {
        return Ok(());
    }
    let next_index = (0..100u8)
        .find(|i| !paths.archived_state_file(*i).exists())
        .unwrap_or(0);
    std::fs::rename(&current, paths.archived_state_file(next_index))?;

    let mut archived: Vec<(u8, std::time::SystemTime)> = (0..100u8)
        .filter_map(|i| {
            let path = paths.archived_state_file(i);
            let modified = std::fs::metadata(&path).ok()?.modified().ok()?;
            Some((i, modified))
        })
        .collect();
    archived.sort_by_key(|(_, modified)| *modified);
    if archived.len() > config.max_archived_sessions {
        for (i, _) in &archived[..archived.len() - config.max_archived_sessions] {
            let _ = std::fs::remove_file(paths.archived_state_file(*i));
        }
    }
    Ok(())
}

/// Installs SIGINT/SIGTERM handling that flips a shared flag rather than
/// terminating the process immediately, so the current tick can finish and
/// state can be flushed.
pub fn install_shutdown_handler() -> anyhow::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received, finishing current iteration");
        flag.store(true, Ordering::SeqCst);
    })?;
    Ok(shutdown)
}

/// Main loop: preflight, then iterate until asked to stop. Each cycle drains
/// pending signal files first (so a `stop` or `set_max_shepherds` lands
/// before the next tick reads config), ticks once, then sleeps in small
/// increments so a shutdown flag or a fresh signal file is noticed promptly
/// rather than only at the end of a multi-minute poll interval.
pub fn run(paths: &LoomPaths, config: &Config, github: &GitHubAdapter) -> anyhow::Result<()> {
    preflight(paths)?;
    rotate_state(paths, config)?;
    let shutdown = install_shutdown_handler()?;
    let sessions = SessionManager::new();

    let mut max_shepherds = config.max_shepherds;
    let mut stall_counter: u32 = 0;
    let mut prev_building = 0usize;
    let mut prev_ready = 0usize;

    loop {
        if shutdown.load(Ordering::SeqCst) || paths.stop_daemon_file().exists() {
            tracing::info!("daemon stopping");
            break;
        }

        for command in drain_signals(paths) {
            match command.action {
                SignalAction::Stop => {
                    shutdown.store(true, Ordering::SeqCst);
                }
                SignalAction::SetMaxShepherds { count } => {
                    max_shepherds = count;
                }
                other => {
                    tracing::debug!(?other, "signal not yet actionable outside a tick");
                }
            }
        }
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let mut scoped_config = config.clone();
        scoped_config.max_shepherds = max_shepherds;

        // Decided from the counter the *previous* tick left behind, so the
        // action executes inside this tick's own state-locked iteration.
        let stall_action = evaluate_stall(
            stall_counter,
            config.stall_diagnostic_threshold,
            config.stall_recovery_threshold,
            config.stall_restart_threshold,
        );

        match run_iteration(&scoped_config, paths, github, &sessions, stall_action) {
            Ok(report) => {
                let made_progress =
                    crate::daemon::stall::iteration_made_progress(prev_building, prev_ready, &report.snapshot);
                prev_building = report.snapshot.computed.total_building;
                prev_ready = report.snapshot.computed.total_ready;
                stall_counter = if made_progress { 0 } else { stall_counter + 1 };

                match stall_action {
                    StallAction::Restart => {
                        tracing::error!(stall_counter, "stall escalation: restart executed");
                        stall_counter = 0;
                    }
                    StallAction::Recovery => tracing::warn!(stall_counter, "stall escalation: recovery executed"),
                    StallAction::Diagnostic => tracing::warn!(stall_counter, "stall escalation: diagnostic"),
                    StallAction::None => {}
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "iteration failed");
            }
        }

        responsive_sleep(scoped_config.poll_interval, &shutdown, paths);
    }

    let _ = std::fs::remove_file(paths.daemon_pid_file());
    Ok(())
}

/// Sleeps in 1-second slices instead of one long call, so a shutdown signal
/// or a fresh signal file wakes the loop immediately instead of at the end
/// of the full poll interval (fast-path).
fn responsive_sleep(total: Duration, shutdown: &AtomicBool, paths: &LoomPaths) {
    let mut remaining = total;
    let slice = Duration::from_secs(1);
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        if std::fs::read_dir(paths.signals_dir()).map(|mut d| d.next().is_some()).unwrap_or(false) {
            return;
        }
        let step = slice.min(remaining);
        std::thread::sleep(step);
        remaining -= step;
    }
}
