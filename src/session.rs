use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Session lifecycle over a terminal multiplexer. A session
/// surviving (`exists`) only proves the shell pane is alive; `worker_alive`
/// additionally confirms a worker process is still running inside it.
pub struct SessionManager;

impl SessionManager {
    pub fn new() -> Self {
        SessionManager
    }

    pub fn spawn(&self, name: &str, worktree: &Path, log_path: &Path, command: &str) -> Result<()> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let shell_cmd = format!("{command} > {} 2>&1", shell_escape::escape(log_path.to_string_lossy()));
        let output = Command::new("tmux")
            .args(["new-session", "-d", "-s", name, "-c"])
            .arg(worktree)
            .arg(shell_cmd)
            .output()
            .context("failed to execute tmux new-session")?;
        if !output.status.success() {
            bail!("tmux new-session failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn kill(&self, name: &str) -> Result<()> {
        let output = Command::new("tmux")
            .args(["kill-session", "-t", name])
            .output()
            .context("failed to execute tmux kill-session")?;
        // killing an already-dead session is not an error condition worth propagating
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("can't find session") {
                bail!("tmux kill-session failed: {stderr}");
            }
        }
        Ok(())
    }

    pub fn capture_output(&self, name: &str) -> Result<String> {
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", name, "-p", "-S", "-"])
            .output()
            .context("failed to execute tmux capture-pane")?;
        if !output.status.success() {
            bail!("tmux capture-pane failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub fn shell_pid(&self, name: &str) -> Option<u32> {
        let output = Command::new("tmux")
            .args(["list-panes", "-t", name, "-F", "#{pane_pid}"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).lines().next()?.trim().parse().ok()
    }

    /// Scans `/proc/<shell_pid>/task/*/children` transitively for any
    /// process whose `/proc/<pid>/comm` matches `worker_name`. Liveness of
    /// the worker, not merely the wrapping shell.
    #[cfg(target_os = "linux")]
    pub fn worker_alive(&self, name: &str, worker_name: &str) -> bool {
        let Some(shell_pid) = self.shell_pid(name) else { return false };
        let mut frontier = vec![shell_pid];
        let mut seen = std::collections::HashSet::new();
        while let Some(pid) = frontier.pop() {
            if !seen.insert(pid) {
                continue;
            }
            if comm_matches(pid, worker_name) {
                return true;
            }
            frontier.extend(children_of(pid));
        }
        false
    }

    #[cfg(not(target_os = "linux"))]
    pub fn worker_alive(&self, name: &str, _worker_name: &str) -> bool {
        self.exists(name)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn comm_matches(pid: u32, worker_name: &str) -> bool {
    fs::read_to_string(format!("/proc/{pid}/comm"))
        .map(|c| c.trim() == worker_name)
        .unwrap_or(false)
}

#[cfg(target_os = "linux")]
fn children_of(pid: u32) -> Vec<u32> {
    let mut out = Vec::new();
    let Ok(tasks) = fs::read_dir(format!("/proc/{pid}/task")) else { return out };
    for task in tasks.flatten() {
        if let Ok(children) = fs::read_to_string(task.path().join("children")) {
            out.extend(children.split_whitespace().filter_map(|s| s.parse().ok()));
        }
    }
    out
}

/// True if process `pid` is alive, via `kill(pid, 0)`.
pub fn pid_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}
