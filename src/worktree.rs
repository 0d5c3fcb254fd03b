use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::paths::naming;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InUseMarker {
    pub shepherd_task_id: String,
    pub issue: u64,
    pub created_at: DateTime<Utc>,
    pub pid: u32,
}

pub const IN_USE_MARKER_FILENAME: &str = ".loom-in-use";

pub fn write_in_use_marker(worktree: &Path, marker: &InUseMarker) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(marker)?;
    fs::write(worktree.join(IN_USE_MARKER_FILENAME), bytes).context("failed to write in-use marker")
}

pub fn read_in_use_marker(worktree: &Path) -> Option<InUseMarker> {
    let bytes = fs::read(worktree.join(IN_USE_MARKER_FILENAME)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Create a worktree for `issue` at `branch_name(issue)`, rooted under
/// `worktrees_dir`. Shells out to `git worktree add` directly rather than
/// linking a git library.
pub fn create_worktree(repo_root: &Path, worktrees_dir: &Path, issue: u64) -> Result<PathBuf> {
    let path = worktrees_dir.join(naming::worktree_name(issue));
    fs::create_dir_all(worktrees_dir)?;
    if path.exists() {
        bail!("worktree already exists at {}", path.display());
    }
    let branch = naming::branch_name(issue);
    let output = Command::new("git")
        .args(["worktree", "add", "-b", &branch])
        .arg(&path)
        .current_dir(repo_root)
        .output()
        .context("failed to execute git worktree add")?;
    if !output.status.success() {
        bail!("git worktree add failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(path)
}

pub fn remove_worktree(repo_root: &Path, worktree: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["worktree", "remove", "--force"])
        .arg(worktree)
        .current_dir(repo_root)
        .output()
        .context("failed to execute git worktree remove")?;
    if !output.status.success() {
        bail!("git worktree remove failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
}

/// Parses `git worktree list --porcelain` stanzas (`worktree`/`HEAD`/`branch`
/// lines, blank-line separated).
pub fn list_worktrees(repo_root: &Path) -> Result<Vec<WorktreeEntry>> {
    let output = Command::new("git")
        .args(["worktree", "list", "--porcelain"])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git worktree list")?;
    if !output.status.success() {
        bail!("git worktree list failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let mut entries = Vec::new();
    let mut path = None;
    let mut head = None;
    let mut branch = None;
    for line in text.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if let (Some(p), Some(h)) = (path.take(), head.take()) {
                entries.push(WorktreeEntry { path: p, head: h, branch: branch.take() });
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            head = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.to_string());
        }
    }
    Ok(entries)
}

pub fn prune_worktrees(repo_root: &Path) -> Result<()> {
    let output = Command::new("git")
        .args(["worktree", "prune"])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git worktree prune")?;
    if !output.status.success() {
        bail!("git worktree prune failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    Ok(())
}

/// True if a live process (other than `exclude_pid`) has `dir` as its
/// current working directory. Linux: scan `/proc/*/cwd`. Other unix: shell
/// to `lsof`.
#[cfg(target_os = "linux")]
pub fn any_process_using_dir(dir: &Path, exclude_pid: u32) -> bool {
    let Ok(target) = dir.canonicalize() else { return false };
    let Ok(procs) = fs::read_dir("/proc") else { return false };
    for entry in procs.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else { continue };
        if pid == exclude_pid {
            continue;
        }
        if let Ok(cwd) = fs::read_link(entry.path().join("cwd")) {
            if cwd == target {
                return true;
            }
        }
    }
    false
}

#[cfg(not(target_os = "linux"))]
pub fn any_process_using_dir(dir: &Path, exclude_pid: u32) -> bool {
    let Ok(output) = Command::new("lsof").args(["+d"]).arg(dir).args(["-F", "pt"]).output() else {
        return false;
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let mut current_pid: Option<u32> = None;
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix('p') {
            current_pid = rest.parse().ok();
        } else if line.starts_with('t') && line.contains("cwd") {
            if let Some(pid) = current_pid {
                if pid != exclude_pid {
                    return true;
                }
            }
        }
    }
    false
}

/// Checked in order; first match wins.
pub fn is_safe_to_remove(
    worktree: &Path,
    current_cwd: &Path,
    grace_seconds: u64,
    self_pid: u32,
) -> bool {
    if current_cwd.starts_with(worktree) {
        return false;
    }
    if read_in_use_marker(worktree).is_some() {
        return false;
    }
    if any_process_using_dir(worktree, self_pid) {
        return false;
    }
    if within_grace_period(worktree, grace_seconds) {
        return false;
    }
    true
}

fn within_grace_period(worktree: &Path, grace_seconds: u64) -> bool {
    let created = fs::metadata(worktree.join(".git"))
        .and_then(|m| m.modified())
        .or_else(|_| fs::metadata(worktree).and_then(|m| m.created()))
        .ok();
    let Some(created) = created else { return false };
    match created.elapsed() {
        Ok(elapsed) => elapsed.as_secs() < grace_seconds,
        Err(_) => false,
    }
}

pub fn should_reuse_worktree(worktree: &Path, current_cwd: &Path, grace_seconds: u64, self_pid: u32) -> bool {
    !is_safe_to_remove(worktree, current_cwd, grace_seconds, self_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn in_use_marker_round_trips() {
        let dir = TempDir::new().unwrap();
        let marker = InUseMarker {
            shepherd_task_id: "abc1234".into(),
            issue: 7,
            created_at: Utc::now(),
            pid: 123,
        };
        write_in_use_marker(dir.path(), &marker).unwrap();
        let back = read_in_use_marker(dir.path()).unwrap();
        assert_eq!(back.issue, 7);
        assert_eq!(back.shepherd_task_id, "abc1234");
    }

    #[test]
    fn marker_presence_forbids_removal() {
        let dir = TempDir::new().unwrap();
        let marker = InUseMarker {
            shepherd_task_id: "abc1234".into(),
            issue: 7,
            created_at: Utc::now(),
            pid: std::process::id(),
        };
        write_in_use_marker(dir.path(), &marker).unwrap();
        assert!(!is_safe_to_remove(dir.path(), Path::new("/elsewhere"), 0, std::process::id()));
    }

    #[test]
    fn cwd_inside_worktree_forbids_removal() {
        let dir = TempDir::new().unwrap();
        assert!(!is_safe_to_remove(dir.path(), dir.path(), 0, std::process::id()));
    }
}
