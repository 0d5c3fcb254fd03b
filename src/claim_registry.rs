use std::fs;
use std::fs::OpenOptions;
use std::path::Path;

use fs2::FileExt;

use crate::error::{LoomError, Result};
use crate::models::claim::Claim;
use crate::paths::LoomPaths;

/// Result of a registry operation, carrying the claim document touched so
/// callers (CLI output, tests) can report detail without a second read.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Acquired(Claim),
    Released(Claim),
    Extended(Claim),
}

fn read_claim(claim_file: &Path) -> Option<Claim> {
    fs::read(claim_file).ok().and_then(|b| serde_json::from_slice(&b).ok())
}

/// Creates the claim directory if absent and holds an advisory lock on a
/// `.lock` file inside it for the duration of `f`, serializing the
/// read-check-write against every other process touching this issue's claim.
/// The lock only ever needs to be held for a read-modify-write, never for the
/// claim's own TTL lifetime.
fn with_lock<T>(dir: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    fs::create_dir_all(dir)?;
    let lock_path = dir.join(".lock");
    let lock_file = OpenOptions::new().create(true).write(true).open(&lock_path)?;
    lock_file.lock_exclusive()?;
    let result = f();
    lock_file.unlock().ok();
    result
}

/// Acquires an advisory claim on `issue` for `agent_id`. Succeeds if the
/// issue is unclaimed, the existing claim is expired, the lock directory was
/// left behind without a claim file (an interrupted prior claim), or the
/// existing claim is already held by this same agent (renewal).
pub fn acquire(paths: &LoomPaths, issue: u64, agent_id: &str, ttl_seconds: u64) -> Result<ClaimOutcome> {
    let dir = paths.claim_dir(issue);
    let claim_file = paths.claim_file(issue);
    with_lock(&dir, || {
        if let Some(existing) = read_claim(&claim_file) {
            if !existing.is_expired(chrono::Utc::now()) && existing.agent_id != agent_id {
                return Err(LoomError::AlreadyClaimed(issue));
            }
        }
        let claim = Claim::new(issue, agent_id, ttl_seconds);
        crate::store::write(&claim_file, &claim)?;
        Ok(ClaimOutcome::Acquired(claim))
    })
}

/// Renews an existing claim's TTL. `agent_id` must match the current holder.
pub fn extend(paths: &LoomPaths, issue: u64, agent_id: &str, ttl_seconds: u64) -> Result<ClaimOutcome> {
    let dir = paths.claim_dir(issue);
    let claim_file = paths.claim_file(issue);
    with_lock(&dir, || {
        let Some(mut claim) = read_claim(&claim_file) else {
            return Err(LoomError::ClaimNotFound(issue));
        };
        if claim.agent_id != agent_id {
            return Err(LoomError::WrongAgent(issue, claim.agent_id.clone()));
        }
        claim.extend(ttl_seconds);
        crate::store::write(&claim_file, &claim)?;
        Ok(ClaimOutcome::Extended(claim))
    })
}

/// Releases a claim. `agent_id` of `None` force-releases regardless of
/// holder; `Some` must match the current holder.
pub fn release(paths: &LoomPaths, issue: u64, agent_id: Option<&str>) -> Result<ClaimOutcome> {
    let dir = paths.claim_dir(issue);
    let claim_file = paths.claim_file(issue);
    let claim = with_lock(&dir, || {
        let Some(claim) = read_claim(&claim_file) else {
            return Err(LoomError::ClaimNotFound(issue));
        };
        if let Some(agent_id) = agent_id {
            if claim.agent_id != agent_id {
                return Err(LoomError::WrongAgent(issue, claim.agent_id.clone()));
            }
        }
        Ok(claim)
    })?;
    // The lock file handle above is already closed by the time with_lock
    // returns, so removing the directory it lived in is safe here.
    fs::remove_dir_all(&dir).ok();
    Ok(ClaimOutcome::Released(claim))
}

/// Returns the current claim on `issue`, or `None` if absent or expired.
pub fn check(paths: &LoomPaths, issue: u64) -> Option<Claim> {
    let claim = read_claim(&paths.claim_file(issue))?;
    if claim.is_expired(chrono::Utc::now()) {
        None
    } else {
        Some(claim)
    }
}

/// Lists every claim with a readable document, expired or not, sorted by
/// issue number.
pub fn list(paths: &LoomPaths) -> Vec<Claim> {
    let Ok(entries) = fs::read_dir(paths.claims_dir()) else { return Vec::new() };
    let mut claims: Vec<Claim> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| read_claim(&e.path().join("claim.json")))
        .collect();
    claims.sort_by_key(|c| c.issue);
    claims
}

fn issue_from_claim_dir(dir: &Path) -> Option<u64> {
    dir.file_name()?.to_str()?.strip_prefix("issue-")?.strip_suffix(".lock")?.parse().ok()
}

/// Removes claim directories that are expired or were left behind without a
/// claim document (an interrupted acquire). Returns the issue numbers
/// removed.
pub fn cleanup(paths: &LoomPaths) -> Vec<u64> {
    let Ok(entries) = fs::read_dir(paths.claims_dir()) else { return Vec::new() };
    let now = chrono::Utc::now();
    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let stale = match read_claim(&dir.join("claim.json")) {
            Some(claim) => claim.is_expired(now),
            None => true,
        };
        if stale {
            if let Some(issue) = issue_from_claim_dir(&dir) {
                removed.push(issue);
            }
            let _ = fs::remove_dir_all(&dir);
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_then_reject_other_agent() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        assert!(matches!(acquire(&paths, 1, "agent-a", 3600), Ok(ClaimOutcome::Acquired(_))));
        assert!(matches!(acquire(&paths, 1, "agent-b", 3600), Err(LoomError::AlreadyClaimed(1))));
        // same agent may renew
        assert!(matches!(acquire(&paths, 1, "agent-a", 7200), Ok(ClaimOutcome::Acquired(_))));
    }

    #[test]
    fn expired_claim_can_be_taken_over() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        acquire(&paths, 2, "agent-a", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(matches!(acquire(&paths, 2, "agent-b", 3600), Ok(ClaimOutcome::Acquired(_))));
    }

    #[test]
    fn incomplete_claim_directory_is_reclaimable() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        fs::create_dir_all(paths.claim_dir(3)).unwrap();
        assert!(matches!(acquire(&paths, 3, "agent-a", 3600), Ok(ClaimOutcome::Acquired(_))));
    }

    #[test]
    fn release_removes_the_claim_directory() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        acquire(&paths, 4, "agent-a", 3600).unwrap();
        release(&paths, 4, Some("agent-a")).unwrap();
        assert!(!paths.claim_dir(4).exists());
        assert!(matches!(release(&paths, 4, Some("agent-a")), Err(LoomError::ClaimNotFound(4))));
    }

    #[test]
    fn release_rejects_wrong_agent_but_force_release_ignores_it() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        acquire(&paths, 5, "agent-a", 3600).unwrap();
        assert!(matches!(release(&paths, 5, Some("agent-b")), Err(LoomError::WrongAgent(5, _))));
        assert!(matches!(release(&paths, 5, None), Ok(ClaimOutcome::Released(_))));
    }

    #[test]
    fn extend_updates_ttl_and_rejects_other_agent() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        acquire(&paths, 6, "agent-a", 60).unwrap();
        assert!(matches!(extend(&paths, 6, "agent-b", 7200), Err(LoomError::WrongAgent(6, _))));
        match extend(&paths, 6, "agent-a", 7200).unwrap() {
            ClaimOutcome::Extended(claim) => assert_eq!(claim.ttl_seconds, 7200),
            _ => panic!("expected Extended"),
        }
    }

    #[test]
    fn check_treats_expired_as_absent() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        assert!(check(&paths, 7).is_none());
        acquire(&paths, 7, "agent-a", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(check(&paths, 7).is_none());
    }

    #[test]
    fn list_and_cleanup_drop_expired_entries() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        acquire(&paths, 8, "agent-a", 3600).unwrap();
        acquire(&paths, 9, "agent-b", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(list(&paths).len(), 2);
        let removed = cleanup(&paths);
        assert_eq!(removed, vec![9]);
        assert_eq!(list(&paths).len(), 1);
        assert!(paths.claim_dir(8).exists());
        assert!(!paths.claim_dir(9).exists());
    }

    #[test]
    fn concurrent_acquires_on_the_same_issue_serialize_without_corruption() {
        use std::sync::{Arc, Barrier};
        let tmp = TempDir::new().unwrap();
        let paths = Arc::new(LoomPaths::new(tmp.path()));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let paths = paths.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    acquire(&paths, 99, &format!("agent-{i}"), 3600).is_ok()
                })
            })
            .collect();

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| **r).count(), 1, "exactly one racer should win the claim");
    }
}
