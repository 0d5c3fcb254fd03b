use std::fs;

use anyhow::{Context, Result};

use crate::models::signal::SignalCommand;
use crate::paths::LoomPaths;

/// Consumes pending signal files, one command per file. Each file is
/// unlinked before its command is handed to the caller — a crash mid-handling
/// drops at most one command rather than replaying it.
pub fn drain_signals(paths: &LoomPaths) -> Vec<SignalCommand> {
    let dir = paths.signals_dir();
    let Ok(entries) = fs::read_dir(&dir) else { return Vec::new() };

    let mut names: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    names.sort();

    let mut commands = Vec::new();
    let now = chrono::Utc::now();
    for path in names {
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(bytes) = fs::read(&path) else { continue };
        // Unlink first: a parse failure or crash after this point must not
        // cause the same signal to be reprocessed on the next tick.
        let _ = fs::remove_file(&path);
        let Ok(cmd): Result<SignalCommand, _> = serde_json::from_slice(&bytes) else {
            tracing::warn!(path = %path.display(), "dropping unparsable signal file");
            continue;
        };
        if cmd.is_stale(now) {
            tracing::warn!(path = %path.display(), "dropping stale signal");
            continue;
        }
        commands.push(cmd);
    }
    commands
}

/// Writes `command` back to the queue under a `-requeued` filename suffix so
/// it sorts (by the lexical name ordering `drain_signals` uses) after any
/// freshly-arrived signal rather than being reprocessed first.
pub fn requeue(paths: &LoomPaths, command: &SignalCommand) -> Result<()> {
    let dir = paths.signals_dir();
    fs::create_dir_all(&dir)?;
    let name = format!("cmd-{}-requeued.json", uuid::Uuid::new_v4());
    let bytes = serde_json::to_vec(command).context("failed to serialize requeued signal")?;
    fs::write(dir.join(name), bytes)?;
    Ok(())
}

/// Counts pending signal files without consuming them.
pub fn queue_depth(paths: &LoomPaths) -> usize {
    let Ok(entries) = fs::read_dir(paths.signals_dir()) else { return 0 };
    entries
        .flatten()
        .filter(|e| e.path().extension().and_then(|ext| ext.to_str()) == Some("json"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::signal::SignalAction;
    use tempfile::TempDir;

    fn write_signal(dir: &std::path::Path, name: &str, cmd: &SignalCommand) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), serde_json::to_vec(cmd).unwrap()).unwrap();
    }

    #[test]
    fn drains_and_removes_files() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        let cmd = SignalCommand { action: SignalAction::Stop, created_at: chrono::Utc::now(), ttl_seconds: 3600 };
        write_signal(&paths.signals_dir(), "001.json", &cmd);

        let drained = drain_signals(&paths);
        assert_eq!(drained.len(), 1);
        assert_eq!(fs::read_dir(paths.signals_dir()).unwrap().count(), 0);

        // a second drain finds nothing: at-most-once
        assert!(drain_signals(&paths).is_empty());
    }

    #[test]
    fn stale_signals_are_dropped_not_returned() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        let cmd = SignalCommand {
            action: SignalAction::Stop,
            created_at: chrono::Utc::now() - chrono::Duration::seconds(7200),
            ttl_seconds: 60,
        };
        write_signal(&paths.signals_dir(), "001.json", &cmd);
        assert!(drain_signals(&paths).is_empty());
    }

    #[test]
    fn queue_depth_counts_without_consuming() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        let cmd = SignalCommand { action: SignalAction::Stop, created_at: chrono::Utc::now(), ttl_seconds: 3600 };
        write_signal(&paths.signals_dir(), "001.json", &cmd);
        write_signal(&paths.signals_dir(), "002.json", &cmd);
        assert_eq!(queue_depth(&paths), 2);
        assert_eq!(queue_depth(&paths), 2);
    }

    #[test]
    fn requeue_sorts_after_fresh_signals() {
        let tmp = TempDir::new().unwrap();
        let paths = LoomPaths::new(tmp.path());
        let cmd = SignalCommand { action: SignalAction::Stop, created_at: chrono::Utc::now(), ttl_seconds: 3600 };
        requeue(&paths, &cmd).unwrap();
        assert_eq!(queue_depth(&paths), 1);
        let drained = drain_signals(&paths);
        assert_eq!(drained.len(), 1);
    }
}
