//! Signal draining across a mixed batch, covering the ordering and
//! at-most-once guarantees the daemon loop depends on across a tick.

use loom::daemon::signals::drain_signals;
use loom::models::signal::{SignalAction, SignalCommand};
use loom::paths::LoomPaths;
use tempfile::TempDir;

fn write(dir: &std::path::Path, name: &str, action: SignalAction) {
    std::fs::create_dir_all(dir).unwrap();
    let cmd = SignalCommand { action, created_at: chrono::Utc::now(), ttl_seconds: 3600 };
    std::fs::write(dir.join(name), serde_json::to_vec(&cmd).unwrap()).unwrap();
}

#[test]
fn drains_mixed_batch_in_filename_order() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    let dir = paths.signals_dir();

    write(&dir, "002-stop.json", SignalAction::Stop);
    write(&dir, "001-set-max.json", SignalAction::SetMaxShepherds { count: 4 });
    write(&dir, "000-ignore.txt", SignalAction::Stop); // non-json, must be skipped and left alone

    let drained = drain_signals(&paths);
    assert_eq!(drained.len(), 2);
    assert!(matches!(drained[0].action, SignalAction::SetMaxShepherds { count: 4 }));
    assert!(matches!(drained[1].action, SignalAction::Stop));

    // the non-json file was never consumed
    assert!(dir.join("000-ignore.txt").exists());
    // both json signals are gone
    assert!(!dir.join("001-set-max.json").exists());
    assert!(!dir.join("002-stop.json").exists());
}

#[test]
fn empty_signals_dir_drains_to_nothing() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    assert!(drain_signals(&paths).is_empty());
}
