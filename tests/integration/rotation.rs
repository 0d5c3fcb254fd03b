//! State rotation and daemon preflight, exercised against a real temp
//! directory rather than the per-module unit fixtures in `daemon::loop_`.

use loom::config::Config;
use loom::daemon::loop_::{preflight, rotate_state};
use loom::models::daemon_state::DaemonState;
use loom::paths::LoomPaths;
use tempfile::TempDir;

#[test]
fn preflight_refuses_to_start_over_a_live_pid() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    std::fs::create_dir_all(paths.loom_dir()).unwrap();
    std::fs::write(paths.daemon_pid_file(), std::process::id().to_string()).unwrap();

    let err = preflight(&paths).unwrap_err();
    assert!(err.to_string().contains("already running"));
}

#[test]
fn preflight_takes_over_a_stale_pid_file() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    std::fs::create_dir_all(paths.loom_dir()).unwrap();
    // pid 1 may or may not be us, but a pid this large is never alive.
    std::fs::write(paths.daemon_pid_file(), "999999999").unwrap();

    preflight(&paths).unwrap();
    let written = std::fs::read_to_string(paths.daemon_pid_file()).unwrap();
    assert_eq!(written, std::process::id().to_string());
}

#[test]
fn rotate_state_archives_and_prunes_oldest() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    let mut config = Config::default();
    config.max_archived_sessions = 2;

    for i in 0..4u64 {
        let mut state = DaemonState::default();
        state.iteration = i;
        loom::store::write(&paths.daemon_state_file(), &state).unwrap();
        rotate_state(&paths, &config).unwrap();
        // mtime-based pruning needs distinguishable timestamps between rotations
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let archived: Vec<_> = (0..100u8).filter(|i| paths.archived_state_file(*i).exists()).collect();
    assert_eq!(archived.len(), 2, "only the two most recent archives should survive pruning");

    // the surviving archives should be the two most recently rotated (iterations 2 and 3)
    let iterations: Vec<u64> = archived
        .iter()
        .map(|i| {
            let state: DaemonState = loom::store::read(&paths.archived_state_file(*i));
            state.iteration
        })
        .collect();
    assert!(iterations.contains(&2));
    assert!(iterations.contains(&3));
    assert!(!iterations.contains(&0));
}

#[test]
fn rotate_state_is_a_no_op_without_a_current_file() {
    let tmp = TempDir::new().unwrap();
    let paths = LoomPaths::new(tmp.path());
    let config = Config::default();
    rotate_state(&paths, &config).unwrap();
    assert!((0..100u8).all(|i| !paths.archived_state_file(i).exists()));
}
