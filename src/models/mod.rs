pub mod claim;
pub mod daemon_state;
pub mod failure_log;
pub mod health_metrics;
pub mod progress;
pub mod signal;
