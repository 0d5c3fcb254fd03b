use std::env;
use std::time::Duration;

/// Process-wide configuration, resolved once from the environment.
/// Malformed values fall back to the documented default rather than erroring
/// — matching the source's permissive parsing, since a typo in an operator's
/// shell profile should degrade, not crash the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    pub poll_interval: Duration,
    pub max_shepherds: usize,
    pub issue_threshold: usize,
    pub timeout_min: u64,
    pub architect_cooldown: Duration,
    pub hermit_cooldown: Duration,
    pub role_interval: Duration,
    pub stall_diagnostic_threshold: u32,
    pub stall_recovery_threshold: u32,
    pub stall_restart_threshold: u32,
    pub systematic_failure_threshold: usize,
    pub systematic_failure_cooldown: Duration,
    pub curator_timeout: Duration,
    pub builder_timeout: Duration,
    pub judge_timeout: Duration,
    pub approval_timeout: Duration,
    pub doctor_timeout: Duration,
    pub doctor_max_retries: u32,
    pub judge_max_retries: u32,
    pub stuck_max_retries: u32,
    pub test_fix_max_retries: u32,
    pub doctor_test_fix_timeout: Duration,
    pub prompt_stuck_check_interval: Duration,
    pub prompt_stuck_age_threshold: Duration,
    pub prompt_stuck_recovery_cooldown: Duration,
    pub signal_max_age_seconds: u64,
    pub usage_cache_ttl: Duration,
    pub max_archived_sessions: usize,
    pub rate_limit_threshold: u32,
    pub heartbeat_poll_interval: Duration,
    pub heartbeat_stale_threshold: Duration,
    pub worktree_grace_seconds: u64,
    pub log_filter: String,
    pub worker_command: String,
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(env_u64(name, default))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: env_secs("LOOM_POLL_INTERVAL", 120),
            max_shepherds: env_usize("LOOM_MAX_SHEPHERDS", 10),
            issue_threshold: env_usize("LOOM_ISSUE_THRESHOLD", 3),
            timeout_min: env_u64("LOOM_TIMEOUT_MIN", 0),
            architect_cooldown: env_secs("LOOM_ARCHITECT_COOLDOWN", 1800),
            hermit_cooldown: env_secs("LOOM_HERMIT_COOLDOWN", 1800),
            role_interval: env_secs("LOOM_ROLE_INTERVAL", 1800),
            stall_diagnostic_threshold: env_u32("LOOM_STALL_DIAGNOSTIC_THRESHOLD", 3),
            stall_recovery_threshold: env_u32("LOOM_STALL_RECOVERY_THRESHOLD", 5),
            stall_restart_threshold: env_u32("LOOM_STALL_RESTART_THRESHOLD", 10),
            systematic_failure_threshold: env_usize("LOOM_SYSTEMATIC_FAILURE_THRESHOLD", 3),
            systematic_failure_cooldown: env_secs("LOOM_SYSTEMATIC_FAILURE_COOLDOWN", 1800),
            curator_timeout: env_secs("LOOM_CURATOR_TIMEOUT", 3600),
            builder_timeout: env_secs("LOOM_BUILDER_TIMEOUT", 14400),
            judge_timeout: env_secs("LOOM_JUDGE_TIMEOUT", 3600),
            approval_timeout: env_secs("LOOM_APPROVAL_TIMEOUT", 1800),
            doctor_timeout: env_secs("LOOM_DOCTOR_TIMEOUT", 3600),
            doctor_max_retries: env_u32("LOOM_DOCTOR_MAX_RETRIES", 3),
            judge_max_retries: env_u32("LOOM_JUDGE_MAX_RETRIES", 1),
            stuck_max_retries: env_u32("LOOM_STUCK_MAX_RETRIES", 1),
            test_fix_max_retries: env_u32("LOOM_TEST_FIX_MAX_RETRIES", 2),
            doctor_test_fix_timeout: env_secs("LOOM_DOCTOR_TEST_FIX_TIMEOUT", 1800),
            prompt_stuck_check_interval: env_secs("LOOM_PROMPT_STUCK_CHECK_INTERVAL", 10),
            prompt_stuck_age_threshold: env_secs("LOOM_PROMPT_STUCK_AGE_THRESHOLD", 30),
            prompt_stuck_recovery_cooldown: env_secs("LOOM_PROMPT_STUCK_RECOVERY_COOLDOWN", 60),
            signal_max_age_seconds: env_u64("LOOM_SIGNAL_MAX_AGE_SECONDS", 3600),
            usage_cache_ttl: env_secs("LOOM_USAGE_CACHE_TTL", 60),
            max_archived_sessions: env_usize("LOOM_MAX_ARCHIVED_SESSIONS", 10),
            rate_limit_threshold: env_u32("LOOM_RATE_LIMIT_THRESHOLD", 99),
            heartbeat_poll_interval: Duration::from_secs(5),
            heartbeat_stale_threshold: Duration::from_secs(120),
            worktree_grace_seconds: 300,
            log_filter: env::var("LOOM_LOG").unwrap_or_else(|_| "info".to_string()),
            worker_command: env::var("LOOM_WORKER_COMMAND").unwrap_or_else(|_| "claude".to_string()),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Minimum gap between spawns of a named support role, per the resolved
    /// open question: cooldown is a "no sooner than" gate, not a fixed
    /// schedule. Individual roles may override the shared default later.
    pub fn role_interval_for(&self, _role: &str) -> Duration {
        self.role_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.max_shepherds, 10);
        assert_eq!(cfg.rate_limit_threshold, 99);
        assert_eq!(cfg.doctor_max_retries, 3);
        assert_eq!(cfg.stall_diagnostic_threshold, 3);
        assert_eq!(cfg.stall_recovery_threshold, 5);
        assert_eq!(cfg.stall_restart_threshold, 10);
    }
}
