use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An issue is always auto-blocked upstream once it reaches this many
/// recorded failures; the backoff filter treats it as a permanent skip past
/// this point.
pub const MAX_FAILURES_BEFORE_BLOCK: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFailureEntry {
    pub total_failures: u32,
    pub error_class: String,
    pub phase: String,
    #[serde(default)]
    pub details: Option<String>,
    pub first_failure_at: DateTime<Utc>,
    pub last_failure_at: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueFailureLog {
    #[serde(default)]
    pub entries: HashMap<String, IssueFailureEntry>,
}

impl IssueFailureLog {
    pub fn record_failure(&mut self, issue: u64, error_class: &str, phase: &str, details: Option<String>) {
        let key = issue.to_string();
        let now = Utc::now();
        self.entries
            .entry(key)
            .and_modify(|e| {
                e.total_failures += 1;
                e.error_class = error_class.to_string();
                e.phase = phase.to_string();
                e.details = details.clone();
                e.last_failure_at = now;
            })
            .or_insert(IssueFailureEntry {
                total_failures: 1,
                error_class: error_class.to_string(),
                phase: phase.to_string(),
                details,
                first_failure_at: now,
                last_failure_at: now,
                last_success_at: None,
            });
    }

    /// A completed issue gets a clean slate — the entry is removed entirely,
    /// not merely reset, so a previously-flaky issue doesn't carry a
    /// `last_success_at` scar forward.
    pub fn record_success(&mut self, issue: u64) {
        self.entries.remove(&issue.to_string());
    }

    pub fn failures_for(&self, issue: u64) -> u32 {
        self.entries.get(&issue.to_string()).map(|e| e.total_failures).unwrap_or(0)
    }
}

/// Exponential skip schedule: at N failures (2 <= N < MAX), an issue is
/// eligible for the ready list only every `2^(N-1) + 1` iterations — this
/// takes precedence over the original Python's simpler
/// `backoff_iterations()` exponential.
pub fn backoff_period(failures: u32) -> u64 {
    2u64.pow(failures - 1) + 1
}

/// True if the issue should appear in the ready list this iteration.
pub fn passes_backoff_filter(failures: u32, current_iteration: u64) -> bool {
    if failures <= 1 {
        return true;
    }
    if failures >= MAX_FAILURES_BEFORE_BLOCK {
        return false;
    }
    current_iteration % backoff_period(failures) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_one_failures_always_pass() {
        assert!(passes_backoff_filter(0, 1));
        assert!(passes_backoff_filter(1, 7));
    }

    #[test]
    fn five_or_more_failures_never_pass() {
        for i in 1..50 {
            assert!(!passes_backoff_filter(5, i));
        }
    }

    #[test]
    fn backoff_schedule_matches_spec_example() {
        // 3 failures -> period = 2^2+1 = 5; passes only at multiples of 5
        assert_eq!(backoff_period(3), 5);
        let passing: Vec<u64> = (1..=10).filter(|&i| passes_backoff_filter(3, i)).collect();
        assert_eq!(passing, vec![5, 10]);
    }

    #[test]
    fn record_success_clears_entry_entirely() {
        let mut log = IssueFailureLog::default();
        log.record_failure(1, "builder_stuck", "builder", None);
        log.record_failure(1, "builder_stuck", "builder", None);
        assert_eq!(log.failures_for(1), 2);
        log.record_success(1);
        assert_eq!(log.failures_for(1), 0);
        assert!(!log.entries.contains_key("1"));
    }

    #[test]
    fn failure_log_monotonicity_without_success() {
        let mut log = IssueFailureLog::default();
        let mut last = 0;
        for _ in 0..5 {
            log.record_failure(1, "builder_stuck", "builder", None);
            let now = log.failures_for(1);
            assert!(now >= last);
            last = now;
        }
    }
}
