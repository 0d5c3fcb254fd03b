use chrono::{DateTime, Utc};

use crate::models::daemon_state::{RecentFailure, SystematicFailure};

const INFRASTRUCTURE_CLASSES: &[&str] = &["mcp_infrastructure_failure", "auth_infrastructure_failure"];

/// Sliding-window pattern detection. Examines the most recent
/// `threshold` non-infrastructure, non-force-mode failures; if they share an
/// error class, that becomes the active pattern.
pub fn detect_systematic_failure(
    state: &mut SystematicFailure,
    recent_failures: &[RecentFailure],
    threshold: usize,
    base_cooldown: chrono::Duration,
) {
    let candidates: Vec<&RecentFailure> = recent_failures
        .iter()
        .rev()
        .filter(|f| !f.force_mode && !INFRASTRUCTURE_CLASSES.contains(&f.error_class.as_str()))
        .take(threshold)
        .collect();

    if candidates.len() < threshold {
        return;
    }
    let pattern = &candidates[0].error_class;
    if candidates.iter().all(|f| &f.error_class == pattern) {
        state.active = true;
        state.pattern = Some(pattern.clone());
        state.count = threshold as u32;
        state.detected_at = Some(Utc::now());
        state.cooldown_until = Some(Utc::now() + base_cooldown);
        state.probe_count = 0;
    }
}

/// Extends the cooldown exponentially using the *post-increment* probe
/// count, per the original's `probe_started`.
pub fn probe_started(state: &mut SystematicFailure, base_cooldown: chrono::Duration) {
    state.probe_count += 1;
    let multiplier = 2i64.pow(state.probe_count);
    state.cooldown_until = Some(Utc::now() + base_cooldown * multiplier as i32);
}

pub fn clear_systematic_failure(state: &mut SystematicFailure, recent_failures: &mut Vec<RecentFailure>) {
    *state = SystematicFailure::default();
    recent_failures.clear();
}

/// Removes only this issue's entries, then re-evaluates (never re-triggers
/// a fresh pattern, only lifts one the remaining window no longer supports).
pub fn clear_failures_for_issue(
    state: &mut SystematicFailure,
    recent_failures: &mut Vec<RecentFailure>,
    issue: u64,
    threshold: usize,
) {
    recent_failures.retain(|f| f.issue != issue);
    if state.active {
        let still_supported = {
            let candidates: Vec<&RecentFailure> = recent_failures
                .iter()
                .rev()
                .filter(|f| !f.force_mode && !INFRASTRUCTURE_CLASSES.contains(&f.error_class.as_str()))
                .take(threshold)
                .collect();
            candidates.len() >= threshold
                && state.pattern.as_deref().map(|p| candidates.iter().all(|f| f.error_class == p)).unwrap_or(false)
        };
        if !still_supported {
            state.active = false;
            state.pattern = None;
            state.cooldown_until = None;
        }
    }
}

pub fn is_in_cooldown(state: &SystematicFailure, now: DateTime<Utc>) -> bool {
    state.active && state.cooldown_until.map(|until| now < until).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(issue: u64, class: &str) -> RecentFailure {
        RecentFailure { issue, error_class: class.into(), at: Utc::now(), force_mode: false }
    }

    #[test]
    fn detects_pattern_across_threshold_window() {
        let mut state = SystematicFailure::default();
        let failures = vec![failure(1, "builder_stuck"), failure(2, "builder_stuck"), failure(3, "builder_stuck")];
        detect_systematic_failure(&mut state, &failures, 3, chrono::Duration::seconds(1800));
        assert!(state.active);
        assert_eq!(state.pattern.as_deref(), Some("builder_stuck"));
    }

    #[test]
    fn mixed_classes_do_not_trigger() {
        let mut state = SystematicFailure::default();
        let failures = vec![failure(1, "builder_stuck"), failure(2, "judge_stuck"), failure(3, "builder_stuck")];
        detect_systematic_failure(&mut state, &failures, 3, chrono::Duration::seconds(1800));
        assert!(!state.active);
    }

    #[test]
    fn infrastructure_failures_excluded() {
        let mut state = SystematicFailure::default();
        let failures = vec![
            failure(1, "mcp_infrastructure_failure"),
            failure(2, "builder_stuck"),
            failure(3, "builder_stuck"),
        ];
        detect_systematic_failure(&mut state, &failures, 3, chrono::Duration::seconds(1800));
        assert!(!state.active);
    }

    #[test]
    fn probe_started_extends_cooldown_exponentially() {
        let mut state = SystematicFailure { active: true, ..Default::default() };
        let before = Utc::now();
        probe_started(&mut state, chrono::Duration::seconds(100));
        let first = state.cooldown_until.unwrap();
        probe_started(&mut state, chrono::Duration::seconds(100));
        let second = state.cooldown_until.unwrap();
        assert!(second - before > first - before);
    }

    #[test]
    fn clearing_one_issue_can_lift_pattern() {
        let mut state = SystematicFailure { active: true, pattern: Some("builder_stuck".into()), ..Default::default() };
        let mut failures = vec![failure(1, "builder_stuck"), failure(2, "builder_stuck"), failure(3, "builder_stuck")];
        clear_failures_for_issue(&mut state, &mut failures, 3, 3);
        assert!(!state.active);
        assert_eq!(failures.len(), 2);
    }
}
