/// Three-level stall escalation. Exactly one level fires per
/// tick, checked restart -> recovery -> diagnostic so escalation is never
/// cumulative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallAction {
    None,
    Diagnostic,
    Recovery,
    Restart,
}

pub fn evaluate_stall(
    stall_counter: u32,
    diagnostic_threshold: u32,
    recovery_threshold: u32,
    restart_threshold: u32,
) -> StallAction {
    if stall_counter >= restart_threshold {
        StallAction::Restart
    } else if stall_counter >= recovery_threshold {
        StallAction::Recovery
    } else if stall_counter >= diagnostic_threshold {
        StallAction::Diagnostic
    } else {
        StallAction::None
    }
}

/// An iteration is "stalled" if nothing in the pipeline moved: no new
/// completions, no new spawns, and the ready/building/blocked totals are
/// unchanged from the previous tick.
pub fn iteration_made_progress(prev_total_building: usize, prev_total_ready: usize, snap: &crate::snapshot::Snapshot) -> bool {
    snap.computed.total_building != prev_total_building || snap.computed.total_ready != prev_total_ready
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_level_fires_restart_wins() {
        assert_eq!(evaluate_stall(12, 3, 5, 10), StallAction::Restart);
        assert_eq!(evaluate_stall(7, 3, 5, 10), StallAction::Recovery);
        assert_eq!(evaluate_stall(4, 3, 5, 10), StallAction::Diagnostic);
        assert_eq!(evaluate_stall(1, 3, 5, 10), StallAction::None);
    }

    #[test]
    fn thresholds_are_inclusive_lower_bounds() {
        assert_eq!(evaluate_stall(3, 3, 5, 10), StallAction::Diagnostic);
        assert_eq!(evaluate_stall(5, 3, 5, 10), StallAction::Recovery);
        assert_eq!(evaluate_stall(10, 3, 5, 10), StallAction::Restart);
    }
}
