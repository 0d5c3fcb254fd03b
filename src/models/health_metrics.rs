use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DURATION_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
}

impl Default for Health {
    fn default() -> Self {
        Health { status: HealthStatus::Healthy, consecutive_failures: 0, last_success: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub session_start: DateTime<Utc>,
    pub total_iterations: u64,
    pub successful_iterations: u64,
    pub failed_iterations: u64,
    pub timeout_iterations: u64,
    #[serde(default)]
    pub iteration_durations: Vec<f64>,
    pub average_iteration_seconds: f64,
    pub last_iteration: Option<DateTime<Utc>>,
    pub health: Health,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        HealthMetrics {
            session_start: Utc::now(),
            total_iterations: 0,
            successful_iterations: 0,
            failed_iterations: 0,
            timeout_iterations: 0,
            iteration_durations: Vec::new(),
            average_iteration_seconds: 0.0,
            last_iteration: None,
            health: Health::default(),
        }
    }
}

impl HealthMetrics {
    /// Record the outcome of one iteration. `unhealthy` after 3 consecutive
    /// failures, `degraded` after 1-2, `healthy` otherwise.
    pub fn record_iteration(&mut self, duration_seconds: f64, succeeded: bool, timed_out: bool) {
        self.total_iterations += 1;
        self.last_iteration = Some(Utc::now());
        if timed_out {
            self.timeout_iterations += 1;
        }
        if succeeded {
            self.successful_iterations += 1;
            self.health.consecutive_failures = 0;
            self.health.last_success = Some(Utc::now());
        } else {
            self.failed_iterations += 1;
            self.health.consecutive_failures += 1;
        }

        self.iteration_durations.push(duration_seconds);
        if self.iteration_durations.len() > DURATION_WINDOW {
            let overflow = self.iteration_durations.len() - DURATION_WINDOW;
            self.iteration_durations.drain(0..overflow);
        }
        self.average_iteration_seconds =
            self.iteration_durations.iter().sum::<f64>() / self.iteration_durations.len() as f64;

        self.health.status = match self.health.consecutive_failures {
            0 => HealthStatus::Healthy,
            1 | 2 => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_consecutive_failures_are_unhealthy() {
        let mut m = HealthMetrics::default();
        m.record_iteration(1.0, false, false);
        assert_eq!(m.health.status, HealthStatus::Degraded);
        m.record_iteration(1.0, false, false);
        assert_eq!(m.health.status, HealthStatus::Degraded);
        m.record_iteration(1.0, false, false);
        assert_eq!(m.health.status, HealthStatus::Unhealthy);
        assert_eq!(m.health.consecutive_failures, 3);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mut m = HealthMetrics::default();
        m.record_iteration(1.0, false, false);
        m.record_iteration(1.0, false, false);
        m.record_iteration(1.0, false, false);
        m.record_iteration(1.0, true, false);
        assert_eq!(m.health.status, HealthStatus::Healthy);
        assert_eq!(m.health.consecutive_failures, 0);
    }

    #[test]
    fn duration_window_caps_at_100() {
        let mut m = HealthMetrics::default();
        for _ in 0..150 {
            m.record_iteration(2.0, true, false);
        }
        assert_eq!(m.iteration_durations.len(), 100);
    }
}
