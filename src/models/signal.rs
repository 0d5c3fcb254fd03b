use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SignalAction {
    StartOrchestration { mode: String },
    SpawnShepherd { issue: u64, mode: String, #[serde(default)] force: bool },
    Stop,
    PauseShepherd { shepherd_id: String },
    ResumeShepherd { shepherd_id: String },
    SetMaxShepherds { count: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCommand {
    #[serde(flatten)]
    pub action: SignalAction,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl SignalCommand {
    /// Authoritative staleness check: the payload's own timestamp decides,
    /// when present and parseable — the poller never additionally consults
    /// file mtime once this returns a verdict.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_past_ttl() {
        let cmd = SignalCommand {
            action: SignalAction::Stop,
            created_at: Utc::now() - chrono::Duration::seconds(100),
            ttl_seconds: 50,
        };
        assert!(cmd.is_stale(Utc::now()));
    }

    #[test]
    fn fresh_within_ttl() {
        let cmd = SignalCommand {
            action: SignalAction::Stop,
            created_at: Utc::now(),
            ttl_seconds: 3600,
        };
        assert!(!cmd.is_stale(Utc::now()));
    }

    #[test]
    fn serializes_with_action_tag() {
        let cmd = SignalCommand {
            action: SignalAction::SpawnShepherd { issue: 42, mode: "default".into(), force: false },
            created_at: Utc::now(),
            ttl_seconds: 3600,
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"], "spawn_shepherd");
        assert_eq!(json["issue"], 42);
    }
}
