use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub issue: u64,
    pub agent_id: String,
    pub claimed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl Claim {
    pub fn new(issue: u64, agent_id: impl Into<String>, ttl_seconds: u64) -> Self {
        let now = Utc::now();
        Claim {
            issue,
            agent_id: agent_id.into(),
            claimed_at: now,
            expires_at: now + chrono::Duration::seconds(ttl_seconds as i64),
            ttl_seconds,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn extend(&mut self, ttl_seconds: u64) {
        self.ttl_seconds = ttl_seconds;
        self.expires_at = Utc::now() + chrono::Duration::seconds(ttl_seconds as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_expired_right_after_claiming() {
        let claim = Claim::new(1, "agent-a", 60);
        assert!(!claim.is_expired(Utc::now()));
    }

    #[test]
    fn expired_in_the_past() {
        let claim = Claim::new(1, "agent-a", 60);
        assert!(claim.is_expired(Utc::now() + chrono::Duration::seconds(61)));
    }
}
