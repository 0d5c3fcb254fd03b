use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Cache document populated by an out-of-process usage probe.
/// This crate only ever reads it; the original's macOS-Keychain token
/// retrieval and direct API call are out of scope for a portable build (see
/// DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCache {
    #[serde(default)]
    pub session_percent: Option<f64>,
    pub session_reset: Option<DateTime<Utc>>,
    #[serde(default)]
    pub weekly_all_percent: Option<f64>,
    pub weekly_reset: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UsageVerdict {
    Ok { session_percent: f64 },
    /// Missing, stale, unparseable, or the probe itself reported an error —
    /// in every such case we fail open: a missing probe must never wedge
    /// the pipeline.
    Unknown,
    RateLimited { session_percent: f64 },
}

pub fn check_usage(cache_path: &Path, ttl: Duration, rate_limit_threshold: u32) -> UsageVerdict {
    let Ok(bytes) = std::fs::read(cache_path) else { return UsageVerdict::Unknown };
    let Ok(cache): Result<UsageCache, _> = serde_json::from_slice(&bytes) else { return UsageVerdict::Unknown };
    if cache.error.is_some() {
        return UsageVerdict::Unknown;
    }
    let age = Utc::now().signed_duration_since(cache.timestamp);
    if age > chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)) {
        return UsageVerdict::Unknown;
    }
    let Some(percent) = cache.session_percent else { return UsageVerdict::Unknown };
    if percent >= rate_limit_threshold as f64 {
        UsageVerdict::RateLimited { session_percent: percent }
    } else {
        UsageVerdict::Ok { session_percent: percent }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_cache(dir: &Path, cache: &UsageCache) {
        std::fs::write(dir.join("usage-cache.json"), serde_json::to_vec(cache).unwrap()).unwrap();
    }

    #[test]
    fn missing_cache_fails_open() {
        let dir = TempDir::new().unwrap();
        let verdict = check_usage(&dir.path().join("usage-cache.json"), Duration::from_secs(60), 99);
        assert_eq!(verdict, UsageVerdict::Unknown);
    }

    #[test]
    fn stale_cache_fails_open() {
        let dir = TempDir::new().unwrap();
        let cache = UsageCache {
            session_percent: Some(99.5),
            session_reset: None,
            weekly_all_percent: None,
            weekly_reset: None,
            timestamp: Utc::now() - chrono::Duration::seconds(120),
            error: None,
        };
        write_cache(dir.path(), &cache);
        let verdict = check_usage(&dir.path().join("usage-cache.json"), Duration::from_secs(60), 99);
        assert_eq!(verdict, UsageVerdict::Unknown);
    }

    #[test]
    fn over_threshold_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let cache = UsageCache {
            session_percent: Some(99.5),
            session_reset: None,
            weekly_all_percent: None,
            weekly_reset: None,
            timestamp: Utc::now(),
            error: None,
        };
        write_cache(dir.path(), &cache);
        let verdict = check_usage(&dir.path().join("usage-cache.json"), Duration::from_secs(60), 99);
        assert_eq!(verdict, UsageVerdict::RateLimited { session_percent: 99.5 });
    }

    #[test]
    fn probe_error_field_fails_open() {
        let dir = TempDir::new().unwrap();
        let cache = UsageCache {
            session_percent: None,
            session_reset: None,
            weekly_all_percent: None,
            weekly_reset: None,
            timestamp: Utc::now(),
            error: Some("no_keychain_token".into()),
        };
        write_cache(dir.path(), &cache);
        let verdict = check_usage(&dir.path().join("usage-cache.json"), Duration::from_secs(60), 99);
        assert_eq!(verdict, UsageVerdict::Unknown);
    }
}
