use thiserror::Error;

/// Error classes used for retry/escalation policy decisions.
/// The string form (`as_class()`) is what gets persisted into failure logs
/// and warnings, since policy tables key off the class, not the variant.
#[derive(Debug, Error)]
pub enum LoomError {
    #[error("issue #{0} not found")]
    IssueNotFound(u64),

    #[error("issue #{0} is closed ({1})")]
    IssueClosed(u64, String),

    #[error("issue #{issue} is blocked (loom:blocked)")]
    IssueBlocked { issue: u64 },

    #[error("claim on issue #{0} is already held")]
    AlreadyClaimed(u64),

    #[error("claim on issue #{0} is not held by {1}")]
    WrongAgent(u64, String),

    #[error("no claim found for issue #{0}")]
    ClaimNotFound(u64),

    #[error("another daemon is already running (pid {0})")]
    SessionConflict(u32),

    #[error("contract violated in phase {phase}: {contract} ({message})")]
    ContractViolation {
        phase: String,
        contract: String,
        message: String,
    },

    #[error("rate limit reached ({0}%)")]
    RateLimited(u32),

    #[error("worktree escape detected for issue #{0}")]
    WorktreeEscape(u64),

    #[error("worker commits reference issue #{found} instead of assigned issue #{assigned}")]
    WrongIssue { assigned: u64, found: u64 },

    #[error("shutdown signal received")]
    Shutdown,

    #[error("worker process got stuck (exit 4)")]
    Stuck,

    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LoomError {
    /// The class string used by the failure log, systematic-failure detector
    /// and the retry-policy table. Not every variant maps to a class that
    /// participates in policy (e.g. IssueNotFound is a caller bug, not a
    /// worker failure) — those return a generic fallback.
    pub fn as_class(&self) -> &'static str {
        match self {
            LoomError::RateLimited(_) => "rate_limited",
            LoomError::WorktreeEscape(_) => "worktree_escape",
            LoomError::WrongIssue { .. } => "wrong_issue",
            LoomError::Shutdown => "shutdown_signal",
            LoomError::Stuck => "builder_stuck",
            LoomError::Infrastructure(_) => "mcp_infrastructure_failure",
            LoomError::ContractViolation { phase, contract, .. } => {
                // Leaked once per (phase, contract) pair is acceptable: this
                // is a small, bounded combination space, not per-call growth.
                Box::leak(format!("contract:{phase}:{contract}").into_boxed_str())
            }
            _ => "unknown",
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, LoomError::Shutdown)
    }
}

/// Retry policy associated with an error class.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub cooldown_seconds: u64,
    pub escalate: bool,
}

pub fn retry_policy_for(class: &str) -> RetryPolicy {
    match class {
        "mcp_infrastructure_failure" | "auth_infrastructure_failure" => RetryPolicy {
            max_retries: 10,
            cooldown_seconds: 300,
            escalate: false,
        },
        "builder_stuck" | "builder_test_failure" | "builder_unknown_failure" => RetryPolicy {
            max_retries: 3,
            cooldown_seconds: 3600,
            escalate: false,
        },
        "judge_stuck" => RetryPolicy {
            max_retries: 2,
            cooldown_seconds: 1800,
            escalate: false,
        },
        "doctor_exhausted" => RetryPolicy {
            max_retries: 0,
            cooldown_seconds: 0,
            escalate: true,
        },
        "wrong_issue" | "worktree_escape" => RetryPolicy {
            max_retries: 0,
            cooldown_seconds: 0,
            escalate: true,
        },
        _ if class.starts_with("contract:") => RetryPolicy {
            max_retries: 1,
            cooldown_seconds: 1800,
            escalate: false,
        },
        _ => RetryPolicy {
            max_retries: 1,
            cooldown_seconds: 1800,
            escalate: false,
        },
    }
}

pub type Result<T> = std::result::Result<T, LoomError>;
