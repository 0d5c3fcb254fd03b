use anyhow::Result;
use clap::{Args, Subcommand};

use crate::claim_registry::{self, ClaimOutcome};
use crate::error::LoomError;
use crate::paths::LoomPaths;

/// Exit codes for the claim registry's own contention semantics, distinct
/// from the generic subcommand convention: 1 means "someone else holds it",
/// not a generic failure.
mod exit {
    pub const OK: i32 = 0;
    pub const CLAIMED_BY_OTHER: i32 = 1;
    pub const NOT_FOUND: i32 = 3;
    pub const WRONG_AGENT: i32 = 4;
}

#[derive(Args)]
pub struct ClaimArgs {
    #[command(subcommand)]
    action: ClaimAction,
}

#[derive(Subcommand)]
enum ClaimAction {
    /// Take an advisory lock on an issue for this agent.
    Acquire {
        issue: u64,
        agent_id: String,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: u64,
    },
    /// Renew an already-held claim's TTL.
    Extend {
        issue: u64,
        agent_id: String,
        #[arg(long, default_value_t = 3600)]
        ttl_seconds: u64,
    },
    /// Release a previously acquired claim. Omitting agent_id force-releases
    /// it regardless of who holds it.
    Release { issue: u64, agent_id: Option<String> },
    /// Print the current claim, if any.
    Status { issue: u64 },
    /// Check whether an issue is currently claimed.
    Check { issue: u64 },
    /// List every claim with a document on disk.
    List,
    /// Remove expired or incomplete claim directories.
    Cleanup,
}

pub fn run(args: ClaimArgs) -> Result<i32> {
    let paths = LoomPaths::new(super::repo_root());
    match args.action {
        ClaimAction::Acquire { issue, agent_id, ttl_seconds } => {
            match claim_registry::acquire(&paths, issue, &agent_id, ttl_seconds) {
                Ok(ClaimOutcome::Acquired(claim)) => {
                    println!("claimed issue #{issue} for {}", claim.agent_id);
                    Ok(exit::OK)
                }
                Err(LoomError::AlreadyClaimed(_)) => {
                    eprintln!("issue #{issue} already claimed");
                    Ok(exit::CLAIMED_BY_OTHER)
                }
                Err(err) => Err(err.into()),
                Ok(_) => unreachable!("acquire only ever returns Acquired"),
            }
        }
        ClaimAction::Extend { issue, agent_id, ttl_seconds } => {
            match claim_registry::extend(&paths, issue, &agent_id, ttl_seconds) {
                Ok(ClaimOutcome::Extended(claim)) => {
                    println!("extended claim on issue #{issue} to {}", claim.expires_at);
                    Ok(exit::OK)
                }
                Err(LoomError::ClaimNotFound(_)) => {
                    eprintln!("no claim on issue #{issue}");
                    Ok(exit::NOT_FOUND)
                }
                Err(LoomError::WrongAgent(_, holder)) => {
                    eprintln!("claim on issue #{issue} is held by {holder}, not {agent_id}");
                    Ok(exit::WRONG_AGENT)
                }
                Err(err) => Err(err.into()),
                Ok(_) => unreachable!("extend only ever returns Extended"),
            }
        }
        ClaimAction::Release { issue, agent_id } => {
            match claim_registry::release(&paths, issue, agent_id.as_deref()) {
                Ok(ClaimOutcome::Released(_)) => {
                    println!("released claim on issue #{issue}");
                    Ok(exit::OK)
                }
                Err(LoomError::ClaimNotFound(_)) => {
                    eprintln!("no claim on issue #{issue}");
                    Ok(exit::NOT_FOUND)
                }
                Err(LoomError::WrongAgent(_, holder)) => {
                    eprintln!("claim on issue #{issue} is held by {holder}");
                    Ok(exit::WRONG_AGENT)
                }
                Err(err) => Err(err.into()),
                Ok(_) => unreachable!("release only ever returns Released"),
            }
        }
        ClaimAction::Status { issue } | ClaimAction::Check { issue } => match claim_registry::check(&paths, issue) {
            Some(claim) => {
                println!("issue #{issue} claimed by {} (expires {})", claim.agent_id, claim.expires_at);
                Ok(exit::OK)
            }
            None => {
                println!("no claim on issue #{issue}");
                Ok(exit::NOT_FOUND)
            }
        },
        ClaimAction::List => {
            let claims = claim_registry::list(&paths);
            if claims.is_empty() {
                println!("no active claims");
            }
            for claim in &claims {
                let expired = if claim.is_expired(chrono::Utc::now()) { ", expired" } else { "" };
                println!("issue #{} claimed by {} (expires {}{expired})", claim.issue, claim.agent_id, claim.expires_at);
            }
            Ok(exit::OK)
        }
        ClaimAction::Cleanup => {
            let removed = claim_registry::cleanup(&paths);
            println!("cleaned up {} stale claim(s)", removed.len());
            Ok(exit::OK)
        }
    }
}
