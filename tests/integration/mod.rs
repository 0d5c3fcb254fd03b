//! Integration tests exercising cross-module behavior: state rotation,
//! signal draining against a live daemon loop, and claim contention against
//! the claim registry's advisory-locked store.

mod claim_contention;
mod rotation;
mod signal_draining;
