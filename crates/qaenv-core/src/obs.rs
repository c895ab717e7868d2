//! Structured observability hooks for environment lifecycle events.
//!
//! Spans are created per operation via [`op_span`] and attached with
//! `tracing::Instrument`; the emit functions mark the load-bearing moments
//! inside an operation.

use tracing::{info, warn};

/// Span covering one lifecycle operation, tagged with the triggering repo
/// and pull request.
pub fn op_span(op: &'static str, repo: &str, pull_request: u64) -> tracing::Span {
    tracing::info_span!("env.op", op = op, repo = %repo, pr = pull_request)
}

/// Emit event: operation preempted by a newer request for the same key.
pub fn emit_preempted(repo: &str, pull_request: u64) {
    warn!(event = "env.preempted", repo = %repo, pr = pull_request);
}

/// Emit event: environment record reused for a new revision.
pub fn emit_record_reused(env_name: &str) {
    info!(event = "env.record_reused", env_name = %env_name);
}

/// Emit event: fresh environment record allocated.
pub fn emit_record_created(env_name: &str) {
    info!(event = "env.record_created", env_name = %env_name);
}

/// Emit event: operation finished, with classification of any error.
pub fn emit_op_finished(
    op: &'static str,
    repo: &str,
    pull_request: u64,
    user_error: bool,
    system_error: bool,
    error: Option<&dyn std::fmt::Display>,
) {
    match error {
        Some(e) => warn!(
            event = "env.op_failed",
            op = op,
            repo = %repo,
            pr = pull_request,
            user_error = user_error,
            system_error = system_error,
            error = %e,
        ),
        None => info!(event = "env.op_finished", op = op, repo = %repo, pr = pull_request),
    }
}
