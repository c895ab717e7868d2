//! Source-control client contract and commit-status constants.

use async_trait::async_trait;

use crate::context::OpContext;

/// Context string attached to every commit status we publish.
pub const STATUS_CONTEXT: &str = "Acyl";

pub const PENDING_DESCRIPTION: &str = "Environment is being created";
pub const SUCCESS_DESCRIPTION: &str = "Successfully created environment";
pub const FAILURE_DESCRIPTION: &str = "Error creating environment";

pub const PENDING_TARGET_URL: &str = "https://media.giphy.com/media/oiymhxu13VYEo/giphy.gif";
pub const SUCCESS_TARGET_URL: &str = "https://media.giphy.com/media/SRO0ZwmImic0/giphy.gif";
pub const FAILURE_TARGET_URL: &str = "https://media.giphy.com/media/pyFsc5uv5WPXN9Ocki/giphy.gif";

/// State of a published commit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    Pending,
    Success,
    Failure,
}

impl CommitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// A commit status to publish against `(repo, sha)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitStatus {
    pub context: String,
    pub state: CommitState,
    pub description: String,
    pub target_url: String,
}

impl CommitStatus {
    pub fn pending() -> Self {
        Self {
            context: STATUS_CONTEXT.to_string(),
            state: CommitState::Pending,
            description: PENDING_DESCRIPTION.to_string(),
            target_url: PENDING_TARGET_URL.to_string(),
        }
    }

    pub fn success() -> Self {
        Self {
            context: STATUS_CONTEXT.to_string(),
            state: CommitState::Success,
            description: SUCCESS_DESCRIPTION.to_string(),
            target_url: SUCCESS_TARGET_URL.to_string(),
        }
    }

    pub fn failure() -> Self {
        Self {
            context: STATUS_CONTEXT.to_string(),
            state: CommitState::Failure,
            description: FAILURE_DESCRIPTION.to_string(),
            target_url: FAILURE_TARGET_URL.to_string(),
        }
    }
}

/// Errors from the source-control client.
#[derive(Debug, thiserror::Error)]
pub enum RepoClientError {
    #[error("api error: {0}")]
    Api(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Source-control operations consumed by the orchestrator.
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Publish a commit status against `(repo, sha)`.
    async fn set_status(
        &self,
        ctx: &OpContext,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), RepoClientError>;

    /// Commit message for `(repo, sha)`.
    async fn get_commit_message(
        &self,
        ctx: &OpContext,
        repo: &str,
        sha: &str,
    ) -> Result<String, RepoClientError>;
}
