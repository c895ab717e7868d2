//! Notification events, payloads and fan-out contract.
//!
//! The manager composes one payload per lifecycle event and hands it to a
//! router built per-call by a factory from the repo's (defaults-merged)
//! notification config. Send failures are logged and audited, never
//! surfaced to the operation.

use async_trait::async_trait;
use qaenv_state::{NotificationTemplate, Notifications};
use serde::{Deserialize, Serialize};

/// Lifecycle events that produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    CreateEnvironment,
    UpdateEnvironment,
    DestroyEnvironment,
    Success,
    Failure,
}

impl NotificationEvent {
    /// Stable key used for template lookup and audit messages.
    pub fn key(&self) -> &'static str {
        match self {
            Self::CreateEnvironment => "create_environment",
            Self::UpdateEnvironment => "update_environment",
            Self::DestroyEnvironment => "destroy_environment",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Everything a channel needs to render a notification message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub env_name: String,
    pub repo: String,
    pub source_branch: String,
    pub source_sha: String,
    pub base_branch: String,
    pub base_sha: String,
    pub user: String,
    pub pull_request: u64,
    pub k8s_namespace: String,
    pub commit_message: String,
    pub error_message: String,
}

/// One notification ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event: NotificationEvent,
    pub data: NotificationData,
    pub template: NotificationTemplate,
}

/// Errors delivering notifications.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("error sending to {channel}: {message}")]
    Send { channel: String, message: String },
}

/// Fans one notification out to every configured channel.
#[async_trait]
pub trait Router: Send + Sync {
    async fn fan_out(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Builds a router for one fan-out from the merged notification config and
/// the triggering user.
pub trait RouterFactory: Send + Sync {
    fn router(&self, notifications: &Notifications, user: &str) -> Box<dyn Router>;
}
