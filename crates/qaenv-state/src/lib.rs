//! Data model and persistence contract for the QA environment manager.
//!
//! The lifecycle orchestrator in `qaenv-core` consumes this crate's
//! `DataLayer` trait; real deployments back it with a database, tests use
//! the in-memory fake.

pub mod error;
pub mod fakes;
pub mod models;
pub mod storage_traits;

pub use error::StorageError;
pub use models::{
    ConfigSignature, DependencyDeclaration, EnvironmentEvent, EnvironmentStatus,
    GitHubNotifications, HelmRelease, K8sEnvironment, NotificationTemplate,
    NotificationTemplateSection, Notifications, QAEnvironment, RepoConfig,
    RepoConfigAppMetadata, RepoConfigDependency, RepoConfigError, RepoRevisionData,
    SlackNotifications,
};
pub use storage_traits::{DataLayer, StorageResult};
