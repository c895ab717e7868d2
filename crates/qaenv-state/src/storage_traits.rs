//! Persistence trait for the environment manager.
//!
//! `DataLayer` is the single storage abstraction consumed by the lifecycle
//! orchestrator: environment record CRUD, lifecycle-field setters, cluster
//! bindings and the audit event log. It is async and backend-agnostic; an
//! in-memory fake is provided for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::{
    EnvironmentStatus, HelmRelease, K8sEnvironment, QAEnvironment, RepoRevisionData,
};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Environment record store.
///
/// Guarantees:
/// - Record names are unique; `create_environment` overwrites nothing.
/// - Setters are idempotent and target a record by name.
/// - `extant_environments` returns only records whose status is not
///   `Destroyed`.
#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Insert a fresh environment record.
    async fn create_environment(&self, env: &QAEnvironment) -> StorageResult<()>;

    /// Fetch a record by name, if present.
    async fn get_environment(&self, name: &str) -> StorageResult<Option<QAEnvironment>>;

    /// All records (any status) for a `(repo, PR)` pair.
    async fn environments_for_pr(
        &self,
        repo: &str,
        pull_request: u64,
    ) -> StorageResult<Vec<QAEnvironment>>;

    /// Records for a `(repo, PR)` pair whose status is not `Destroyed`.
    async fn extant_environments(
        &self,
        repo: &str,
        pull_request: u64,
    ) -> StorageResult<Vec<QAEnvironment>>;

    /// Set the lifecycle status of a record.
    async fn set_status(&self, name: &str, status: EnvironmentStatus) -> StorageResult<()>;

    /// Overwrite the revision fields of a record from `rd`.
    async fn set_repo_data(&self, name: &str, rd: &RepoRevisionData) -> StorageResult<()>;

    /// Refresh the creation timestamp of a reused record.
    async fn set_created(&self, name: &str, created: DateTime<Utc>) -> StorageResult<()>;

    /// Persist the dependency repository → git ref map.
    async fn set_ref_map(
        &self,
        name: &str,
        ref_map: &BTreeMap<String, String>,
    ) -> StorageResult<()>;

    /// Persist the dependency repository → commit SHA map.
    async fn set_commit_sha_map(
        &self,
        name: &str,
        commit_sha_map: &BTreeMap<String, String>,
    ) -> StorageResult<()>;

    /// Cluster binding for an environment, if the installer has written one.
    async fn k8s_env(&self, name: &str) -> StorageResult<Option<K8sEnvironment>>;

    /// Helm releases currently installed for an environment.
    async fn helm_releases(&self, name: &str) -> StorageResult<Vec<HelmRelease>>;

    /// Append a human-readable audit event to a record. Unknown names are
    /// ignored: audit writes never fail an operation.
    async fn add_event(&self, name: &str, message: &str) -> StorageResult<()>;
}
