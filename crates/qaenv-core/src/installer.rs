//! Chart installer contract.
//!
//! The installer realizes an environment's chart topology on the cluster:
//! fresh installs into a new namespace, installs or upgrades into an
//! existing namespace, and teardown. After a successful install or upgrade
//! it writes the `K8sEnvironment` binding and sets the record status to
//! `Success`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use qaenv_state::{K8sEnvironment, QAEnvironment, RepoConfig};

use crate::config::ChartLocations;
use crate::context::OpContext;

/// Everything the installer needs to build charts for one environment.
#[derive(Debug, Clone)]
pub struct EnvInfo {
    pub env: QAEnvironment,
    pub rc: RepoConfig,
    /// Dependency name → existing release name; populated only for
    /// in-place upgrades.
    pub releases: BTreeMap<String, String>,
}

/// A cluster resource that failed to become healthy during an install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResource {
    pub name: String,
    pub reason: String,
    pub message: String,
}

/// Structured installer failure enumerating unhealthy resources alongside
/// the underlying helm error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("chart error: {helm_error}")]
pub struct ChartError {
    pub helm_error: String,
    pub failed_deployments: Vec<FailedResource>,
    pub failed_jobs: Vec<FailedResource>,
    pub failed_daemon_sets: Vec<FailedResource>,
}

impl ChartError {
    pub fn has_failed_resources(&self) -> bool {
        !self.failed_deployments.is_empty()
            || !self.failed_jobs.is_empty()
            || !self.failed_daemon_sets.is_empty()
    }
}

/// Errors from the chart installer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstallError {
    /// Structured failure with per-resource detail.
    #[error(transparent)]
    Chart(#[from] ChartError),

    /// Anything else the install pipeline surfaced.
    #[error("{0}")]
    Failed(String),
}

/// Cluster-side chart operations consumed by the orchestrator.
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    /// Install all charts into a fresh namespace.
    async fn build_and_install_charts(
        &self,
        ctx: &OpContext,
        info: &EnvInfo,
        locations: &ChartLocations,
    ) -> Result<(), InstallError>;

    /// Install all charts into the environment's existing namespace.
    async fn build_and_install_charts_into_existing(
        &self,
        ctx: &OpContext,
        info: &EnvInfo,
        k8s_env: &K8sEnvironment,
        locations: &ChartLocations,
    ) -> Result<(), InstallError>;

    /// Upgrade the releases named in `info.releases` in place.
    async fn build_and_upgrade_charts(
        &self,
        ctx: &OpContext,
        info: &EnvInfo,
        k8s_env: &K8sEnvironment,
        locations: &ChartLocations,
    ) -> Result<(), InstallError>;

    /// Delete all helm releases for the environment.
    async fn delete_releases(
        &self,
        ctx: &OpContext,
        k8s_env: &K8sEnvironment,
    ) -> Result<(), InstallError>;

    /// Delete the environment's namespace.
    async fn delete_namespace(
        &self,
        ctx: &OpContext,
        k8s_env: &K8sEnvironment,
    ) -> Result<(), InstallError>;
}
