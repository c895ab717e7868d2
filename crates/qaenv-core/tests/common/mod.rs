//! Shared test harness: a `Manager` wired to recording fakes.

#![allow(dead_code)]

use std::sync::Arc;

use qaenv_core::blobstore::BlobConfig;
use qaenv_core::fakes::*;
use qaenv_core::installer::{ChartError, FailedResource};
use qaenv_core::locker::PreemptiveLockProvider;
use qaenv_core::manager::Manager;
use qaenv_state::fakes::MemoryDataLayer;
use qaenv_state::{
    DependencyDeclaration, Notifications, RepoConfig, RepoConfigAppMetadata, RepoConfigDependency,
    RepoRevisionData,
};

pub struct Harness {
    pub dl: Arc<MemoryDataLayer>,
    pub repo_client: Arc<FakeRepoClient>,
    pub metrics: Arc<RecordingCollector>,
    pub locks: Arc<PreemptiveLockProvider>,
    pub config_getter: Arc<FakeConfigGetter>,
    pub installer: Arc<FakeInstaller>,
    pub router: Arc<RecordingRouterFactory>,
    pub blob: Arc<FakeBlobStore>,
    pub manager: Arc<Manager>,
}

/// Harness with the blob store configured for failure reports.
pub fn harness() -> Harness {
    harness_with_blob(BlobConfig {
        region: "us-west-2".to_string(),
        bucket: "qa-env-artifacts".to_string(),
        key_prefix: "qa/".to_string(),
    })
}

pub fn harness_with_blob(blob_config: BlobConfig) -> Harness {
    let dl = Arc::new(MemoryDataLayer::new());
    let repo_client = Arc::new(FakeRepoClient::new());
    let metrics = Arc::new(RecordingCollector::new());
    let locks = Arc::new(PreemptiveLockProvider::new());
    let config_getter = Arc::new(FakeConfigGetter::with_config(repo_config()));
    let installer = Arc::new(FakeInstaller::with_data_layer(Arc::clone(&dl)));
    let router = Arc::new(RecordingRouterFactory::new());
    let blob = Arc::new(FakeBlobStore::new());

    let manager = Arc::new(Manager {
        dl: Arc::clone(&dl) as Arc<dyn qaenv_state::DataLayer>,
        repo_client: Arc::clone(&repo_client) as Arc<dyn qaenv_core::github::RepoClient>,
        metrics: Arc::clone(&metrics) as Arc<dyn qaenv_core::metrics::Collector>,
        name_generator: Arc::new(SequenceNameGenerator::with_names(["calm-heron-7"])),
        lock_provider: Arc::clone(&locks),
        config_getter: Arc::clone(&config_getter) as Arc<dyn qaenv_core::config::ConfigGetter>,
        installer: Arc::clone(&installer) as Arc<dyn qaenv_core::installer::ChartInstaller>,
        router_factory: Arc::clone(&router) as Arc<dyn qaenv_core::notifier::RouterFactory>,
        blob_store: Arc::clone(&blob) as Arc<dyn qaenv_core::blobstore::BlobStore>,
        blob_config,
        default_notifications: Notifications::default(),
        scratch_root: None,
    });

    Harness {
        dl,
        repo_client,
        metrics,
        locks,
        config_getter,
        installer,
        router,
        blob,
        manager,
    }
}

pub fn revision() -> RepoRevisionData {
    RepoRevisionData {
        repo: "acme/widgets".to_string(),
        pull_request: 7,
        source_branch: "feature".to_string(),
        source_sha: "aaa111".to_string(),
        base_branch: "main".to_string(),
        base_sha: "bbb222".to_string(),
        source_ref: "refs/heads/feature".to_string(),
        user: "jdoe".to_string(),
    }
}

/// Config with two dependencies, matching what `FakeInstaller` records.
pub fn repo_config() -> RepoConfig {
    RepoConfig {
        version: 2,
        application: RepoConfigAppMetadata {
            repo: "acme/widgets".to_string(),
            git_ref: "refs/heads/feature".to_string(),
            branch: "feature".to_string(),
            commit_sha: "aaa111".to_string(),
            chart_path: ".chart/widgets".to_string(),
            chart_vars_path: ".chart/vars.yml".to_string(),
            image: "acme/widgets".to_string(),
        },
        dependencies: DependencyDeclaration {
            direct: vec![
                dependency("db"),
                dependency("cache"),
            ],
            environment: Vec::new(),
        },
        notifications: Notifications::default(),
    }
}

pub fn dependency(name: &str) -> RepoConfigDependency {
    RepoConfigDependency {
        name: name.to_string(),
        repo: format!("acme/{name}"),
        git_ref: "refs/heads/main".to_string(),
        commit_sha: format!("sha-{name}"),
        chart_path: format!(".chart/{name}"),
        chart_vars_path: String::new(),
        requires: Vec::new(),
    }
}

/// A structured chart error with one failed deployment.
pub fn chart_error() -> ChartError {
    ChartError {
        helm_error: "release widgets-web failed: timed out waiting for rollout".to_string(),
        failed_deployments: vec![FailedResource {
            name: "widgets-web".to_string(),
            reason: "CrashLoopBackOff".to_string(),
            message: "back-off restarting failed container".to_string(),
        }],
        failed_jobs: Vec::new(),
        failed_daemon_sets: Vec::new(),
    }
}

/// A structured chart error with no failed resources.
pub fn bare_chart_error() -> ChartError {
    ChartError {
        helm_error: "chart dependency resolution failed".to_string(),
        failed_deployments: Vec::new(),
        failed_jobs: Vec::new(),
        failed_daemon_sets: Vec::new(),
    }
}
