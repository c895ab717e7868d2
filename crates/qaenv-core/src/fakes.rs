//! In-memory fakes for the manager's collaborator traits (testing only)
//!
//! Each fake records the calls it receives so tests can assert on
//! fan-out, ordering and payloads. `FakeInstaller` also mirrors the real
//! installer's side-effects: on success it sets the record status to
//! `Success` and writes the cluster binding.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use qaenv_state::fakes::MemoryDataLayer;
use qaenv_state::{
    DataLayer, EnvironmentStatus, HelmRelease, K8sEnvironment, Notifications, RepoConfig,
    RepoRevisionData,
};

use crate::blobstore::{BlobError, BlobStore, PushOptions};
use crate::config::{ChartLocation, ChartLocations, ConfigError, ConfigGetter};
use crate::context::{CancelHandle, OpContext};
use crate::github::{CommitStatus, RepoClient, RepoClientError};
use crate::installer::{ChartInstaller, EnvInfo, InstallError};
use crate::metrics::Collector;
use crate::namegen::{NameError, NameGenerator};
use crate::notifier::{Notification, NotificationEvent, NotifyError, Router, RouterFactory};

// ---------------------------------------------------------------------------
// FakeRepoClient
// ---------------------------------------------------------------------------

/// Records published commit statuses; serves a configurable commit message.
#[derive(Debug)]
pub struct FakeRepoClient {
    pub commit_message: Mutex<String>,
    pub fail_commit_message: AtomicBool,
    pub fail_set_status: AtomicBool,
    statuses: Mutex<Vec<(String, String, CommitStatus)>>,
}

impl Default for FakeRepoClient {
    fn default() -> Self {
        Self {
            commit_message: Mutex::new("add feature".to_string()),
            fail_commit_message: AtomicBool::new(false),
            fail_set_status: AtomicBool::new(false),
            statuses: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRepoClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// All statuses published so far, as `(repo, sha, status)`.
    pub fn statuses(&self) -> Vec<(String, String, CommitStatus)> {
        self.statuses.lock().unwrap().clone()
    }

    /// The sequence of published status states, e.g. `["pending", "success"]`.
    pub fn status_states(&self) -> Vec<&'static str> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, s)| s.state.as_str())
            .collect()
    }
}

#[async_trait]
impl RepoClient for FakeRepoClient {
    async fn set_status(
        &self,
        _ctx: &OpContext,
        repo: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), RepoClientError> {
        if self.fail_set_status.load(Ordering::SeqCst) {
            return Err(RepoClientError::Api("status rejected".to_string()));
        }
        self.statuses
            .lock()
            .unwrap()
            .push((repo.to_string(), sha.to_string(), status.clone()));
        Ok(())
    }

    async fn get_commit_message(
        &self,
        _ctx: &OpContext,
        _repo: &str,
        _sha: &str,
    ) -> Result<String, RepoClientError> {
        if self.fail_commit_message.load(Ordering::SeqCst) {
            return Err(RepoClientError::Api("not found".to_string()));
        }
        Ok(self.commit_message.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// FakeConfigGetter
// ---------------------------------------------------------------------------

/// Serves a fixed `RepoConfig`; optionally delays or fails.
#[derive(Debug, Default)]
pub struct FakeConfigGetter {
    /// Config to return; `None` makes `get` fail.
    pub config: Mutex<Option<RepoConfig>>,
    /// Artificial latency for `get`, for races against preemption.
    pub get_delay: Mutex<Option<Duration>>,
    pub fail_fetch_charts: AtomicBool,
    fetched_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeConfigGetter {
    pub fn with_config(rc: RepoConfig) -> Self {
        Self {
            config: Mutex::new(Some(rc)),
            ..Self::default()
        }
    }

    /// Scratch directories passed to `fetch_charts`, in call order.
    pub fn fetched_dirs(&self) -> Vec<PathBuf> {
        self.fetched_dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConfigGetter for FakeConfigGetter {
    async fn get(&self, _ctx: &OpContext, _rd: &RepoRevisionData) -> Result<RepoConfig, ConfigError> {
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ConfigError::Missing("acyl.yml not found".to_string()))
    }

    async fn fetch_charts(
        &self,
        _ctx: &OpContext,
        rc: &RepoConfig,
        dir: &Path,
    ) -> Result<ChartLocations, ConfigError> {
        self.fetched_dirs.lock().unwrap().push(dir.to_path_buf());
        if self.fail_fetch_charts.load(Ordering::SeqCst) {
            return Err(ConfigError::ChartFetch("chart path missing".to_string()));
        }
        let mut locations = ChartLocations::new();
        let app_name = rc
            .application
            .repo
            .rsplit('/')
            .next()
            .unwrap_or("app")
            .to_string();
        locations.insert(
            app_name.clone(),
            ChartLocation {
                chart_path: dir.join(&app_name).join("Chart.yaml"),
                var_file_path: dir.join(&app_name).join("values.yml"),
            },
        );
        for dep in rc.dependencies.all() {
            locations.insert(
                dep.name.clone(),
                ChartLocation {
                    chart_path: dir.join(&dep.name).join("Chart.yaml"),
                    var_file_path: dir.join(&dep.name).join("values.yml"),
                },
            );
        }
        Ok(locations)
    }
}

// ---------------------------------------------------------------------------
// FakeInstaller
// ---------------------------------------------------------------------------

/// One recorded installer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerCall {
    Install { env_name: String },
    InstallIntoExisting { env_name: String },
    Upgrade {
        env_name: String,
        releases: BTreeMap<String, String>,
    },
    DeleteReleases { env_name: String },
    DeleteNamespace { env_name: String },
}

/// Records installer invocations and mirrors the real installer's success
/// side-effects against the supplied data layer.
#[derive(Default)]
pub struct FakeInstaller {
    /// When set, success paths write status and cluster bindings here.
    pub dl: Option<Arc<MemoryDataLayer>>,
    pub install_error: Mutex<Option<InstallError>>,
    pub upgrade_error: Mutex<Option<InstallError>>,
    /// Cancelled just before an install/upgrade returns, to simulate a
    /// caller that gave up mid-flight.
    pub cancel_before_result: Mutex<Option<CancelHandle>>,
    calls: Mutex<Vec<InstallerCall>>,
}

impl FakeInstaller {
    pub fn with_data_layer(dl: Arc<MemoryDataLayer>) -> Self {
        Self {
            dl: Some(dl),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<InstallerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: InstallerCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn fire_cancel(&self) {
        if let Some(handle) = self.cancel_before_result.lock().unwrap().take() {
            handle.cancel();
        }
    }

    async fn complete_install(&self, info: &EnvInfo) -> Result<(), InstallError> {
        self.fire_cancel();
        if let Some(err) = self.install_error.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(dl) = &self.dl {
            dl.insert_k8s_env(K8sEnvironment {
                env_name: info.env.name.clone(),
                namespace: format!("nitro-{}", info.env.name),
                config_signature: info.rc.config_signature(),
            });
            dl.clear_helm_releases(&info.env.name);
            for dep in info.rc.dependencies.all() {
                dl.insert_helm_release(HelmRelease {
                    env_name: info.env.name.clone(),
                    name: dep.name.clone(),
                    release: format!("{}-release", dep.name),
                });
            }
            dl.set_status(&info.env.name, EnvironmentStatus::Success)
                .await
                .map_err(|e| InstallError::Failed(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ChartInstaller for FakeInstaller {
    async fn build_and_install_charts(
        &self,
        _ctx: &OpContext,
        info: &EnvInfo,
        _locations: &ChartLocations,
    ) -> Result<(), InstallError> {
        self.record(InstallerCall::Install {
            env_name: info.env.name.clone(),
        });
        self.complete_install(info).await
    }

    async fn build_and_install_charts_into_existing(
        &self,
        _ctx: &OpContext,
        info: &EnvInfo,
        _k8s_env: &K8sEnvironment,
        _locations: &ChartLocations,
    ) -> Result<(), InstallError> {
        self.record(InstallerCall::InstallIntoExisting {
            env_name: info.env.name.clone(),
        });
        self.complete_install(info).await
    }

    async fn build_and_upgrade_charts(
        &self,
        _ctx: &OpContext,
        info: &EnvInfo,
        _k8s_env: &K8sEnvironment,
        _locations: &ChartLocations,
    ) -> Result<(), InstallError> {
        self.record(InstallerCall::Upgrade {
            env_name: info.env.name.clone(),
            releases: info.releases.clone(),
        });
        self.fire_cancel();
        if let Some(err) = self.upgrade_error.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(dl) = &self.dl {
            dl.set_status(&info.env.name, EnvironmentStatus::Success)
                .await
                .map_err(|e| InstallError::Failed(e.to_string()))?;
        }
        Ok(())
    }

    async fn delete_releases(
        &self,
        _ctx: &OpContext,
        k8s_env: &K8sEnvironment,
    ) -> Result<(), InstallError> {
        self.record(InstallerCall::DeleteReleases {
            env_name: k8s_env.env_name.clone(),
        });
        if let Some(dl) = &self.dl {
            dl.clear_helm_releases(&k8s_env.env_name);
        }
        Ok(())
    }

    async fn delete_namespace(
        &self,
        _ctx: &OpContext,
        k8s_env: &K8sEnvironment,
    ) -> Result<(), InstallError> {
        self.record(InstallerCall::DeleteNamespace {
            env_name: k8s_env.env_name.clone(),
        });
        if let Some(dl) = &self.dl {
            dl.remove_k8s_env(&k8s_env.env_name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingRouterFactory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RouterState {
    sent: Mutex<Vec<Notification>>,
    configs: Mutex<Vec<Notifications>>,
    fail: AtomicBool,
}

/// Factory whose routers record every fan-out.
#[derive(Debug, Default)]
pub struct RecordingRouterFactory {
    state: Arc<RouterState>,
}

impl RecordingRouterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn sent_events(&self) -> Vec<NotificationEvent> {
        self.state
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.event)
            .collect()
    }

    /// Merged notification configs passed to the factory, in call order.
    pub fn configs(&self) -> Vec<Notifications> {
        self.state.configs.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.state.fail.store(fail, Ordering::SeqCst);
    }
}

struct RecordingRouter {
    state: Arc<RouterState>,
}

#[async_trait]
impl Router for RecordingRouter {
    async fn fan_out(&self, notification: Notification) -> Result<(), NotifyError> {
        if self.state.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Send {
                channel: "slack".to_string(),
                message: "channel unreachable".to_string(),
            });
        }
        self.state.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

impl RouterFactory for RecordingRouterFactory {
    fn router(&self, notifications: &Notifications, _user: &str) -> Box<dyn Router> {
        self.state
            .configs
            .lock()
            .unwrap()
            .push(notifications.clone());
        Box::new(RecordingRouter {
            state: Arc::clone(&self.state),
        })
    }
}

// ---------------------------------------------------------------------------
// FakeBlobStore
// ---------------------------------------------------------------------------

/// One recorded blob push.
#[derive(Debug, Clone)]
pub struct BlobPush {
    pub content_type: String,
    pub body: Vec<u8>,
    pub opts: PushOptions,
}

/// Records pushes and serves deterministic presigned URLs.
#[derive(Debug, Default)]
pub struct FakeBlobStore {
    pub fail: AtomicBool,
    pushes: Mutex<Vec<BlobPush>>,
}

impl FakeBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushes(&self) -> Vec<BlobPush> {
        self.pushes.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    async fn push(
        &self,
        content_type: &str,
        body: Vec<u8>,
        opts: PushOptions,
    ) -> Result<String, BlobError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BlobError::Upload("bucket unavailable".to_string()));
        }
        let url = format!("https://blob.example/{}?signed=1", opts.key);
        self.pushes.lock().unwrap().push(BlobPush {
            content_type: content_type.to_string(),
            body,
            opts,
        });
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// RecordingCollector
// ---------------------------------------------------------------------------

/// One recorded metric emission.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    Timing { name: String, tags: Vec<String> },
    Increment { name: String, tags: Vec<String> },
    Gauge {
        name: String,
        value: f64,
        tags: Vec<String>,
    },
}

impl MetricEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Timing { name, .. } | Self::Increment { name, .. } | Self::Gauge { name, .. } => {
                name
            }
        }
    }

    pub fn tags(&self) -> &[String] {
        match self {
            Self::Timing { tags, .. } | Self::Increment { tags, .. } | Self::Gauge { tags, .. } => {
                tags
            }
        }
    }
}

/// Collector that records every emission for assertions.
#[derive(Debug, Default)]
pub struct RecordingCollector {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of emissions (any kind) for a metric name.
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name)
            .count()
    }

    /// Emissions for `name` that carry `tag`.
    pub fn count_with_tag(&self, name: &str, tag: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.name() == name && e.tags().iter().any(|t| t == tag))
            .count()
    }
}

impl Collector for RecordingCollector {
    fn timing(&self, name: &str, _duration: Duration, tags: &[&str]) {
        self.events.lock().unwrap().push(MetricEvent::Timing {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    fn increment(&self, name: &str, tags: &[&str]) {
        self.events.lock().unwrap().push(MetricEvent::Increment {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    fn gauge(&self, name: &str, value: f64, tags: &[&str]) {
        self.events.lock().unwrap().push(MetricEvent::Gauge {
            name: name.to_string(),
            value,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
    }
}

// ---------------------------------------------------------------------------
// SequenceNameGenerator
// ---------------------------------------------------------------------------

/// Serves names from a fixed sequence, then `env-N` fallbacks.
#[derive(Debug, Default)]
pub struct SequenceNameGenerator {
    names: Mutex<VecDeque<String>>,
    counter: Mutex<u64>,
}

impl SequenceNameGenerator {
    pub fn with_names<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        Self {
            names: Mutex::new(names.into_iter().map(Into::into).collect()),
            counter: Mutex::new(0),
        }
    }
}

impl NameGenerator for SequenceNameGenerator {
    fn generate(&self) -> Result<String, NameError> {
        if let Some(name) = self.names.lock().unwrap().pop_front() {
            return Ok(name);
        }
        let mut counter = self.counter.lock().unwrap();
        *counter += 1;
        Ok(format!("env-{counter}"))
    }
}
