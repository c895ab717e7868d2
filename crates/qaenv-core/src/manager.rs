//! Lifecycle orchestration for on-demand QA environments.
//!
//! `Manager` drives the create / update / delete flows for one
//! `(repository, pull request)` pair: it serializes operations through the
//! preemptive locker, reconciles the environment record in the data layer,
//! processes repository config, stages charts and invokes the chart
//! installer, and fans out commit statuses and notifications. Terminal
//! side-effects (failure status, failure-report link) are delivered even
//! when the caller has cancelled.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use qaenv_state::{
    DataLayer, EnvironmentStatus, Notifications, QAEnvironment, RepoConfig, RepoRevisionData,
};

use crate::blobstore::{BlobConfig, BlobStore, PushOptions};
use crate::config::ConfigGetter;
use crate::context::{valid_context, OpContext};
use crate::domain::{EnvError, Result};
use crate::github::{CommitStatus, RepoClient};
use crate::installer::{ChartInstaller, EnvInfo, InstallError};
use crate::locker::PreemptiveLockProvider;
use crate::metrics::{names, Collector};
use crate::notifier::{Notification, NotificationData, NotificationEvent, RouterFactory};
use crate::obs;
use crate::report::{report_key, FailureReport};
use crate::stager::{scratch_dir, StagedCharts};

/// Sentinel message for the at-most-one-extant-environment invariant.
pub const EXTANT_ENVS_SENTINEL: &str = "did not find exactly one extant environment";

/// Working set threaded through a single operation. `rc` is absent until
/// config processing succeeds (and stays absent on the destroy path when
/// config cannot be fetched); consumers tolerate its absence.
#[derive(Debug, Clone)]
pub struct NewEnv {
    pub env: QAEnvironment,
    pub rc: Option<RepoConfig>,
}

enum ExtantEnv {
    One(QAEnvironment),
    NoneFound,
    Multiple(usize),
}

/// Creates, updates and destroys environments on the cluster.
pub struct Manager {
    pub dl: Arc<dyn DataLayer>,
    pub repo_client: Arc<dyn RepoClient>,
    pub metrics: Arc<dyn Collector>,
    pub name_generator: Arc<dyn crate::namegen::NameGenerator>,
    pub lock_provider: Arc<PreemptiveLockProvider>,
    pub config_getter: Arc<dyn ConfigGetter>,
    pub installer: Arc<dyn ChartInstaller>,
    pub router_factory: Arc<dyn RouterFactory>,
    pub blob_store: Arc<dyn BlobStore>,
    pub blob_config: BlobConfig,
    /// Process-wide notification defaults, merged under each repo's config.
    pub default_notifications: Notifications,
    /// Root for chart scratch directories; system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
}

impl Manager {
    // -----------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------

    /// Create a new environment for `rd`, reusing any prior record for the
    /// same `(repo, PR)`. Returns the environment name.
    pub async fn create(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        self.locking_operation(ctx, &rd.repo, rd.pull_request, |op_ctx| async move {
            self.create_env(&op_ctx, rd).await
        })
        .await
    }

    /// Update the environment for `rd`, upgrading in place when the config
    /// signature allows it. Falls through to the create flow when no
    /// extant environment exists.
    pub async fn update(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        self.locking_operation(ctx, &rd.repo, rd.pull_request, |op_ctx| async move {
            self.update_env(&op_ctx, rd).await
        })
        .await
    }

    /// Destroy the environment for `rd` and mark its record destroyed.
    pub async fn delete(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<()> {
        self.locking_operation(ctx, &rd.repo, rd.pull_request, |op_ctx| async move {
            self.delete_env(&op_ctx, rd).await
        })
        .await
    }

    // -----------------------------------------------------------------
    // Lock coordination
    // -----------------------------------------------------------------

    /// Run `f` inside the preemptive critical section for `(repo, PR)`.
    ///
    /// The context handed to `f` is cancelled when the original caller
    /// cancels or when a later operation for the same key arrives. The
    /// lock is released only after `f` has returned and the operation
    /// metrics are recorded.
    async fn locking_operation<T, F, Fut>(
        &self,
        ctx: &OpContext,
        repo: &str,
        pull_request: u64,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(OpContext) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let repo_tag = format!("triggering_repo:{repo}");

        let lock_start = Instant::now();
        let locker = self.lock_provider.locker(repo, pull_request);
        let guard = match locker.lock(ctx).await {
            Ok(guard) => guard,
            Err(e) => {
                self.metrics.timing(
                    names::LOCK_WAIT,
                    lock_start.elapsed(),
                    &[&repo_tag, "success:false"],
                );
                return Err(EnvError::unclassified(e).wrap("error getting lock"));
            }
        };
        self.metrics.timing(
            names::LOCK_WAIT,
            lock_start.elapsed(),
            &[&repo_tag, "success:true"],
        );

        // Cancel the scoped context on preemption or caller cancellation.
        // The stop channel ends the watcher once f has returned.
        let (op_ctx, op_cancel) = ctx.child();
        let preempt = guard.preempt_signal();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let parent = ctx.clone();
        let metrics = Arc::clone(&self.metrics);
        let watcher_repo = repo.to_string();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = preempt.wait() => {
                    let tag = format!("triggering_repo:{watcher_repo}");
                    metrics.increment(names::LOCK_PREEMPT, &[&tag]);
                    obs::emit_preempted(&watcher_repo, pull_request);
                }
                _ = parent.cancelled() => {}
                _ = stop_rx => {}
            }
            op_cancel.cancel();
        });

        let op_start = Instant::now();
        let result = f(op_ctx).await;
        let _ = stop_tx.send(());

        match &result {
            Ok(_) => {
                obs::emit_op_finished("operation", repo, pull_request, false, false, None);
                self.metrics.timing(
                    names::OPERATION,
                    op_start.elapsed(),
                    &[&repo_tag, "success:true", "user_error:false", "system_error:false"],
                );
            }
            Err(e) => {
                obs::emit_op_finished(
                    "operation",
                    repo,
                    pull_request,
                    e.is_user(),
                    e.is_system(),
                    Some(e),
                );
                let user_tag = format!("user_error:{}", e.is_user());
                let system_tag = format!("system_error:{}", e.is_system());
                self.metrics.timing(
                    names::OPERATION,
                    op_start.elapsed(),
                    &[&repo_tag, "success:false", &user_tag, &system_tag],
                );
            }
        }

        drop(guard);
        let _ = watcher.await;
        result
    }

    // -----------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------

    async fn create_env(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        let start = Instant::now();
        let result = self
            .create_flow(ctx, rd)
            .instrument(obs::op_span("create", &rd.repo, rd.pull_request))
            .await;
        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let success_tag = format!("success:{}", result.is_ok());
        self.metrics
            .timing(names::CREATE, start.elapsed(), &[&repo_tag, &success_tag]);
        result
    }

    async fn create_flow(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        let env = self
            .generate_new_env(ctx, rd)
            .await
            .map_err(|e| e.wrap("error generating environment data"))?;
        self.bind_env(ctx, &env.name).await;

        let mut ne = NewEnv { env, rc: None };
        let result = self.create_in_record(ctx, &mut ne, rd).await;
        match &result {
            Err(e) => {
                if let Err(serr) = self
                    .dl
                    .set_status(&ne.env.name, EnvironmentStatus::Failure)
                    .await
                {
                    warn!(error = %serr, "error setting environment status to failed");
                }
                self.push_notification(
                    ctx,
                    &ne,
                    NotificationEvent::Failure,
                    &format!("error creating: {e}"),
                )
                .await;
                self.publish_failure_status(ctx, rd).await;
                let repo_tag = format!("triggering_repo:{}", rd.repo);
                self.metrics.increment(names::CREATE_ERRORS, &[&repo_tag]);
            }
            Ok(_) => {
                // the installer has already set the record to Success
                self.push_notification(ctx, &ne, NotificationEvent::Success, "")
                    .await;
                self.publish_success_status(ctx, rd).await;
            }
        }
        result
    }

    async fn create_in_record(
        &self,
        ctx: &OpContext,
        ne: &mut NewEnv,
        rd: &RepoRevisionData,
    ) -> Result<String> {
        self.process_env_config(ctx, ne, rd)
            .await
            .map_err(|e| e.wrap("error processing environment config"))?;

        if ctx.is_cancelled() {
            return Err(EnvError::user_msg("context was cancelled in create"));
        }

        self.push_notification(ctx, ne, NotificationEvent::CreateEnvironment, "")
            .await;
        self.publish_pending_status(ctx, rd).await;

        let Some(rc) = ne.rc.clone() else {
            return Err(EnvError::system_msg("repo config missing after processing"));
        };
        let staged = self
            .fetch_charts(ctx, &ne.env.name, &rc)
            .await
            .map_err(|e| e.wrap("error fetching charts"))?;

        let info = EnvInfo {
            env: ne.env.clone(),
            rc,
            releases: BTreeMap::new(),
        };
        if let Err(e) = self
            .installer
            .build_and_install_charts(ctx, &info, &staged.locations)
            .await
        {
            return Err(self
                .handle_chart_error(ctx, ne, e, "error installing charts")
                .await);
        }
        Ok(ne.env.name.clone())
    }

    // -----------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------

    async fn update_env(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        let start = Instant::now();
        let result = self
            .update_flow(ctx, rd)
            .instrument(obs::op_span("update", &rd.repo, rd.pull_request))
            .await;
        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let success_tag = format!("success:{}", result.is_ok());
        self.metrics
            .timing(names::UPDATE, start.elapsed(), &[&repo_tag, &success_tag]);
        result
    }

    async fn update_flow(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<String> {
        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let env = match self.get_extant_env(rd).await? {
            ExtantEnv::One(env) => env,
            ExtantEnv::NoneFound => {
                // the create flow reuses the previous record, if any
                info!("could not find an extant environment so creating new env from scratch");
                self.metrics.increment(names::UPDATE_CREATE, &[&repo_tag]);
                return self.create_env(ctx, rd).await;
            }
            ExtantEnv::Multiple(count) => {
                warn!(count, "expected exactly one extant environment");
                return Err(EnvError::system_msg(EXTANT_ENVS_SENTINEL)
                    .wrap("error getting extant environment"));
            }
        };
        self.bind_env(ctx, &env.name).await;

        let mut ne = NewEnv { env, rc: None };
        let result = self.update_in_record(ctx, &mut ne, rd).await;
        match &result {
            Err(e) => {
                if let Err(serr) = self
                    .dl
                    .set_status(&ne.env.name, EnvironmentStatus::Failure)
                    .await
                {
                    warn!(error = %serr, "error setting environment status to failed");
                }
                self.push_notification(ctx, &ne, NotificationEvent::Failure, &e.to_string())
                    .await;
                self.publish_failure_status(ctx, rd).await;
            }
            Ok(_) => {
                // the installer has already set the record to Success
                self.push_notification(ctx, &ne, NotificationEvent::Success, "")
                    .await;
                self.publish_success_status(ctx, rd).await;
            }
        }
        result
    }

    async fn update_in_record(
        &self,
        ctx: &OpContext,
        ne: &mut NewEnv,
        rd: &RepoRevisionData,
    ) -> Result<String> {
        self.process_env_config(ctx, ne, rd)
            .await
            .map_err(|e| e.wrap("error processing environment config for update"))?;

        let k8s_env = match self.dl.k8s_env(&ne.env.name).await {
            Err(e) => return Err(EnvError::system(e).wrap("error getting k8s environment")),
            Ok(None) => return Err(EnvError::system_msg("missing k8s environment")),
            Ok(Some(k8s_env)) => k8s_env,
        };

        if ctx.is_cancelled() {
            return Err(EnvError::user_msg("context was cancelled in update"));
        }

        self.push_notification(ctx, ne, NotificationEvent::UpdateEnvironment, "")
            .await;
        self.publish_pending_status(ctx, rd).await;

        let Some(rc) = ne.rc.clone() else {
            return Err(EnvError::system_msg("repo config missing after processing"));
        };
        let staged = self
            .fetch_charts(ctx, &ne.env.name, &rc)
            .await
            .map_err(|e| e.wrap("error fetching charts"))?;

        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let mut info = EnvInfo {
            env: ne.env.clone(),
            rc: rc.clone(),
            releases: BTreeMap::new(),
        };

        // Signature gate: upgrade in place only when the chart topology is
        // unchanged and the previous install succeeded.
        if rc.config_signature() == k8s_env.config_signature
            && ne.env.status == EnvironmentStatus::Success
        {
            info!("config signature matches previous successful environment: performing helm release upgrades");
            self.metrics.increment(names::UPDATE_IN_PLACE, &[&repo_tag]);
            let releases = self
                .dl
                .helm_releases(&ne.env.name)
                .await
                .map_err(|e| EnvError::system(e).wrap("error getting helm releases for env"))?;
            info.releases = releases.into_iter().map(|r| (r.name, r.release)).collect();
            if let Err(e) = self
                .installer
                .build_and_upgrade_charts(ctx, &info, &k8s_env, &staged.locations)
                .await
            {
                return Err(self
                    .handle_chart_error(ctx, ne, e, "error upgrading charts")
                    .await);
            }
            return Ok(ne.env.name.clone());
        }

        info!("config signature mismatch or previous environment failed: deleting all helm releases and building environment into existing namespace");
        self.metrics.increment(names::UPDATE_TEAR_DOWN, &[&repo_tag]);
        self.installer
            .delete_releases(ctx, &k8s_env)
            .await
            .map_err(|e| {
                EnvError::unclassified(e).wrap("error deleting helm releases for environment")
            })?;
        if let Err(e) = self
            .installer
            .build_and_install_charts_into_existing(ctx, &info, &k8s_env, &staged.locations)
            .await
        {
            return Err(self
                .handle_chart_error(ctx, ne, e, "error installing charts into existing namespace")
                .await);
        }
        Ok(ne.env.name.clone())
    }

    // -----------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------

    async fn delete_env(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<()> {
        let start = Instant::now();
        let result = self
            .delete_flow(ctx, rd)
            .instrument(obs::op_span("delete", &rd.repo, rd.pull_request))
            .await;
        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let success_tag = format!("success:{}", result.is_ok());
        self.metrics
            .timing(names::DELETE, start.elapsed(), &[&repo_tag, &success_tag]);
        result
    }

    async fn delete_flow(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<()> {
        let env = match self.get_extant_env(rd).await? {
            ExtantEnv::One(env) => env,
            ExtantEnv::NoneFound => {
                // nothing running: mark every record for the pair destroyed
                info!("no extant envs for destroy request");
                let envs = self
                    .dl
                    .environments_for_pr(&rd.repo, rd.pull_request)
                    .await
                    .map_err(|e| {
                        EnvError::system(e).wrap(format!(
                            "error getting environments associated with the repo ({}) and PR ({})",
                            rd.repo, rd.pull_request
                        ))
                    })?;
                for env in envs {
                    info!(env_name = %env.name, "setting environment to status destroyed");
                    if let Err(e) = self
                        .dl
                        .set_status(&env.name, EnvironmentStatus::Destroyed)
                        .await
                    {
                        warn!(env_name = %env.name, error = %e, "error setting status to destroyed");
                    }
                }
                return Ok(());
            }
            ExtantEnv::Multiple(count) => {
                warn!(count, "expected exactly one extant environment");
                return Err(EnvError::system_msg(EXTANT_ENVS_SENTINEL)
                    .wrap("error getting extant environment"));
            }
        };
        self.bind_env(ctx, &env.name).await;

        let mut ne = NewEnv { env, rc: None };
        // on config errors the destroy proceeds with default notifications
        if let Err(e) = self.process_env_config(ctx, &mut ne, rd).await {
            warn!(error = %e, "error processing environment config");
        }

        let result = self.delete_in_record(ctx, &ne, rd).await;
        if let Err(e) = &result {
            self.push_notification(
                ctx,
                &ne,
                NotificationEvent::Failure,
                &format!("error destroying: {e}"),
            )
            .await;
        }
        result
    }

    async fn delete_in_record(
        &self,
        ctx: &OpContext,
        ne: &NewEnv,
        rd: &RepoRevisionData,
    ) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(EnvError::user_msg("context was cancelled in delete"));
        }

        self.push_notification(ctx, ne, NotificationEvent::DestroyEnvironment, "")
            .await;

        let k8s_env = match self.dl.k8s_env(&ne.env.name).await {
            Err(e) => return Err(EnvError::system(e).wrap("error getting k8s environment")),
            Ok(None) => return Err(EnvError::system_msg("missing k8s environment")),
            Ok(Some(k8s_env)) => k8s_env,
        };

        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let start = Instant::now();
        self.installer
            .delete_releases(ctx, &k8s_env)
            .await
            .map_err(|e| EnvError::unclassified(e).wrap("error deleting helm releases"))?;
        self.installer
            .delete_namespace(ctx, &k8s_env)
            .await
            .map_err(|e| EnvError::unclassified(e).wrap("error deleting namespace"))?;
        self.metrics.timing(
            names::DELETE_NAMESPACE_DURATION,
            start.elapsed(),
            &[&repo_tag],
        );

        self.dl
            .set_status(&ne.env.name, EnvironmentStatus::Destroyed)
            .await
            .map_err(|e| EnvError::system(e).wrap("error setting environment status"))?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Record management
    // -----------------------------------------------------------------

    /// Allocate or reuse the environment record for `rd`.
    ///
    /// When records exist for the `(repo, PR)` the latest-created one is
    /// reused: status reset to `Spawned`, revision fields overwritten and
    /// the creation timestamp refreshed. Otherwise a fresh record is
    /// inserted under a newly generated name. Any failure is a system
    /// error.
    async fn generate_new_env(
        &self,
        ctx: &OpContext,
        rd: &RepoRevisionData,
    ) -> Result<QAEnvironment> {
        let mut envs = self
            .dl
            .environments_for_pr(&rd.repo, rd.pull_request)
            .await
            .map_err(|e| EnvError::system(e).wrap("error checking for existing environment record"))?;
        envs.sort_by_key(|e| e.created);
        match envs.pop() {
            Some(env) => {
                obs::emit_record_reused(&env.name);
                self.dl
                    .set_status(&env.name, EnvironmentStatus::Spawned)
                    .await
                    .map_err(|e| EnvError::system(e).wrap("error setting environment status"))?;
                let event_id = ctx.event_id().unwrap_or_else(Uuid::nil);
                let _ = self
                    .dl
                    .add_event(
                        &env.name,
                        &format!("reusing environment record for webhook event {event_id}"),
                    )
                    .await;
                self.dl
                    .set_repo_data(&env.name, rd)
                    .await
                    .map_err(|e| EnvError::system(e).wrap("error setting environment repo data"))?;
                self.dl
                    .set_created(&env.name, Utc::now())
                    .await
                    .map_err(|e| {
                        EnvError::system(e).wrap("error setting environment created timestamp")
                    })?;
                match self.dl.get_environment(&env.name).await {
                    Ok(Some(env)) => Ok(env),
                    Ok(None) => Err(EnvError::system_msg(
                        "reused environment record disappeared",
                    )),
                    Err(e) => Err(EnvError::system(e)
                        .wrap("error getting updated, reused environment record")),
                }
            }
            None => {
                let name = self
                    .name_generator
                    .generate()
                    .map_err(|e| EnvError::system(e).wrap("error generating name"))?;
                obs::emit_record_created(&name);
                let env = QAEnvironment::from_revision(&name, rd);
                self.dl
                    .create_environment(&env)
                    .await
                    .map_err(|e| EnvError::system(e).wrap("error writing environment to db"))?;
                Ok(env)
            }
        }
    }

    /// Record the webhook event id against the environment's audit log.
    async fn bind_env(&self, ctx: &OpContext, name: &str) {
        if let Some(id) = ctx.event_id() {
            if let Err(e) = self
                .dl
                .add_event(name, &format!("webhook event id: {id}"))
                .await
            {
                warn!(error = %e, "error adding webhook event id to record");
            }
        }
    }

    /// The single extant environment for `rd`, or how the invariant failed.
    async fn get_extant_env(&self, rd: &RepoRevisionData) -> Result<ExtantEnv> {
        let mut envs = self
            .dl
            .extant_environments(&rd.repo, rd.pull_request)
            .await
            .map_err(|e| EnvError::system(e).wrap("error getting extant environments"))?;
        match envs.len() {
            1 => Ok(ExtantEnv::One(envs.remove(0))),
            0 => Ok(ExtantEnv::NoneFound),
            count => Ok(ExtantEnv::Multiple(count)),
        }
    }

    // -----------------------------------------------------------------
    // Config processing
    // -----------------------------------------------------------------

    /// Fetch and validate the repo config for `rd`, derive the ref and
    /// commit-SHA maps, persist them on the record and refresh `ne.env`.
    ///
    /// `ne` stays valid on error: whatever was populated before the
    /// failure (at minimum the record) remains, so the terminal
    /// notification path never needs to branch on partial state.
    async fn process_env_config(
        &self,
        ctx: &OpContext,
        ne: &mut NewEnv,
        rd: &RepoRevisionData,
    ) -> Result<()> {
        let rc = self
            .get_repo_config(ctx, rd)
            .await
            .map_err(|e| e.wrap("error validating environment config"))?;
        let rm_result = rc.ref_map();
        let csm_result = rc.commit_sha_map();
        ne.rc = Some(rc);

        let rm = rm_result.map_err(|e| EnvError::system(e).wrap("error generating ref map"))?;
        let csm =
            csm_result.map_err(|e| EnvError::system(e).wrap("error generating commit SHA map"))?;

        self.dl
            .set_ref_map(&ne.env.name, &rm)
            .await
            .map_err(|e| EnvError::system(e).wrap("error setting environment ref map"))?;
        self.dl
            .set_commit_sha_map(&ne.env.name, &csm)
            .await
            .map_err(|e| EnvError::system(e).wrap("error setting environment commit sha map"))?;
        self.dl
            .set_repo_data(&ne.env.name, rd)
            .await
            .map_err(|e| EnvError::system(e).wrap("error setting environment repo data"))?;

        match self.dl.get_environment(&ne.env.name).await {
            Ok(Some(env)) => ne.env = env,
            Ok(None) => {
                return Err(EnvError::system_msg("environment record disappeared"));
            }
            Err(e) => {
                return Err(EnvError::system(e).wrap("error getting updated environment record"));
            }
        }
        Ok(())
    }

    async fn get_repo_config(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<RepoConfig> {
        info!("fetching and processing environment config");
        let repo_tag = format!("triggering_repo:{}", rd.repo);
        let start = Instant::now();
        let result = self.config_getter.get(ctx, rd).await;
        let success_tag = format!("success:{}", result.is_ok());
        self.metrics.timing(
            names::PROCESS_CONFIG,
            start.elapsed(),
            &[&repo_tag, &success_tag],
        );
        let rc = result.map_err(|e| EnvError::user(e).wrap("error getting metadata"))?;
        self.metrics.gauge(
            names::DEPENDENCIES,
            rc.dependencies.count() as f64,
            &[&repo_tag],
        );
        Ok(rc)
    }

    // -----------------------------------------------------------------
    // Chart staging
    // -----------------------------------------------------------------

    /// Fetch all charts for `rc` into a fresh scratch directory. The
    /// returned stage removes the directory when dropped.
    async fn fetch_charts(
        &self,
        ctx: &OpContext,
        name: &str,
        rc: &RepoConfig,
    ) -> Result<StagedCharts> {
        let dir = scratch_dir(self.scratch_root.as_deref(), name)
            .map_err(|e| EnvError::system(e).wrap("error generating scratch dir"))?;
        let repo_tag = format!("triggering_repo:{}", rc.application.repo);
        let start = Instant::now();
        let result = self.config_getter.fetch_charts(ctx, rc, dir.path()).await;
        let success_tag = format!("success:{}", result.is_ok());
        self.metrics.timing(
            names::FETCH_HELM_CHARTS,
            start.elapsed(),
            &[&repo_tag, &success_tag],
        );
        match result {
            Ok(locations) => Ok(StagedCharts::new(dir, locations)),
            Err(e) => Err(EnvError::user(e).wrap("error fetching charts")),
        }
    }

    // -----------------------------------------------------------------
    // Failure reporting
    // -----------------------------------------------------------------

    /// Classify a chart-installer error, and for structured failures with
    /// failed resources render an HTML report, upload it and notify with
    /// the presigned link. The notification uses a fresh context so it
    /// survives caller cancellation.
    async fn handle_chart_error(
        &self,
        _ctx: &OpContext,
        ne: &NewEnv,
        err: InstallError,
        msg: &str,
    ) -> EnvError {
        let ce = match err {
            InstallError::Chart(ce) => ce,
            other => return EnvError::user(other).wrap(msg),
        };
        if !ce.has_failed_resources() {
            // no resource detail: surface the inner helm error directly
            return EnvError::user_msg(ce.helm_error);
        }

        let repo_tag = format!("triggering_repo:{}", ne.env.repo);
        self.metrics.increment(names::FAILURE_REPORTS, &[&repo_tag]);

        if self.blob_config.is_configured() {
            let report = FailureReport {
                env_name: &ne.env.name,
                pull_request_url: format!(
                    "https://github.com/{}/pull/{}",
                    ne.env.repo, ne.env.pull_request
                ),
                started_time: ne.env.created,
                failed_time: Utc::now(),
                error: &ce,
            };
            let html = report.render_html();
            info!("pushing environment failure report to blob store");
            let start = Instant::now();
            let push_result = self
                .blob_store
                .push(
                    "text/html",
                    html.into_bytes(),
                    PushOptions {
                        region: self.blob_config.region.clone(),
                        bucket: self.blob_config.bucket.clone(),
                        key: report_key(&self.blob_config.key_prefix, &ne.env.name, Utc::now()),
                        concurrency: 10,
                        max_retries: 3,
                        presign_ttl_minutes: 60 * 24,
                    },
                )
                .await;
            self.metrics.timing(
                names::S3_FAILURE_REPORT_PUSH,
                start.elapsed(),
                &[&repo_tag],
            );
            match push_result {
                Ok(link) => {
                    self.push_notification(
                        &OpContext::background(),
                        ne,
                        NotificationEvent::Failure,
                        &format!("Environment Failure Log: {link}"),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(error = %e, "error writing failure report to blob store");
                    return EnvError::system(ce).wrap(msg);
                }
            }
        }
        EnvError::user(ce).wrap(msg)
    }

    // -----------------------------------------------------------------
    // Notifications and commit statuses
    // -----------------------------------------------------------------

    /// Compose and fan out one notification. Failures are logged and
    /// audited on the record, never surfaced.
    async fn push_notification(
        &self,
        ctx: &OpContext,
        ne: &NewEnv,
        event: NotificationEvent,
        error_message: &str,
    ) {
        let bg = OpContext::background();
        // a cancelled caller must not block the commit-message lookup
        let msg_ctx = valid_context(ctx, &bg);
        let commit_message = match self
            .repo_client
            .get_commit_message(&msg_ctx, &ne.env.repo, &ne.env.source_sha)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "error getting commit message");
                format!("<error getting commit message: {e}>")
            }
        };

        let k8s_namespace = match self.dl.k8s_env(&ne.env.name).await {
            Err(e) => format!("<error getting namespace: {e}>"),
            Ok(None) => "<k8s environment not found>".to_string(),
            Ok(Some(k8s_env)) => k8s_env.namespace,
        };

        let mut notifications = ne
            .rc
            .as_ref()
            .map(|rc| rc.notifications.clone())
            .unwrap_or_default();
        notifications.merge_defaults(&self.default_notifications);
        let template = notifications
            .templates
            .get(event.key())
            .cloned()
            .unwrap_or_default();

        let notification = Notification {
            event,
            data: NotificationData {
                env_name: ne.env.name.clone(),
                repo: ne.env.repo.clone(),
                source_branch: ne.env.source_branch.clone(),
                source_sha: ne.env.source_sha.clone(),
                base_branch: ne.env.base_branch.clone(),
                base_sha: ne.env.base_sha.clone(),
                user: ne.env.user.clone(),
                pull_request: ne.env.pull_request,
                k8s_namespace,
                commit_message,
                error_message: error_message.to_string(),
            },
            template,
        };

        let router = self.router_factory.router(&notifications, &ne.env.user);
        if let Err(e) = router.fan_out(notification).await {
            let message = format!("error sending {} notification: {e}", event.key());
            warn!("{message}");
            if let Err(e2) = self.dl.add_event(&ne.env.name, &message).await {
                warn!(error = %e2, "error appending notification failure event");
            }
        }
    }

    async fn publish_pending_status(&self, ctx: &OpContext, rd: &RepoRevisionData) {
        if let Err(e) = self
            .repo_client
            .set_status(ctx, &rd.repo, &rd.source_sha, &CommitStatus::pending())
            .await
        {
            warn!(error = %e, "error setting pending commit status");
        }
    }

    async fn publish_success_status(&self, ctx: &OpContext, rd: &RepoRevisionData) {
        if let Err(e) = self
            .repo_client
            .set_status(ctx, &rd.repo, &rd.source_sha, &CommitStatus::success())
            .await
        {
            warn!(error = %e, "error setting success commit status");
        }
    }

    /// Failure statuses must land even when the caller has cancelled.
    async fn publish_failure_status(&self, ctx: &OpContext, rd: &RepoRevisionData) {
        let bg = OpContext::background();
        let status_ctx = valid_context(ctx, &bg);
        if let Err(e) = self
            .repo_client
            .set_status(&status_ctx, &rd.repo, &rd.source_sha, &CommitStatus::failure())
            .await
        {
            warn!(error = %e, "error setting failure commit status");
        }
    }
}
