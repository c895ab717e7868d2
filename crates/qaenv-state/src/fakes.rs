//! In-memory fake for the persistence trait (testing only)
//!
//! `MemoryDataLayer` satisfies the `DataLayer` contract without any
//! external dependencies, and adds direct accessors for seeding and
//! inspecting cluster bindings from tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::models::*;
use crate::storage_traits::{DataLayer, StorageResult};

#[derive(Debug, Default)]
struct Inner {
    environments: HashMap<String, QAEnvironment>,
    k8s_envs: HashMap<String, K8sEnvironment>,
    helm_releases: HashMap<String, Vec<HelmRelease>>,
}

/// In-memory environment store backed by `HashMap`s keyed on record name.
#[derive(Debug, Default)]
pub struct MemoryDataLayer {
    inner: Mutex<Inner>,
}

impl MemoryDataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cluster binding, as the chart installer would after a
    /// successful install.
    pub fn insert_k8s_env(&self, k8s_env: K8sEnvironment) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .k8s_envs
            .insert(k8s_env.env_name.clone(), k8s_env);
    }

    /// Remove the cluster binding for an environment.
    pub fn remove_k8s_env(&self, env_name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.k8s_envs.remove(env_name);
    }

    /// Seed installed helm releases for an environment.
    pub fn insert_helm_release(&self, release: HelmRelease) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .helm_releases
            .entry(release.env_name.clone())
            .or_default()
            .push(release);
    }

    /// Remove all helm releases recorded for an environment.
    pub fn clear_helm_releases(&self, env_name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.helm_releases.remove(env_name);
    }

    /// Audit messages recorded for an environment, in append order.
    pub fn events_for(&self, name: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .environments
            .get(name)
            .map(|e| e.events.iter().map(|ev| ev.message.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataLayer for MemoryDataLayer {
    async fn create_environment(&self, env: &QAEnvironment) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.environments.contains_key(&env.name) {
            return Err(StorageError::Query(format!(
                "duplicate environment name: {}",
                env.name
            )));
        }
        inner.environments.insert(env.name.clone(), env.clone());
        Ok(())
    }

    async fn get_environment(&self, name: &str) -> StorageResult<Option<QAEnvironment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.environments.get(name).cloned())
    }

    async fn environments_for_pr(
        &self,
        repo: &str,
        pull_request: u64,
    ) -> StorageResult<Vec<QAEnvironment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .environments
            .values()
            .filter(|e| e.repo == repo && e.pull_request == pull_request)
            .cloned()
            .collect())
    }

    async fn extant_environments(
        &self,
        repo: &str,
        pull_request: u64,
    ) -> StorageResult<Vec<QAEnvironment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .environments
            .values()
            .filter(|e| e.repo == repo && e.pull_request == pull_request && e.is_extant())
            .cloned()
            .collect())
    }

    async fn set_status(&self, name: &str, status: EnvironmentStatus) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let env = inner
            .environments
            .get_mut(name)
            .ok_or_else(|| StorageError::EnvNotFound {
                name: name.to_string(),
            })?;
        env.status = status;
        Ok(())
    }

    async fn set_repo_data(&self, name: &str, rd: &RepoRevisionData) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let env = inner
            .environments
            .get_mut(name)
            .ok_or_else(|| StorageError::EnvNotFound {
                name: name.to_string(),
            })?;
        env.repo = rd.repo.clone();
        env.pull_request = rd.pull_request;
        env.source_branch = rd.source_branch.clone();
        env.source_sha = rd.source_sha.clone();
        env.base_branch = rd.base_branch.clone();
        env.base_sha = rd.base_sha.clone();
        env.source_ref = rd.source_ref.clone();
        env.user = rd.user.clone();
        Ok(())
    }

    async fn set_created(&self, name: &str, created: DateTime<Utc>) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let env = inner
            .environments
            .get_mut(name)
            .ok_or_else(|| StorageError::EnvNotFound {
                name: name.to_string(),
            })?;
        env.created = created;
        Ok(())
    }

    async fn set_ref_map(
        &self,
        name: &str,
        ref_map: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let env = inner
            .environments
            .get_mut(name)
            .ok_or_else(|| StorageError::EnvNotFound {
                name: name.to_string(),
            })?;
        env.ref_map = ref_map.clone();
        Ok(())
    }

    async fn set_commit_sha_map(
        &self,
        name: &str,
        commit_sha_map: &BTreeMap<String, String>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let env = inner
            .environments
            .get_mut(name)
            .ok_or_else(|| StorageError::EnvNotFound {
                name: name.to_string(),
            })?;
        env.commit_sha_map = commit_sha_map.clone();
        Ok(())
    }

    async fn k8s_env(&self, name: &str) -> StorageResult<Option<K8sEnvironment>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.k8s_envs.get(name).cloned())
    }

    async fn helm_releases(&self, name: &str) -> StorageResult<Vec<HelmRelease>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.helm_releases.get(name).cloned().unwrap_or_default())
    }

    async fn add_event(&self, name: &str, message: &str) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(env) = inner.environments.get_mut(name) {
            env.events.push(EnvironmentEvent {
                timestamp: Utc::now(),
                message: message.to_string(),
            });
        }
        Ok(())
    }
}
