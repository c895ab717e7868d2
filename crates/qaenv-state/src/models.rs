//! Core data model for ephemeral QA environments.
//!
//! `QAEnvironment` is the authoritative lifecycle record for a
//! `(repository, pull request)` pair. `RepoConfig` is the transient,
//! resolved configuration fetched from the triggering repository for one
//! revision. `K8sEnvironment` and `HelmRelease` bind a logical environment
//! to concrete cluster state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Revision input
// ---------------------------------------------------------------------------

/// Identifies the change that triggered an operation.
///
/// Immutable within a single lifecycle call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRevisionData {
    /// Triggering repository, `owner/name`.
    pub repo: String,
    /// Pull request number.
    pub pull_request: u64,
    pub source_branch: String,
    pub source_sha: String,
    pub base_branch: String,
    pub base_sha: String,
    /// Fully qualified git ref for the source branch.
    pub source_ref: String,
    /// User that opened or pushed to the pull request.
    pub user: String,
}

// ---------------------------------------------------------------------------
// Environment record
// ---------------------------------------------------------------------------

/// Lifecycle status of an environment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    /// Record allocated, install in progress.
    Spawned,
    /// Last install or upgrade completed.
    Success,
    /// Last operation failed.
    Failure,
    /// Environment torn down.
    Destroyed,
}

impl std::fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Spawned => "spawned",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

/// Human-readable audit entry appended to an environment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// The authoritative, persisted lifecycle record for a `(repo, PR)` pair.
///
/// `name` is generated once and reused across successive operations on the
/// same pull request; `created` is refreshed each time the record is reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QAEnvironment {
    /// Unique human-readable name.
    pub name: String,
    pub created: DateTime<Utc>,
    pub events: Vec<EnvironmentEvent>,

    // Mirror of the triggering RepoRevisionData.
    pub repo: String,
    pub pull_request: u64,
    pub source_branch: String,
    pub source_sha: String,
    pub base_branch: String,
    pub base_sha: String,
    pub source_ref: String,
    pub user: String,

    pub status: EnvironmentStatus,
    /// Dependency repository → resolved git ref.
    pub ref_map: BTreeMap<String, String>,
    /// Dependency repository → resolved commit SHA.
    pub commit_sha_map: BTreeMap<String, String>,
}

impl QAEnvironment {
    /// Build a fresh record in `Spawned` status from a revision.
    pub fn from_revision(name: &str, rd: &RepoRevisionData) -> Self {
        Self {
            name: name.to_string(),
            created: Utc::now(),
            events: Vec::new(),
            repo: rd.repo.clone(),
            pull_request: rd.pull_request,
            source_branch: rd.source_branch.clone(),
            source_sha: rd.source_sha.clone(),
            base_branch: rd.base_branch.clone(),
            base_sha: rd.base_sha.clone(),
            source_ref: rd.source_ref.clone(),
            user: rd.user.clone(),
            status: EnvironmentStatus::Spawned,
            ref_map: BTreeMap::new(),
            commit_sha_map: BTreeMap::new(),
        }
    }

    /// An extant record is any record not yet destroyed.
    pub fn is_extant(&self) -> bool {
        self.status != EnvironmentStatus::Destroyed
    }
}

// ---------------------------------------------------------------------------
// Cluster bindings
// ---------------------------------------------------------------------------

/// Binding from a logical environment to concrete cluster state.
///
/// Written by the chart installer after a successful install; read by the
/// orchestrator to decide between upgrade and rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sEnvironment {
    pub env_name: String,
    pub namespace: String,
    /// Snapshot of the `RepoConfig` signature at last successful install.
    pub config_signature: ConfigSignature,
}

/// Correlates a dependency in the environment config with an installed
/// helm release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmRelease {
    pub env_name: String,
    /// Dependency name from the repo config.
    pub name: String,
    /// Installed release name.
    pub release: String,
}

// ---------------------------------------------------------------------------
// Config signature
// ---------------------------------------------------------------------------

/// 32-byte content hash of the resolved repo config.
///
/// Stable across changes that are chart-upgrade-compatible: it covers chart
/// identities and the dependency topology, not refs, branches or SHAs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigSignature([u8; 32]);

impl ConfigSignature {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ConfigSignature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ConfigSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// Repo config
// ---------------------------------------------------------------------------

/// Errors deriving maps from a resolved repo config.
#[derive(Debug, thiserror::Error)]
pub enum RepoConfigError {
    #[error("dependency {name} has no repository")]
    MissingRepo { name: String },

    #[error("no ref resolved for repository {repo}")]
    MissingRef { repo: String },

    #[error("no commit SHA resolved for repository {repo}")]
    MissingSha { repo: String },
}

/// Chart metadata for the triggering repository's application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfigAppMetadata {
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub branch: String,
    pub commit_sha: String,
    pub chart_path: String,
    pub chart_vars_path: String,
    pub image: String,
}

/// A single resolved dependency of the triggering application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfigDependency {
    pub name: String,
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_sha: String,
    pub chart_path: String,
    pub chart_vars_path: String,
    /// Names of dependencies that must be installed before this one.
    pub requires: Vec<String>,
}

/// Direct and environment-wide dependencies, kept separate in config but
/// flattened for installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    pub direct: Vec<RepoConfigDependency>,
    pub environment: Vec<RepoConfigDependency>,
}

impl DependencyDeclaration {
    /// All dependencies, direct first.
    pub fn all(&self) -> Vec<&RepoConfigDependency> {
        self.direct.iter().chain(self.environment.iter()).collect()
    }

    pub fn count(&self) -> usize {
        self.direct.len() + self.environment.len()
    }
}

/// The validated, merged configuration fetched from the triggering
/// repository for a given revision. Transient: never persisted as a whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    pub application: RepoConfigAppMetadata,
    pub dependencies: DependencyDeclaration,
    pub notifications: Notifications,
}

impl RepoConfig {
    /// Map of repository → resolved git ref, covering the application and
    /// every dependency.
    pub fn ref_map(&self) -> Result<BTreeMap<String, String>, RepoConfigError> {
        let mut out = BTreeMap::new();
        if self.application.git_ref.is_empty() {
            return Err(RepoConfigError::MissingRef {
                repo: self.application.repo.clone(),
            });
        }
        out.insert(self.application.repo.clone(), self.application.git_ref.clone());
        for dep in self.dependencies.all() {
            if dep.repo.is_empty() {
                return Err(RepoConfigError::MissingRepo {
                    name: dep.name.clone(),
                });
            }
            if dep.git_ref.is_empty() {
                return Err(RepoConfigError::MissingRef {
                    repo: dep.repo.clone(),
                });
            }
            out.insert(dep.repo.clone(), dep.git_ref.clone());
        }
        Ok(out)
    }

    /// Map of repository → resolved commit SHA, covering the application
    /// and every dependency.
    pub fn commit_sha_map(&self) -> Result<BTreeMap<String, String>, RepoConfigError> {
        let mut out = BTreeMap::new();
        if self.application.commit_sha.is_empty() {
            return Err(RepoConfigError::MissingSha {
                repo: self.application.repo.clone(),
            });
        }
        out.insert(
            self.application.repo.clone(),
            self.application.commit_sha.clone(),
        );
        for dep in self.dependencies.all() {
            if dep.repo.is_empty() {
                return Err(RepoConfigError::MissingRepo {
                    name: dep.name.clone(),
                });
            }
            if dep.commit_sha.is_empty() {
                return Err(RepoConfigError::MissingSha {
                    repo: dep.repo.clone(),
                });
            }
            out.insert(dep.repo.clone(), dep.commit_sha.clone());
        }
        Ok(out)
    }

    /// Deterministic content hash of the chart topology.
    ///
    /// Covers chart identities (application and dependency chart paths,
    /// names and install ordering constraints) and deliberately excludes
    /// refs, branches and SHAs: a push to an existing topology keeps the
    /// signature stable and remains upgrade-compatible.
    pub fn config_signature(&self) -> ConfigSignature {
        let mut hasher = Sha256::new();
        hasher.update(self.version.to_be_bytes());
        hasher.update(self.application.repo.as_bytes());
        hasher.update([0]);
        hasher.update(self.application.chart_path.as_bytes());
        hasher.update([0]);
        hasher.update(self.application.chart_vars_path.as_bytes());
        hasher.update([0]);

        let mut deps: Vec<&RepoConfigDependency> = self.dependencies.all();
        deps.sort_by(|a, b| a.name.cmp(&b.name));
        for dep in deps {
            hasher.update(dep.name.as_bytes());
            hasher.update([0]);
            hasher.update(dep.repo.as_bytes());
            hasher.update([0]);
            hasher.update(dep.chart_path.as_bytes());
            hasher.update([0]);
            hasher.update(dep.chart_vars_path.as_bytes());
            hasher.update([0]);
            let mut requires = dep.requires.clone();
            requires.sort();
            for r in requires {
                hasher.update(r.as_bytes());
                hasher.update([1]);
            }
        }
        ConfigSignature(hasher.finalize().into())
    }
}

// ---------------------------------------------------------------------------
// Notifications config
// ---------------------------------------------------------------------------

/// Slack routing configuration for environment notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackNotifications {
    pub disable_github_user_dm: bool,
    /// Channels to post to. `None` means "use the process defaults".
    pub channels: Option<Vec<String>>,
    pub users: Vec<String>,
}

/// GitHub-side notification configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubNotifications {
    pub pr_comments: bool,
}

/// One rendered section of a notification message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplateSection {
    pub title: String,
    pub text: String,
    pub style: String,
}

/// Per-event message template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationTemplate {
    pub title: String,
    pub sections: Vec<NotificationTemplateSection>,
}

/// Notification configuration from the triggering repo, merged over
/// process-wide defaults before fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    pub slack: SlackNotifications,
    pub github: GitHubNotifications,
    /// Event key → template.
    pub templates: BTreeMap<String, NotificationTemplate>,
}

impl Notifications {
    /// Merge process-wide defaults into this config. Repo values win where
    /// set; defaults fill missing fields.
    pub fn merge_defaults(&mut self, defaults: &Notifications) {
        if self.slack.channels.is_none() {
            self.slack.channels = defaults.slack.channels.clone();
        }
        if self.slack.users.is_empty() {
            self.slack.users = defaults.slack.users.clone();
        }
        self.slack.disable_github_user_dm |= defaults.slack.disable_github_user_dm;
        self.github.pr_comments |= defaults.github.pr_comments;
        for (key, tmpl) in &defaults.templates {
            self.templates
                .entry(key.clone())
                .or_insert_with(|| tmpl.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision() -> RepoRevisionData {
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

    fn config_with_deps(dep_names: &[&str]) -> RepoConfig {
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
                direct: dep_names
                    .iter()
                    .map(|n| RepoConfigDependency {
                        name: n.to_string(),
                        repo: format!("acme/{n}"),
                        git_ref: "refs/heads/main".to_string(),
                        commit_sha: format!("sha-{n}"),
                        chart_path: format!(".chart/{n}"),
                        chart_vars_path: String::new(),
                        requires: Vec::new(),
                    })
                    .collect(),
                environment: Vec::new(),
            },
            notifications: Notifications::default(),
        }
    }

    #[test]
    fn fresh_record_is_spawned_and_extant() {
        let env = QAEnvironment::from_revision("blue-otter", &revision());
        assert_eq!(env.status, EnvironmentStatus::Spawned);
        assert!(env.is_extant());
        assert_eq!(env.repo, "acme/widgets");
        assert_eq!(env.pull_request, 7);
    }

    #[test]
    fn destroyed_record_is_not_extant() {
        let mut env = QAEnvironment::from_revision("blue-otter", &revision());
        env.status = EnvironmentStatus::Destroyed;
        assert!(!env.is_extant());
    }

    #[test]
    fn ref_map_covers_application_and_dependencies() {
        let rc = config_with_deps(&["db", "cache"]);
        let rm = rc.ref_map().unwrap();
        assert_eq!(rm.len(), 3);
        assert_eq!(rm["acme/widgets"], "refs/heads/feature");
        assert_eq!(rm["acme/db"], "refs/heads/main");
    }

    #[test]
    fn commit_sha_map_requires_resolved_shas() {
        let mut rc = config_with_deps(&["db"]);
        rc.dependencies.direct[0].commit_sha.clear();
        let err = rc.commit_sha_map().unwrap_err();
        assert!(matches!(err, RepoConfigError::MissingSha { .. }));
    }

    #[test]
    fn signature_stable_across_sha_changes() {
        let rc1 = config_with_deps(&["db", "cache"]);
        let mut rc2 = rc1.clone();
        rc2.application.commit_sha = "ccc333".to_string();
        rc2.application.git_ref = "refs/heads/other".to_string();
        rc2.dependencies.direct[0].commit_sha = "different".to_string();
        assert_eq!(rc1.config_signature(), rc2.config_signature());
    }

    #[test]
    fn signature_changes_when_topology_changes() {
        let rc1 = config_with_deps(&["db"]);
        let rc2 = config_with_deps(&["db", "cache"]);
        assert_ne!(rc1.config_signature(), rc2.config_signature());

        let mut rc3 = rc1.clone();
        rc3.dependencies.direct[0].chart_path = ".chart/elsewhere".to_string();
        assert_ne!(rc1.config_signature(), rc3.config_signature());
    }

    #[test]
    fn signature_independent_of_dependency_order() {
        let rc1 = config_with_deps(&["db", "cache"]);
        let mut rc2 = config_with_deps(&["db", "cache"]);
        rc2.dependencies.direct.reverse();
        assert_eq!(rc1.config_signature(), rc2.config_signature());
    }

    #[test]
    fn merge_defaults_fills_missing_fields_only() {
        let mut defaults = Notifications::default();
        defaults.slack.channels = Some(vec!["#qa-envs".to_string()]);
        defaults.templates.insert(
            "failure".to_string(),
            NotificationTemplate {
                title: "default failure".to_string(),
                sections: Vec::new(),
            },
        );

        let mut repo_cfg = Notifications::default();
        repo_cfg.templates.insert(
            "failure".to_string(),
            NotificationTemplate {
                title: "repo failure".to_string(),
                sections: Vec::new(),
            },
        );
        repo_cfg.merge_defaults(&defaults);

        // channels came from defaults, the repo's template won
        assert_eq!(repo_cfg.slack.channels, Some(vec!["#qa-envs".to_string()]));
        assert_eq!(repo_cfg.templates["failure"].title, "repo failure");
    }

    #[test]
    fn merge_defaults_keeps_repo_channels() {
        let mut defaults = Notifications::default();
        defaults.slack.channels = Some(vec!["#default".to_string()]);
        let mut repo_cfg = Notifications::default();
        repo_cfg.slack.channels = Some(vec!["#mine".to_string()]);
        repo_cfg.merge_defaults(&defaults);
        assert_eq!(repo_cfg.slack.channels, Some(vec!["#mine".to_string()]));
    }

    #[test]
    fn signature_display_is_hex() {
        let sig = config_with_deps(&[]).config_signature();
        let s = sig.to_string();
        assert_eq!(s.len(), 64);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
