//! Repository configuration getter contract.
//!
//! The getter fetches and resolves the environment config from the
//! triggering repository for a given revision, and later materializes the
//! charts it references into a scratch directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use qaenv_state::{RepoConfig, RepoRevisionData};

use crate::context::OpContext;

/// Filesystem location of one dependency's chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartLocation {
    pub chart_path: PathBuf,
    pub var_file_path: PathBuf,
}

/// Dependency name → fetched chart location.
pub type ChartLocations = BTreeMap<String, ChartLocation>;

/// Errors fetching or resolving repository configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("error fetching charts: {0}")]
    ChartFetch(String),
}

/// Fetches and resolves repository-hosted environment configuration.
#[async_trait]
pub trait ConfigGetter: Send + Sync {
    /// Fetch, parse and validate the config for `rd`, resolving refs for
    /// the application and every dependency.
    async fn get(&self, ctx: &OpContext, rd: &RepoRevisionData) -> Result<RepoConfig, ConfigError>;

    /// Fetch every chart referenced by `rc` into `dir`.
    async fn fetch_charts(
        &self,
        ctx: &OpContext,
        rc: &RepoConfig,
        dir: &Path,
    ) -> Result<ChartLocations, ConfigError>;
}
