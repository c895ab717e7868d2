//! QA Environment Manager Core
//!
//! Lifecycle orchestration for on-demand, pull-request-scoped application
//! environments: per-PR preemptive locking, record reconciliation, config
//! processing, chart staging and installation, and the notification /
//! commit-status fan-out around it all.

pub mod blobstore;
pub mod config;
pub mod context;
pub mod domain;
pub mod fakes;
pub mod github;
pub mod installer;
pub mod locker;
pub mod manager;
pub mod metrics;
pub mod namegen;
pub mod notifier;
pub mod obs;
pub mod report;
pub mod stager;
pub mod telemetry;

pub use blobstore::{BlobConfig, BlobError, BlobStore, PushOptions};
pub use config::{ChartLocation, ChartLocations, ConfigError, ConfigGetter};
pub use context::{valid_context, CancelHandle, OpContext};
pub use domain::{EnvError, ErrorClass, Result};
pub use github::{CommitState, CommitStatus, RepoClient, RepoClientError, STATUS_CONTEXT};
pub use installer::{ChartError, ChartInstaller, EnvInfo, FailedResource, InstallError};
pub use locker::{LockError, LockGuard, PreemptiveLockProvider, PreemptiveLocker};
pub use manager::{Manager, NewEnv, EXTANT_ENVS_SENTINEL};
pub use metrics::{names as metric_names, Collector, NullCollector};
pub use namegen::{NameError, NameGenerator, UuidNameGenerator};
pub use notifier::{
    Notification, NotificationData, NotificationEvent, NotifyError, Router, RouterFactory,
};
pub use report::{report_key, FailureReport};
pub use stager::{scratch_dir, StagedCharts};
pub use telemetry::{init_tracing, LOG_FORMAT_VAR};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
