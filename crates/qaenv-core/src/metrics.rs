//! Metrics collector contract for environment operations.
//!
//! All metric names are prefixed `env.` and every emission carries a
//! `triggering_repo:<repo>` tag. The collector is a collaborator trait so
//! deployments can plug in statsd/dogstatsd; tests use the recording fake.

use std::time::Duration;

/// Metric sink consumed by the lifecycle orchestrator.
pub trait Collector: Send + Sync {
    fn timing(&self, name: &str, duration: Duration, tags: &[&str]);
    fn increment(&self, name: &str, tags: &[&str]);
    fn gauge(&self, name: &str, value: f64, tags: &[&str]);
}

/// Metric names emitted by the manager.
pub mod names {
    pub const LOCK_WAIT: &str = "env.lock_wait";
    pub const LOCK_PREEMPT: &str = "env.lock_preempt";
    pub const OPERATION: &str = "env.operation";
    pub const CREATE: &str = "env.create";
    pub const UPDATE: &str = "env.update";
    pub const DELETE: &str = "env.delete";
    pub const PROCESS_CONFIG: &str = "env.process_config";
    pub const FETCH_HELM_CHARTS: &str = "env.fetch_helm_charts";
    pub const DEPENDENCIES: &str = "env.dependencies";
    pub const CREATE_ERRORS: &str = "env.create_errors";
    pub const UPDATE_CREATE: &str = "env.update_create";
    pub const UPDATE_IN_PLACE: &str = "env.update_in_place";
    pub const UPDATE_TEAR_DOWN: &str = "env.update_tear_down";
    pub const DELETE_NAMESPACE_DURATION: &str = "env.delete_namespace_duration";
    pub const FAILURE_REPORTS: &str = "env.failure_reports";
    pub const S3_FAILURE_REPORT_PUSH: &str = "env.s3_failure_report_push";
}

/// Collector that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCollector;

impl Collector for NullCollector {
    fn timing(&self, _name: &str, _duration: Duration, _tags: &[&str]) {}
    fn increment(&self, _name: &str, _tags: &[&str]) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: &[&str]) {}
}
