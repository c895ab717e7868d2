//! End-to-end lifecycle scenarios: create, failure reporting and delete.

mod common;

use common::*;
use qaenv_core::context::OpContext;
use qaenv_core::fakes::InstallerCall;
use qaenv_core::installer::InstallError;
use qaenv_core::metric_names as names;
use qaenv_core::notifier::NotificationEvent;
use qaenv_state::{DataLayer, EnvironmentStatus, QAEnvironment};
use uuid::Uuid;

#[tokio::test]
async fn cold_create_succeeds() {
    let h = harness();
    let ctx = OpContext::background();

    let name = h.manager.create(&ctx, &revision()).await.unwrap();
    assert_eq!(name, "calm-heron-7");

    let env = h.dl.get_environment(&name).await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Success);
    assert_eq!(env.ref_map["acme/db"], "refs/heads/main");
    assert_eq!(env.commit_sha_map["acme/cache"], "sha-cache");

    assert_eq!(
        h.router.sent_events(),
        vec![NotificationEvent::CreateEnvironment, NotificationEvent::Success]
    );
    assert_eq!(h.repo_client.status_states(), vec!["pending", "success"]);

    assert_eq!(
        h.metrics.count_with_tag(names::CREATE, "success:true"),
        1
    );
    assert_eq!(
        h.metrics.count_with_tag(names::LOCK_WAIT, "success:true"),
        1
    );
    assert_eq!(h.metrics.count(names::CREATE_ERRORS), 0);
    assert_eq!(
        h.installer.calls(),
        vec![InstallerCall::Install {
            env_name: "calm-heron-7".to_string()
        }]
    );
}

#[tokio::test]
async fn create_notification_carries_namespace_and_commit_message() {
    let h = harness();
    let ctx = OpContext::background();
    h.manager.create(&ctx, &revision()).await.unwrap();

    let sent = h.router.sent();
    // CreateEnvironment fires before the install, so no namespace yet
    assert_eq!(sent[0].data.k8s_namespace, "<k8s environment not found>");
    assert_eq!(sent[1].data.k8s_namespace, "nitro-calm-heron-7");
    assert_eq!(sent[1].data.commit_message, "add feature");
    assert_eq!(sent[1].data.user, "jdoe");
    assert_eq!(sent[1].data.pull_request, 7);
}

#[tokio::test]
async fn consecutive_creates_reuse_the_record() {
    let h = harness();
    let event_id = Uuid::new_v4();
    let ctx = OpContext::background().with_event_id(event_id);

    let first = h.manager.create(&ctx, &revision()).await.unwrap();
    let created_first = h
        .dl
        .get_environment(&first)
        .await
        .unwrap()
        .unwrap()
        .created;

    let second = h.manager.create(&ctx, &revision()).await.unwrap();
    assert_eq!(first, second, "record name must be reused");

    let env = h.dl.get_environment(&second).await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Success);
    assert!(env.created >= created_first, "created must be refreshed");

    let events = h.dl.events_for(&second);
    assert!(events
        .iter()
        .any(|e| e == &format!("reusing environment record for webhook event {event_id}")));
    assert!(events
        .iter()
        .any(|e| e == &format!("webhook event id: {event_id}")));

    // only one record ever exists for the pair
    assert_eq!(
        h.dl.environments_for_pr("acme/widgets", 7).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn config_fetch_failure_is_a_user_error() {
    let h = harness();
    *h.config_getter.config.lock().unwrap() = None;
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_user());
    assert!(err.to_string().contains("error getting metadata"));

    let env = h.dl.get_environment("calm-heron-7").await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Failure);

    let sent = h.router.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, NotificationEvent::Failure);
    assert!(sent[0].data.error_message.starts_with("error creating:"));

    assert_eq!(h.repo_client.status_states(), vec!["failure"]);
    assert_eq!(h.metrics.count(names::CREATE_ERRORS), 1);
    assert!(h.installer.calls().is_empty(), "no installer call on config failure");
}

#[tokio::test]
async fn chart_error_with_failed_resources_produces_report() {
    let h = harness();
    *h.installer.install_error.lock().unwrap() = Some(InstallError::Chart(chart_error()));
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_user());

    let pushes = h.blob.pushes();
    assert_eq!(pushes.len(), 1);
    let push = &pushes[0];
    assert_eq!(push.content_type, "text/html");
    assert!(push.opts.key.starts_with("qa/envfailures/"));
    assert!(push.opts.key.ends_with("/calm-heron-7.html"));
    assert_eq!(push.opts.bucket, "qa-env-artifacts");
    assert_eq!(push.opts.concurrency, 10);
    assert_eq!(push.opts.max_retries, 3);
    assert_eq!(push.opts.presign_ttl_minutes, 60 * 24);
    let body = String::from_utf8(push.body.clone()).unwrap();
    assert!(body.contains("calm-heron-7"));
    assert!(body.contains("widgets-web"));
    assert!(body.contains("https://github.com/acme/widgets/pull/7"));

    // report link goes out as an extra failure notification before the
    // terminal one
    let sent = h.router.sent();
    assert_eq!(
        sent.iter().map(|n| n.event).collect::<Vec<_>>(),
        vec![
            NotificationEvent::CreateEnvironment,
            NotificationEvent::Failure,
            NotificationEvent::Failure
        ]
    );
    assert!(sent[1]
        .data
        .error_message
        .starts_with("Environment Failure Log: https://blob.example/qa/envfailures/"));

    assert_eq!(h.metrics.count(names::FAILURE_REPORTS), 1);
    assert_eq!(h.metrics.count(names::S3_FAILURE_REPORT_PUSH), 1);
    let env = h.dl.get_environment("calm-heron-7").await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Failure);
}

#[tokio::test]
async fn chart_error_without_failed_resources_skips_report() {
    let h = harness();
    *h.installer.install_error.lock().unwrap() = Some(InstallError::Chart(bare_chart_error()));
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_user());
    assert!(err.to_string().contains("chart dependency resolution failed"));
    assert!(h.blob.pushes().is_empty());
    assert_eq!(h.metrics.count(names::FAILURE_REPORTS), 0);
}

#[tokio::test]
async fn generic_install_error_is_user_without_report() {
    let h = harness();
    *h.installer.install_error.lock().unwrap() =
        Some(InstallError::Failed("tiller unreachable".to_string()));
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_user());
    assert!(err.to_string().contains("error installing charts"));
    assert!(h.blob.pushes().is_empty());
    assert_eq!(h.metrics.count(names::FAILURE_REPORTS), 0);
}

#[tokio::test]
async fn unconfigured_blob_store_skips_upload() {
    let h = harness_with_blob(Default::default());
    *h.installer.install_error.lock().unwrap() = Some(InstallError::Chart(chart_error()));
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_user());
    assert!(h.blob.pushes().is_empty());
    // the report counter still ticks; only the upload is skipped
    assert_eq!(h.metrics.count(names::FAILURE_REPORTS), 1);
}

#[tokio::test]
async fn failed_report_upload_reclassifies_as_system() {
    let h = harness();
    *h.installer.install_error.lock().unwrap() = Some(InstallError::Chart(chart_error()));
    h.blob.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    let ctx = OpContext::background();

    let err = h.manager.create(&ctx, &revision()).await.unwrap_err();
    assert!(err.is_system());
    assert!(!err.is_user());

    // no report link, just the terminal failure
    let events = h.router.sent_events();
    assert_eq!(
        events,
        vec![NotificationEvent::CreateEnvironment, NotificationEvent::Failure]
    );
}

#[tokio::test]
async fn delete_tears_down_environment() {
    let h = harness();
    let ctx = OpContext::background();
    let name = h.manager.create(&ctx, &revision()).await.unwrap();

    h.manager.delete(&ctx, &revision()).await.unwrap();

    let env = h.dl.get_environment(&name).await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Destroyed);
    assert!(h.dl.k8s_env(&name).await.unwrap().is_none());

    let calls = h.installer.calls();
    assert_eq!(
        calls[calls.len() - 2..],
        [
            InstallerCall::DeleteReleases {
                env_name: name.clone()
            },
            InstallerCall::DeleteNamespace {
                env_name: name.clone()
            }
        ]
    );

    assert!(h
        .router
        .sent_events()
        .contains(&NotificationEvent::DestroyEnvironment));
    assert_eq!(h.metrics.count_with_tag(names::DELETE, "success:true"), 1);
    assert_eq!(h.metrics.count(names::DELETE_NAMESPACE_DURATION), 1);
}

#[tokio::test]
async fn delete_with_no_extant_records_sweeps_destroyed() {
    let h = harness();
    for name in ["old-env-1", "old-env-2"] {
        let mut env = QAEnvironment::from_revision(name, &revision());
        env.status = EnvironmentStatus::Destroyed;
        h.dl.create_environment(&env).await.unwrap();
    }
    let ctx = OpContext::background();

    h.manager.delete(&ctx, &revision()).await.unwrap();

    assert!(h.installer.calls().is_empty());
    assert!(h.router.sent().is_empty());
    for name in ["old-env-1", "old-env-2"] {
        let env = h.dl.get_environment(name).await.unwrap().unwrap();
        assert_eq!(env.status, EnvironmentStatus::Destroyed);
    }
}

#[tokio::test]
async fn delete_with_spawned_leftover_requires_cluster_binding() {
    // a record left Spawned counts as extant, so delete goes through the
    // full teardown; without a cluster binding it fails hard
    let h = harness();
    let env = QAEnvironment::from_revision("halfway-env", &revision());
    h.dl.create_environment(&env).await.unwrap();
    let ctx = OpContext::background();

    let err = h.manager.delete(&ctx, &revision()).await.unwrap_err();
    assert!(err.to_string().contains("missing k8s environment"));
}

#[tokio::test]
async fn delete_missing_cluster_binding_fails_and_notifies() {
    let h = harness();
    let ctx = OpContext::background();
    let name = h.manager.create(&ctx, &revision()).await.unwrap();
    h.dl.remove_k8s_env(&name);

    let err = h.manager.delete(&ctx, &revision()).await.unwrap_err();
    assert!(err.to_string().contains("missing k8s environment"));

    let sent = h.router.sent();
    let last = sent.last().unwrap();
    assert_eq!(last.event, NotificationEvent::Failure);
    assert!(last.data.error_message.starts_with("error destroying:"));

    // the record is left as-is; delete's tail does not flip status
    let env = h.dl.get_environment(&name).await.unwrap().unwrap();
    assert_eq!(env.status, EnvironmentStatus::Success);
}

#[tokio::test]
async fn scratch_directory_released_on_success_and_failure() {
    let h = harness();
    let ctx = OpContext::background();
    h.manager.create(&ctx, &revision()).await.unwrap();

    *h.installer.install_error.lock().unwrap() = Some(InstallError::Chart(chart_error()));
    let _ = h.manager.create(&ctx, &revision()).await;

    let dirs = h.config_getter.fetched_dirs();
    assert_eq!(dirs.len(), 2);
    for dir in dirs {
        assert!(!dir.exists(), "scratch dir {} must be removed", dir.display());
    }
}

#[tokio::test]
async fn notification_send_failure_is_audited_on_the_record() {
    let h = harness();
    h.router.set_fail(true);
    let ctx = OpContext::background();

    // the operation itself still succeeds
    let name = h.manager.create(&ctx, &revision()).await.unwrap();

    let events = h.dl.events_for(&name);
    assert!(events
        .iter()
        .any(|e| e.starts_with("error sending create_environment notification:")));
    assert!(events
        .iter()
        .any(|e| e.starts_with("error sending success notification:")));
}
