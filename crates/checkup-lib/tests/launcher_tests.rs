//! End-to-end scenarios for the checkup launcher
//!
//! These tests drive config loading, the execution engine and the record
//! reporter together against the in-memory store.

use checkup_lib::models::keys;
use checkup_lib::store::{JobBehavior, StoreOperation};
use checkup_lib::{
    Checkup, CheckupSettings, ConfigError, ConfigLoader, Launcher, MemoryStore, ObjectKey,
    RecordReporter, Resource, ResourceKind, ResourceStore, WorkspaceNames,
};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const RECORD_NAMESPACE: &str = "kiagnose";
const RECORD_NAME: &str = "echo-checkup";

fn record_key() -> ObjectKey {
    ObjectKey::namespaced(RECORD_NAMESPACE, RECORD_NAME)
}

fn spec_data(extra: &[(&str, &str)]) -> BTreeMap<String, String> {
    let mut data = BTreeMap::from([
        (keys::IMAGE.to_string(), "img:v1".to_string()),
        (keys::TIMEOUT.to_string(), "1m".to_string()),
        (keys::SERVICE_ACCOUNT_NAME.to_string(), "sa".to_string()),
    ]);
    data.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    data
}

fn seeded(
    store: MemoryStore,
    data: BTreeMap<String, String>,
    cluster_roles: &[&str],
) -> Arc<MemoryStore> {
    let mut objects = vec![
        Resource::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(RECORD_NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }),
        Resource::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some(RECORD_NAME.to_string()),
                namespace: Some(RECORD_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }),
    ];
    objects.extend(cluster_roles.iter().map(|name| {
        Resource::ClusterRole(ClusterRole {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }));
    Arc::new(store.with_objects(objects))
}

fn settings() -> CheckupSettings {
    CheckupSettings {
        poll_interval: Duration::from_millis(2),
        teardown_timeout: Duration::from_millis(100),
        job_deadline_grace: Duration::ZERO,
    }
}

async fn launch(store: &Arc<MemoryStore>) -> Result<(), String> {
    let shared: Arc<dyn ResourceStore> = store.clone();
    let config = ConfigLoader::new(shared.clone())
        .load(&record_key())
        .await
        .map_err(|e| e.to_string())?;

    let checkup = Checkup::new(shared.clone(), config, WorkspaceNames::default(), settings());
    let reporter = RecordReporter::new(shared, record_key());
    let mut launcher = Launcher::new(checkup, reporter);
    launcher.run().await.map_err(|e| e.to_string())
}

async fn record_data(store: &MemoryStore) -> BTreeMap<String, String> {
    store
        .get(ResourceKind::ConfigMap, &record_key())
        .await
        .unwrap()
        .into_config_map()
        .unwrap()
        .data
        .unwrap_or_default()
}

/// Only the namespace holding the checkup record survives a run
async fn assert_workspace_gone(store: &MemoryStore) {
    assert_eq!(store.count(ResourceKind::Namespace).await, 1);
    assert_eq!(store.count(ResourceKind::ClusterRoleBinding).await, 0);
    assert_eq!(store.count(ResourceKind::Job).await, 0);
}

mod success_tests {
    use super::*;

    #[tokio::test]
    async fn test_end_to_end_success() {
        let store = seeded(MemoryStore::new(), spec_data(&[]), &[]);

        launch(&store).await.unwrap();

        let data = record_data(&store).await;
        assert_eq!(data[keys::SUCCEEDED], "true");
        assert_eq!(data[keys::FAILURE_REASON], "");
        assert!(!data[keys::START_TIMESTAMP].is_empty());
        assert!(!data[keys::COMPLETION_TIMESTAMP].is_empty());
        assert_eq!(data[keys::IMAGE], "img:v1");
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_checkup_output_is_copied_to_record() {
        let output = BTreeMap::from([
            (keys::SUCCEEDED.to_string(), "true".to_string()),
            (keys::FAILURE_REASON.to_string(), String::new()),
            ("status.result.avgLatencyNanoSec".to_string(), "1500".to_string()),
        ]);
        let store = seeded(
            MemoryStore::new().with_checkup_output(output),
            spec_data(&[
                ("spec.param.sampleDurationSeconds", "5"),
                (keys::CLUSTER_ROLES, "kubevirt-reader"),
            ]),
            &["kubevirt-reader"],
        );

        launch(&store).await.unwrap();

        let data = record_data(&store).await;
        assert_eq!(data["status.result.avgLatencyNanoSec"], "1500");
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_pod_logs_collected_before_teardown() {
        let store = seeded(MemoryStore::new().with_pod_logs("echo: hi"), spec_data(&[]), &[]);

        launch(&store).await.unwrap();

        let journal = store.journal().await;
        let logs = journal
            .iter()
            .position(|op| op.operation == StoreOperation::Logs)
            .unwrap();
        let namespace_delete = journal
            .iter()
            .position(|op| {
                op.operation == StoreOperation::Delete && op.kind == ResourceKind::Namespace
            })
            .unwrap();
        assert!(logs < namespace_delete);
    }

    #[tokio::test]
    async fn test_record_cannot_be_reused() {
        let store = seeded(MemoryStore::new(), spec_data(&[]), &[]);
        launch(&store).await.unwrap();
        let journal_len = store.journal().await.len();

        let err = launch(&store).await.unwrap_err();

        assert_eq!(err, ConfigError::AlreadyInUse.to_string());
        // Rejected before anything was created or written
        let later: Vec<_> = store.journal().await.into_iter().skip(journal_len).collect();
        assert!(later.iter().all(|op| op.operation == StoreOperation::Get));
    }
}

mod failure_tests {
    use super::*;

    #[tokio::test]
    async fn test_setup_failure_is_reported() {
        let store = seeded(
            MemoryStore::new(),
            spec_data(&[(keys::CLUSTER_ROLES, "a\nb")]),
            &["a", "b"],
        );
        store
            .inject_failure(
                StoreOperation::Create,
                ResourceKind::ClusterRoleBinding,
                Some("checkup-workspace-b"),
                "quota exceeded",
            )
            .await;

        let err = launch(&store).await.unwrap_err();

        assert!(err.starts_with("setup: "));
        assert!(err.contains("quota exceeded"));
        let data = record_data(&store).await;
        assert_eq!(data[keys::SUCCEEDED], "false");
        assert_eq!(data[keys::FAILURE_REASON], err);
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_job_failure_still_tears_down() {
        let store = seeded(
            MemoryStore::new().with_job_behavior(JobBehavior::Fail {
                reason: "BackoffLimitExceeded".to_string(),
                message: "Job has reached the specified backoff limit".to_string(),
            }),
            spec_data(&[]),
            &[],
        );

        let err = launch(&store).await.unwrap_err();

        assert!(err.starts_with("run: "));
        assert!(err.contains("BackoffLimitExceeded"));
        assert_eq!(record_data(&store).await[keys::SUCCEEDED], "false");
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_run_and_teardown_failures_are_both_reported() {
        let store = seeded(
            MemoryStore::new().with_job_behavior(JobBehavior::Fail {
                reason: "DeadlineExceeded".to_string(),
                message: "run error".to_string(),
            }),
            spec_data(&[]),
            &[],
        );
        store.retain_on_delete(ResourceKind::Namespace).await;

        let err = launch(&store).await.unwrap_err();

        assert!(err.contains("run: "));
        assert!(err.contains("run error"));
        assert!(err.contains("teardown: failed to teardown checkup"));
        let data = record_data(&store).await;
        assert_eq!(data[keys::FAILURE_REASON], err);
    }

    #[tokio::test]
    async fn test_report_failure_is_returned() {
        let store = seeded(MemoryStore::new(), spec_data(&[]), &[]);
        store
            .inject_failure(
                StoreOperation::Update,
                ResourceKind::ConfigMap,
                Some(RECORD_NAME),
                "etcd unavailable",
            )
            .await;

        let err = launch(&store).await.unwrap_err();

        assert_eq!(err, "report: etcd unavailable");
        assert!(!record_data(&store).await.contains_key(keys::START_TIMESTAMP));
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_pod_logs_failure_is_not_reported() {
        let store = seeded(MemoryStore::new(), spec_data(&[]), &[]);
        store
            .inject_failure(StoreOperation::Logs, ResourceKind::Job, None, "pods is forbidden")
            .await;

        launch(&store).await.unwrap();

        let data = record_data(&store).await;
        assert_eq!(data[keys::SUCCEEDED], "true");
        assert_eq!(data[keys::FAILURE_REASON], "");
        assert_workspace_gone(&store).await;
    }

    #[tokio::test]
    async fn test_checkup_reported_failure() {
        let output = BTreeMap::from([
            (keys::SUCCEEDED.to_string(), "false".to_string()),
            (keys::FAILURE_REASON.to_string(), "packet loss 40%".to_string()),
        ]);
        let store = seeded(
            MemoryStore::new().with_checkup_output(output),
            spec_data(&[]),
            &[],
        );

        let err = launch(&store).await.unwrap_err();

        assert_eq!(err, "checkup: packet loss 40%");
        let data = record_data(&store).await;
        assert_eq!(data[keys::SUCCEEDED], "false");
        assert_eq!(data[keys::FAILURE_REASON], "checkup: packet loss 40%");
    }
}
