//! Status reporting into the checkup record
//!
//! Writes are additive: only fields that are set in the given status
//! overwrite their keys, everything else already in the record is kept.

use crate::models::{keys, CheckupStatus};
use crate::store::{ObjectKey, Resource, ResourceKind, ResourceStore, StoreError};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use async_trait::async_trait;

/// Persists checkup status somewhere observers can read it
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, status: &CheckupStatus) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("configMap data is nil")]
    DataIsNil,

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Merge `status` into the record fields
pub fn apply_status(data: &mut BTreeMap<String, String>, status: &CheckupStatus) {
    if let Some(start) = &status.start_timestamp {
        data.insert(keys::START_TIMESTAMP.to_string(), timestamp(start));
    }

    if let Some(completion) = &status.completion_timestamp {
        let succeeded = status
            .succeeded
            .unwrap_or_else(|| status.failure_reason.is_empty());
        data.insert(keys::COMPLETION_TIMESTAMP.to_string(), timestamp(completion));
        data.insert(keys::SUCCEEDED.to_string(), succeeded.to_string());
        data.insert(keys::FAILURE_REASON.to_string(), status.joined_failure_reason());
    }

    for (name, value) in &status.results {
        data.insert(format!("{}{}", keys::RESULT_PREFIX, name), value.clone());
    }
}

/// [`Reporter`] writing into a ConfigMap
pub struct RecordReporter {
    store: Arc<dyn ResourceStore>,
    record: ObjectKey,
}

impl RecordReporter {
    pub fn new(store: Arc<dyn ResourceStore>, record: ObjectKey) -> Self {
        Self { store, record }
    }

    /// Read-modify-write against the current version of the record
    ///
    /// A concurrent writer makes the update fail with a conflict.
    pub async fn write(&self, status: &CheckupStatus) -> Result<(), ReportError> {
        let mut config_map = self
            .store
            .get(ResourceKind::ConfigMap, &self.record)
            .await?
            .into_config_map()?;

        let data = config_map.data.as_mut().ok_or(ReportError::DataIsNil)?;
        apply_status(data, status);
        debug!(record = %self.record, keys = data.len(), "writing checkup status");

        self.store.update(Resource::ConfigMap(config_map)).await?;
        info!(
            record = %self.record,
            completed = status.completion_timestamp.is_some(),
            "checkup status reported"
        );
        Ok(())
    }
}

#[async_trait]
impl Reporter for RecordReporter {
    async fn report(&self, status: &CheckupStatus) -> Result<()> {
        Ok(self.write(status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreOperation};
    use chrono::TimeZone;
    use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn record(data: Option<BTreeMap<String, String>>) -> Resource {
        Resource::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some("checkup".to_string()),
                namespace: Some("kiagnose".to_string()),
                ..Default::default()
            },
            data,
            ..Default::default()
        })
    }

    fn key() -> ObjectKey {
        ObjectKey::namespaced("kiagnose", "checkup")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    async fn stored(store: &MemoryStore) -> BTreeMap<String, String> {
        store
            .get(ResourceKind::ConfigMap, &key())
            .await
            .unwrap()
            .into_config_map()
            .unwrap()
            .data
            .unwrap()
    }

    #[test]
    fn test_apply_start_only() {
        let mut data = BTreeMap::from([(keys::IMAGE.to_string(), "img".to_string())]);
        apply_status(&mut data, &CheckupStatus::started_at(at(0)));

        assert_eq!(data[keys::START_TIMESTAMP], "1970-01-01T00:00:00Z");
        assert_eq!(data[keys::IMAGE], "img");
        assert!(!data.contains_key(keys::COMPLETION_TIMESTAMP));
        assert!(!data.contains_key(keys::SUCCEEDED));
    }

    #[test]
    fn test_apply_failure_reasons() {
        let status = CheckupStatus {
            completion_timestamp: Some(at(60)),
            failure_reason: vec!["run: boom".to_string(), "teardown: stuck".to_string()],
            ..Default::default()
        };
        let mut data = BTreeMap::new();
        apply_status(&mut data, &status);

        assert_eq!(data[keys::SUCCEEDED], "false");
        assert_eq!(data[keys::FAILURE_REASON], "run: boom, teardown: stuck");
    }

    #[tokio::test]
    async fn test_reports_are_additive() {
        let store = Arc::new(MemoryStore::new().with_objects([
            Resource::Namespace(Namespace {
                metadata: ObjectMeta {
                    name: Some("kiagnose".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            }),
            record(Some(BTreeMap::new())),
        ]));
        let reporter = RecordReporter::new(store.clone(), key());

        reporter.report(&CheckupStatus::started_at(at(0))).await.unwrap();
        reporter
            .report(&CheckupStatus {
                completion_timestamp: Some(at(60)),
                succeeded: Some(true),
                results: BTreeMap::from([("latency".to_string(), "12".to_string())]),
                ..Default::default()
            })
            .await
            .unwrap();

        let data = stored(&store).await;
        assert_eq!(data[keys::START_TIMESTAMP], "1970-01-01T00:00:00Z");
        assert_eq!(data[keys::COMPLETION_TIMESTAMP], "1970-01-01T00:01:00Z");
        assert_eq!(data[keys::SUCCEEDED], "true");
        assert_eq!(data[keys::FAILURE_REASON], "");
        assert_eq!(data["status.result.latency"], "12");
    }

    #[tokio::test]
    async fn test_nil_data_is_not_mutated() {
        let store = Arc::new(MemoryStore::new().with_objects([record(None)]));
        let reporter = RecordReporter::new(store.clone(), key());

        let err = reporter.write(&CheckupStatus::started_at(at(0))).await.unwrap_err();

        assert_eq!(err, ReportError::DataIsNil);
        assert!(!store
            .journal()
            .await
            .iter()
            .any(|op| op.operation == StoreOperation::Update));
    }

    #[tokio::test]
    async fn test_missing_record_is_store_error() {
        let reporter = RecordReporter::new(Arc::new(MemoryStore::new()), key());
        let err = reporter.write(&CheckupStatus::default()).await.unwrap_err();
        assert!(matches!(err, ReportError::Store(e) if e.is_not_found()));
    }
}
