//! In-process resource store
//!
//! Behaves like a minimal API server: assigns resource versions, enforces
//! optimistic concurrency on update, garbage-collects namespaced objects
//! when their namespace is deleted and plays the job controller for
//! created Jobs. Failures can be injected per operation, kind and name.

use super::{async_trait, ObjectKey, PodLog, Resource, ResourceKind, ResourceStore, StoreError};
use k8s_openapi::api::batch::v1::{Job, JobCondition, JobStatus};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Store operation, used for failure injection and the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Create,
    Get,
    Update,
    Delete,
    Logs,
}

/// Journal entry of an operation served by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub operation: StoreOperation,
    pub kind: ResourceKind,
    pub key: ObjectKey,
}

/// How the store's job controller treats newly created Jobs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum JobBehavior {
    /// Jobs finish successfully as soon as they are created
    #[default]
    Complete,
    /// Jobs fail as soon as they are created
    Fail { reason: String, message: String },
    /// Jobs never reach a terminal state
    Pending,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    operation: StoreOperation,
    kind: ResourceKind,
    name: Option<String>,
    message: String,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<(ResourceKind, ObjectKey), Resource>,
    failures: Vec<InjectedFailure>,
    lingering: BTreeSet<ResourceKind>,
    job_behavior: JobBehavior,
    checkup_output: BTreeMap<String, String>,
    pod_logs: String,
    journal: Vec<StoreOp>,
    next_version: u64,
}

impl State {
    fn record(&mut self, operation: StoreOperation, kind: ResourceKind, key: &ObjectKey) {
        self.journal.push(StoreOp {
            operation,
            kind,
            key: key.clone(),
        });
    }

    fn injected(
        &self,
        operation: StoreOperation,
        kind: ResourceKind,
        key: &ObjectKey,
    ) -> Option<StoreError> {
        self.failures
            .iter()
            .find(|f| {
                f.operation == operation
                    && f.kind == kind
                    && f.name.as_deref().map_or(true, |name| name == key.name)
            })
            .map(|f| StoreError::Api(f.message.clone()))
    }

    fn bump_version(&mut self, resource: &mut Resource) {
        self.next_version += 1;
        resource.metadata_mut().resource_version = Some(self.next_version.to_string());
    }

    /// Act as the job controller and as the checkup container writing its results
    fn settle_job(&mut self, job: &mut Job) {
        let (condition_type, reason, message) = match &self.job_behavior {
            JobBehavior::Pending => return,
            JobBehavior::Complete => ("Complete", None, None),
            JobBehavior::Fail { reason, message } => {
                ("Failed", Some(reason.clone()), Some(message.clone()))
            }
        };

        let succeeded = condition_type == "Complete";
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: condition_type.to_string(),
                status: "True".to_string(),
                reason,
                message,
                ..Default::default()
            }]),
            succeeded: succeeded.then_some(1),
            failed: (!succeeded).then_some(1),
            ..Default::default()
        });

        if self.checkup_output.is_empty() {
            return;
        }
        let Some(record_key) = result_record_of(job) else {
            return;
        };
        let output = self.checkup_output.clone();
        if let Some(Resource::ConfigMap(cm)) =
            self.objects.get_mut(&(ResourceKind::ConfigMap, record_key))
        {
            cm.data.get_or_insert_with(BTreeMap::new).extend(output);
        }
    }
}

/// Locate the result record a Job was told to write to
fn result_record_of(job: &Job) -> Option<ObjectKey> {
    let container = job.spec.as_ref()?.template.spec.as_ref()?.containers.first()?;
    let env = container.env.as_ref()?;
    let lookup = |name: &str| {
        env.iter()
            .find(|var| var.name == name)
            .and_then(|var| var.value.clone())
    };
    Some(ObjectKey::namespaced(
        lookup(crate::checkup::RESULT_RECORD_NAMESPACE_ENV)?,
        lookup(crate::checkup::RESULT_RECORD_NAME_ENV)?,
    ))
}

/// In-memory [`ResourceStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing objects
    pub fn with_objects(mut self, objects: impl IntoIterator<Item = Resource>) -> Self {
        let state = self.state.get_mut();
        for mut resource in objects {
            state.bump_version(&mut resource);
            state.objects.insert((resource.kind(), resource.key()), resource);
        }
        self
    }

    pub fn with_job_behavior(mut self, behavior: JobBehavior) -> Self {
        self.state.get_mut().job_behavior = behavior;
        self
    }

    /// Data merged into a Job's result record when the Job finishes
    pub fn with_checkup_output(mut self, output: BTreeMap<String, String>) -> Self {
        self.state.get_mut().checkup_output = output;
        self
    }

    /// Output served as the log of the single pod of every Job
    pub fn with_pod_logs(mut self, text: impl Into<String>) -> Self {
        self.state.get_mut().pod_logs = text.into();
        self
    }

    /// Fail every matching operation with `message`; `name` of `None` matches any object
    pub async fn inject_failure(
        &self,
        operation: StoreOperation,
        kind: ResourceKind,
        name: Option<&str>,
        message: impl Into<String>,
    ) {
        let mut state = self.state.write().await;
        state.failures.push(InjectedFailure {
            operation,
            kind,
            name: name.map(str::to_string),
            message: message.into(),
        });
    }

    pub async fn clear_failures(&self) {
        self.state.write().await.failures.clear();
    }

    /// Acknowledge deletes of `kind` without ever removing the objects
    pub async fn retain_on_delete(&self, kind: ResourceKind) {
        self.state.write().await.lingering.insert(kind);
    }

    pub async fn contains(&self, kind: ResourceKind, key: &ObjectKey) -> bool {
        self.state
            .read()
            .await
            .objects
            .contains_key(&(kind, key.clone()))
    }

    pub async fn list(&self, kind: ResourceKind) -> Vec<Resource> {
        self.state
            .read()
            .await
            .objects
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, resource)| resource.clone())
            .collect()
    }

    pub async fn count(&self, kind: ResourceKind) -> usize {
        self.list(kind).await.len()
    }

    pub async fn journal(&self) -> Vec<StoreOp> {
        self.state.read().await.journal.clone()
    }

    /// Overwrite an object without any version checks
    pub async fn put(&self, mut resource: Resource) {
        let mut state = self.state.write().await;
        state.bump_version(&mut resource);
        state.objects.insert((resource.kind(), resource.key()), resource);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut state = self.state.write().await;
        state.record(StoreOperation::Create, kind, &key);

        if let Some(err) = state.injected(StoreOperation::Create, kind, &key) {
            return Err(err);
        }
        if state.objects.contains_key(&(kind, key.clone())) {
            return Err(StoreError::AlreadyExists {
                kind,
                key: key.to_string(),
            });
        }
        if let Some(ns) = key.namespace.as_deref() {
            let ns_key = ObjectKey::cluster(ns);
            if !state.objects.contains_key(&(ResourceKind::Namespace, ns_key.clone())) {
                return Err(StoreError::not_found(ResourceKind::Namespace, &ns_key));
            }
        }

        if let Resource::Job(job) = &mut resource {
            state.settle_job(job);
        }
        state.bump_version(&mut resource);
        state.objects.insert((kind, key.clone()), resource.clone());
        debug!(kind = %kind, key = %key, "memory store: created");
        Ok(resource)
    }

    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, StoreError> {
        let mut state = self.state.write().await;
        state.record(StoreOperation::Get, kind, key);

        if let Some(err) = state.injected(StoreOperation::Get, kind, key) {
            return Err(err);
        }
        state
            .objects
            .get(&(kind, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(kind, key))
    }

    async fn update(&self, mut resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let mut state = self.state.write().await;
        state.record(StoreOperation::Update, kind, &key);

        if let Some(err) = state.injected(StoreOperation::Update, kind, &key) {
            return Err(err);
        }
        let current_version = match state.objects.get(&(kind, key.clone())) {
            Some(current) => current.metadata().resource_version.clone(),
            None => return Err(StoreError::not_found(kind, &key)),
        };
        let incoming_version = resource.metadata().resource_version.clone();
        if incoming_version.is_some() && incoming_version != current_version {
            return Err(StoreError::Conflict {
                kind,
                key: key.to_string(),
                message: "the object has been modified; please apply your changes to the latest \
                          version"
                    .to_string(),
            });
        }

        state.bump_version(&mut resource);
        state.objects.insert((kind, key), resource.clone());
        Ok(resource)
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.record(StoreOperation::Delete, kind, key);

        if let Some(err) = state.injected(StoreOperation::Delete, kind, key) {
            return Err(err);
        }
        if !state.objects.contains_key(&(kind, key.clone())) {
            return Err(StoreError::not_found(kind, key));
        }
        if state.lingering.contains(&kind) {
            debug!(kind = %kind, key = %key, "memory store: delete acknowledged, object retained");
            return Ok(());
        }

        state.objects.remove(&(kind, key.clone()));
        if kind == ResourceKind::Namespace {
            let namespace = key.name.clone();
            state
                .objects
                .retain(|(_, k), _| k.namespace.as_deref() != Some(namespace.as_str()));
        }
        debug!(kind = %kind, key = %key, "memory store: deleted");
        Ok(())
    }

    async fn job_logs(&self, job: &ObjectKey) -> Result<Vec<PodLog>, StoreError> {
        let mut state = self.state.write().await;
        state.record(StoreOperation::Logs, ResourceKind::Job, job);

        if let Some(err) = state.injected(StoreOperation::Logs, ResourceKind::Job, job) {
            return Err(err);
        }
        if !state.objects.contains_key(&(ResourceKind::Job, job.clone())) {
            return Err(StoreError::not_found(ResourceKind::Job, job));
        }
        Ok(vec![PodLog {
            pod: format!("{}-0", job.name),
            text: state.pod_logs.clone(),
        }])
    }
}
