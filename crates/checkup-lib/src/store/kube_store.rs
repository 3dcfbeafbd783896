//! Resource store backed by the Kubernetes API server

use super::{async_trait, ObjectKey, PodLog, Resource, ResourceKind, ResourceStore, StoreError};
use crate::checkup::CONTAINER_NAME;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::{Client, Resource as KubeResource};
use tracing::debug;

/// Label the job controller puts on every pod it creates
const JOB_NAME_LABEL: &str = "job-name";

/// [`ResourceStore`] implementation talking to a live cluster
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using in-cluster configuration or the local kubeconfig
    pub async fn try_default() -> Result<Self, StoreError> {
        let client = Client::try_default()
            .await
            .map_err(|e| StoreError::Api(format!("failed to create kube client: {}", e)))?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, key: &ObjectKey) -> Api<K>
    where
        K: KubeResource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        match key.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    fn cluster<K>(&self) -> Api<K>
    where
        K: KubeResource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }
}

/// Translate kube errors into store errors, keeping "not found" distinguishable
fn map_error(kind: ResourceKind, key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::not_found(kind, key),
        kube::Error::Api(response)
            if response.code == 409 && response.reason == "AlreadyExists" =>
        {
            StoreError::AlreadyExists {
                kind,
                key: key.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind,
            key: key.to_string(),
            message: response.message,
        },
        other => StoreError::Api(other.to_string()),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn create(&self, resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let pp = PostParams::default();

        let created = match resource {
            Resource::Namespace(o) => self
                .cluster::<Namespace>()
                .create(&pp, &o)
                .await
                .map(Resource::Namespace),
            Resource::ServiceAccount(o) => self
                .namespaced::<ServiceAccount>(&key)
                .create(&pp, &o)
                .await
                .map(Resource::ServiceAccount),
            Resource::ConfigMap(o) => self
                .namespaced::<ConfigMap>(&key)
                .create(&pp, &o)
                .await
                .map(Resource::ConfigMap),
            Resource::Role(o) => self
                .namespaced::<Role>(&key)
                .create(&pp, &o)
                .await
                .map(Resource::Role),
            Resource::RoleBinding(o) => self
                .namespaced::<RoleBinding>(&key)
                .create(&pp, &o)
                .await
                .map(Resource::RoleBinding),
            Resource::ClusterRole(o) => self
                .cluster::<ClusterRole>()
                .create(&pp, &o)
                .await
                .map(Resource::ClusterRole),
            Resource::ClusterRoleBinding(o) => self
                .cluster::<ClusterRoleBinding>()
                .create(&pp, &o)
                .await
                .map(Resource::ClusterRoleBinding),
            Resource::Job(o) => self
                .namespaced::<Job>(&key)
                .create(&pp, o.as_ref())
                .await
                .map(Resource::from),
        };

        debug!(kind = %kind, key = %key, ok = created.is_ok(), "create request completed");
        created.map_err(|e| map_error(kind, &key, e))
    }

    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, StoreError> {
        let name = key.name.as_str();

        let fetched = match kind {
            ResourceKind::Namespace => self
                .cluster::<Namespace>()
                .get(name)
                .await
                .map(Resource::Namespace),
            ResourceKind::ServiceAccount => self
                .namespaced::<ServiceAccount>(key)
                .get(name)
                .await
                .map(Resource::ServiceAccount),
            ResourceKind::ConfigMap => self
                .namespaced::<ConfigMap>(key)
                .get(name)
                .await
                .map(Resource::ConfigMap),
            ResourceKind::Role => self.namespaced::<Role>(key).get(name).await.map(Resource::Role),
            ResourceKind::RoleBinding => self
                .namespaced::<RoleBinding>(key)
                .get(name)
                .await
                .map(Resource::RoleBinding),
            ResourceKind::ClusterRole => self
                .cluster::<ClusterRole>()
                .get(name)
                .await
                .map(Resource::ClusterRole),
            ResourceKind::ClusterRoleBinding => self
                .cluster::<ClusterRoleBinding>()
                .get(name)
                .await
                .map(Resource::ClusterRoleBinding),
            ResourceKind::Job => self
                .namespaced::<Job>(key)
                .get(name)
                .await
                .map(Resource::from),
        };

        fetched.map_err(|e| map_error(kind, key, e))
    }

    async fn update(&self, resource: Resource) -> Result<Resource, StoreError> {
        let kind = resource.kind();
        let key = resource.key();
        let name = key.name.clone();
        let pp = PostParams::default();

        let replaced = match resource {
            Resource::Namespace(o) => self
                .cluster::<Namespace>()
                .replace(&name, &pp, &o)
                .await
                .map(Resource::Namespace),
            Resource::ServiceAccount(o) => self
                .namespaced::<ServiceAccount>(&key)
                .replace(&name, &pp, &o)
                .await
                .map(Resource::ServiceAccount),
            Resource::ConfigMap(o) => self
                .namespaced::<ConfigMap>(&key)
                .replace(&name, &pp, &o)
                .await
                .map(Resource::ConfigMap),
            Resource::Role(o) => self
                .namespaced::<Role>(&key)
                .replace(&name, &pp, &o)
                .await
                .map(Resource::Role),
            Resource::RoleBinding(o) => self
                .namespaced::<RoleBinding>(&key)
                .replace(&name, &pp, &o)
                .await
                .map(Resource::RoleBinding),
            Resource::ClusterRole(o) => self
                .cluster::<ClusterRole>()
                .replace(&name, &pp, &o)
                .await
                .map(Resource::ClusterRole),
            Resource::ClusterRoleBinding(o) => self
                .cluster::<ClusterRoleBinding>()
                .replace(&name, &pp, &o)
                .await
                .map(Resource::ClusterRoleBinding),
            Resource::Job(o) => self
                .namespaced::<Job>(&key)
                .replace(&name, &pp, o.as_ref())
                .await
                .map(Resource::from),
        };

        replaced.map_err(|e| map_error(kind, &key, e))
    }

    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError> {
        let name = key.name.as_str();
        // Background propagation so Job pods are collected with their Job
        let dp = DeleteParams::background();

        let deleted = match kind {
            ResourceKind::Namespace => self
                .cluster::<Namespace>()
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::ServiceAccount => self
                .namespaced::<ServiceAccount>(key)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::ConfigMap => self
                .namespaced::<ConfigMap>(key)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Role => self
                .namespaced::<Role>(key)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::RoleBinding => self
                .namespaced::<RoleBinding>(key)
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::ClusterRole => self
                .cluster::<ClusterRole>()
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::ClusterRoleBinding => self
                .cluster::<ClusterRoleBinding>()
                .delete(name, &dp)
                .await
                .map(|_| ()),
            ResourceKind::Job => self
                .namespaced::<Job>(key)
                .delete(name, &dp)
                .await
                .map(|_| ()),
        };

        debug!(kind = %kind, key = %key, ok = deleted.is_ok(), "delete request sent");
        deleted.map_err(|e| map_error(kind, key, e))
    }

    async fn job_logs(&self, job: &ObjectKey) -> Result<Vec<PodLog>, StoreError> {
        let pods: Api<Pod> = self.namespaced(job);
        let selector = format!("{}={}", JOB_NAME_LABEL, job.name);
        let listed = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| StoreError::Api(format!("failed to list pods of Job {}: {}", job, e)))?;

        let lp = LogParams {
            container: Some(CONTAINER_NAME.to_string()),
            ..Default::default()
        };
        let mut logs = Vec::with_capacity(listed.items.len());
        for pod in listed.items {
            let name = pod.metadata.name.unwrap_or_default();
            let text = pods.logs(&name, &lp).await.map_err(|e| {
                StoreError::Api(format!("failed to fetch logs of pod {}: {}", name, e))
            })?;
            logs.push(PodLog { pod: name, text });
        }

        debug!(job = %job, pods = logs.len(), "pod logs fetched");
        Ok(logs)
    }
}
