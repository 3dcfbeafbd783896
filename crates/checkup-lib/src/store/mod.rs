//! Access to the cluster resource store
//!
//! The orchestration core talks to the cluster only through the
//! [`ResourceStore`] trait. Two implementations are provided:
//! - [`KubeStore`] backed by the Kubernetes API server
//! - [`MemoryStore`] an in-process store with failure injection, used by tests

mod kube_store;
mod memory;

pub use kube_store::KubeStore;
pub use memory::{JobBehavior, MemoryStore, StoreOp, StoreOperation};

pub use async_trait::async_trait;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;
use thiserror::Error;

/// Kinds of resources the launcher manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Namespace,
    ServiceAccount,
    ConfigMap,
    Role,
    RoleBinding,
    ClusterRole,
    ClusterRoleBinding,
    Job,
}

impl ResourceKind {
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(
            self,
            ResourceKind::Namespace | ResourceKind::ClusterRole | ResourceKind::ClusterRoleBinding
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Role => "Role",
            ResourceKind::RoleBinding => "RoleBinding",
            ResourceKind::ClusterRole => "ClusterRole",
            ResourceKind::ClusterRoleBinding => "ClusterRoleBinding",
            ResourceKind::Job => "Job",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Location of an object in the store
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A typed object of one of the managed kinds
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Namespace(Namespace),
    ServiceAccount(ServiceAccount),
    ConfigMap(ConfigMap),
    Role(Role),
    RoleBinding(RoleBinding),
    ClusterRole(ClusterRole),
    ClusterRoleBinding(ClusterRoleBinding),
    Job(Box<Job>),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Namespace(_) => ResourceKind::Namespace,
            Resource::ServiceAccount(_) => ResourceKind::ServiceAccount,
            Resource::ConfigMap(_) => ResourceKind::ConfigMap,
            Resource::Role(_) => ResourceKind::Role,
            Resource::RoleBinding(_) => ResourceKind::RoleBinding,
            Resource::ClusterRole(_) => ResourceKind::ClusterRole,
            Resource::ClusterRoleBinding(_) => ResourceKind::ClusterRoleBinding,
            Resource::Job(_) => ResourceKind::Job,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Resource::Namespace(o) => &o.metadata,
            Resource::ServiceAccount(o) => &o.metadata,
            Resource::ConfigMap(o) => &o.metadata,
            Resource::Role(o) => &o.metadata,
            Resource::RoleBinding(o) => &o.metadata,
            Resource::ClusterRole(o) => &o.metadata,
            Resource::ClusterRoleBinding(o) => &o.metadata,
            Resource::Job(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Resource::Namespace(o) => &mut o.metadata,
            Resource::ServiceAccount(o) => &mut o.metadata,
            Resource::ConfigMap(o) => &mut o.metadata,
            Resource::Role(o) => &mut o.metadata,
            Resource::RoleBinding(o) => &mut o.metadata,
            Resource::ClusterRole(o) => &mut o.metadata,
            Resource::ClusterRoleBinding(o) => &mut o.metadata,
            Resource::Job(o) => &mut o.metadata,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let mut key = ObjectKey::from_meta(self.metadata());
        if self.kind().is_cluster_scoped() {
            key.namespace = None;
        }
        key
    }

    pub fn into_config_map(self) -> Result<ConfigMap, StoreError> {
        match self {
            Resource::ConfigMap(cm) => Ok(cm),
            other => Err(StoreError::unexpected(ResourceKind::ConfigMap, other.kind())),
        }
    }

    pub fn into_job(self) -> Result<Job, StoreError> {
        match self {
            Resource::Job(job) => Ok(*job),
            other => Err(StoreError::unexpected(ResourceKind::Job, other.kind())),
        }
    }

    pub fn into_role(self) -> Result<Role, StoreError> {
        match self {
            Resource::Role(role) => Ok(role),
            other => Err(StoreError::unexpected(ResourceKind::Role, other.kind())),
        }
    }

    pub fn into_cluster_role(self) -> Result<ClusterRole, StoreError> {
        match self {
            Resource::ClusterRole(role) => Ok(role),
            other => Err(StoreError::unexpected(ResourceKind::ClusterRole, other.kind())),
        }
    }
}

impl From<Job> for Resource {
    fn from(job: Job) -> Self {
        Resource::Job(Box::new(job))
    }
}

/// Output of one pod created by a Job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLog {
    pub pod: String,
    pub text: String,
}

/// Errors returned by a [`ResourceStore`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key:?} not found")]
    NotFound { kind: ResourceKind, key: String },

    #[error("{kind} {key:?} already exists")]
    AlreadyExists { kind: ResourceKind, key: String },

    #[error("conflict updating {kind} {key:?}: {message}")]
    Conflict {
        kind: ResourceKind,
        key: String,
        message: String,
    },

    #[error("{0}")]
    Api(String),

    #[error("expected a {expected} object, got {actual}")]
    Unexpected {
        expected: ResourceKind,
        actual: ResourceKind,
    },
}

impl StoreError {
    pub fn not_found(kind: ResourceKind, key: &ObjectKey) -> Self {
        StoreError::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    fn unexpected(expected: ResourceKind, actual: ResourceKind) -> Self {
        StoreError::Unexpected { expected, actual }
    }
}

/// Key/value object API over the cluster
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a new object, failing if it already exists
    async fn create(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Fetch an object; a missing object yields [`StoreError::NotFound`]
    async fn get(&self, kind: ResourceKind, key: &ObjectKey) -> Result<Resource, StoreError>;

    /// Replace an object; a stale resource version yields [`StoreError::Conflict`]
    async fn update(&self, resource: Resource) -> Result<Resource, StoreError>;

    /// Request deletion of an object
    async fn delete(&self, kind: ResourceKind, key: &ObjectKey) -> Result<(), StoreError>;

    /// Logs of every pod the Job `job` created
    async fn job_logs(&self, job: &ObjectKey) -> Result<Vec<PodLog>, StoreError>;
}
