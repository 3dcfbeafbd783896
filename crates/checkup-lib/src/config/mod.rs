//! Checkup configuration loading
//!
//! Reads the checkup record, validates it and resolves every RBAC object
//! it references before anything is provisioned.

mod parser;


pub use parser::{parse, parse_duration, DEFAULT_SERVICE_ACCOUNT};

use crate::models::CheckupSpec;
use crate::store::{ObjectKey, ResourceKind, ResourceStore, StoreError};
use k8s_openapi::api::rbac::v1::{ClusterRole, Role};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("configMap data is nil")]
    DataIsNil,

    #[error("configMap is already in use")]
    AlreadyInUse,

    #[error("image field is missing")]
    ImageMissing,

    #[error("image field is illegal")]
    ImageIllegal,

    #[error("timeout field is missing")]
    TimeoutMissing,

    #[error("timeout field is illegal: {0}")]
    TimeoutIllegal(String),

    #[error("serviceAccountName field is missing")]
    ServiceAccountMissing,

    #[error("serviceAccountName field is empty")]
    ServiceAccountEmpty,

    #[error(
        "serviceAccountName field is illegal: the {:?} service account is not allowed",
        DEFAULT_SERVICE_ACCOUNT
    )]
    ServiceAccountIllegal,

    #[error("param name is illegal: empty name")]
    ParamNameIllegal,

    #[error("param name {name:?} is illegal: environment variable {env} is already taken")]
    ParamNameConflict { name: String, env: String },

    #[error("role name {0:?} is illegal, expected namespace/name")]
    RoleNameIllegal(String),

    #[error("failed to resolve {kind} {name:?}: {source}")]
    RoleLookup {
        kind: ResourceKind,
        name: String,
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A validated checkup definition together with the RBAC objects it grants
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub spec: CheckupSpec,
    pub cluster_roles: Vec<ClusterRole>,
    pub roles: Vec<Role>,
}

/// Loads checkup configuration from the store
pub struct ConfigLoader {
    store: Arc<dyn ResourceStore>,
}

impl ConfigLoader {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Fetch, parse and resolve the checkup record at `record`
    pub async fn load(&self, record: &ObjectKey) -> Result<LoadedConfig, ConfigError> {
        let config_map = self
            .store
            .get(ResourceKind::ConfigMap, record)
            .await?
            .into_config_map()?;

        let spec = parse(config_map.data.as_ref())?;
        info!(
            record = %record,
            image = %spec.image,
            timeout_secs = spec.timeout.as_secs(),
            params = spec.params.len(),
            "checkup record parsed"
        );

        let cluster_roles = self.resolve_cluster_roles(&spec.cluster_role_names).await?;
        let roles = self.resolve_roles(&spec).await?;

        Ok(LoadedConfig {
            spec,
            cluster_roles,
            roles,
        })
    }

    async fn resolve_cluster_roles(
        &self,
        names: &[String],
    ) -> Result<Vec<ClusterRole>, ConfigError> {
        let mut resolved = Vec::with_capacity(names.len());
        for name in names {
            let role = self
                .store
                .get(ResourceKind::ClusterRole, &ObjectKey::cluster(name.as_str()))
                .await
                .and_then(|r| r.into_cluster_role())
                .map_err(|source| ConfigError::RoleLookup {
                    kind: ResourceKind::ClusterRole,
                    name: name.clone(),
                    source,
                })?;
            debug!(name = %name, "cluster role resolved");
            resolved.push(role);
        }
        Ok(resolved)
    }

    async fn resolve_roles(&self, spec: &CheckupSpec) -> Result<Vec<Role>, ConfigError> {
        let mut resolved = Vec::with_capacity(spec.role_names.len());
        for (namespace, name) in spec.role_refs() {
            let role = self
                .store
                .get(ResourceKind::Role, &ObjectKey::namespaced(namespace, name))
                .await
                .and_then(|r| r.into_role())
                .map_err(|source| ConfigError::RoleLookup {
                    kind: ResourceKind::Role,
                    name: format!("{}/{}", namespace, name),
                    source,
                })?;
            debug!(namespace = %namespace, name = %name, "role resolved");
            resolved.push(role);
        }
        Ok(resolved)
    }
}
