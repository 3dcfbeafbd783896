//! Workspace provisioning
//!
//! Creates the isolated workspace a checkup runs in, strictly in order:
//! 1. namespace
//! 2. service account
//! 3. result record
//! 4. roles (record writer plus workspace copies of granted roles)
//! 5. role bindings
//! 6. cluster role bindings
//! 7. the checkup Job
//!
//! A failing step stops the sequence and unwinds what was created.

pub mod objects;
mod rollback;

pub use rollback::{Compensation, Rollback};

use crate::disposal::{delete_and_wait_all, wait_for_deletion};
use crate::store::{ObjectKey, Resource, ResourceKind, ResourceStore, StoreError};
use crate::wait::{PollSettings, Shutdown};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Names of the workspace objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNames {
    pub namespace: String,
    pub result_record: String,
    pub writer_role: String,
    pub job: String,
}

impl Default for WorkspaceNames {
    fn default() -> Self {
        Self {
            namespace: "checkup-workspace".to_string(),
            result_record: "checkup-results".to_string(),
            writer_role: "results-configmap-writer".to_string(),
            job: "checkup-job".to_string(),
        }
    }
}

/// Every object to create, in creation order
#[derive(Debug, Clone)]
pub struct WorkspacePlan {
    pub namespace: Namespace,
    pub service_account: ServiceAccount,
    pub result_record: ConfigMap,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub job: Option<Job>,
}

impl WorkspacePlan {
    /// Compute the workspace for a checkup running as `service_account`
    ///
    /// Fails if two granted roles, or a granted role and the record writer
    /// role, would end up with the same name in the workspace.
    pub fn new(
        names: &WorkspaceNames,
        service_account: &str,
        cluster_roles: &[ClusterRole],
        roles: &[Role],
    ) -> Result<Self, ProvisionError> {
        let ns = names.namespace.as_str();
        let subject = objects::service_account_subject(service_account, ns);

        let mut workspace_roles = vec![objects::record_writer_role(
            &names.writer_role,
            ns,
            &names.result_record,
        )];
        workspace_roles.extend(roles.iter().map(|role| objects::role_copy(role, ns)));

        let role_bindings = workspace_roles
            .iter()
            .filter_map(|role| role.metadata.name.as_deref())
            .map(|name| objects::role_binding(name, ns, subject.clone()))
            .collect();

        let cluster_role_bindings: Vec<ClusterRoleBinding> = cluster_roles
            .iter()
            .filter_map(|role| role.metadata.name.as_deref())
            .map(|name| objects::cluster_role_binding(ns, name, subject.clone()))
            .collect();

        ensure_unique(ResourceKind::Role, workspace_roles.iter().map(|r| &r.metadata))?;
        ensure_unique(
            ResourceKind::ClusterRoleBinding,
            cluster_role_bindings.iter().map(|b| &b.metadata),
        )?;

        Ok(Self {
            namespace: objects::namespace(ns),
            service_account: objects::service_account(service_account, ns),
            result_record: objects::result_record(&names.result_record, ns),
            roles: workspace_roles,
            role_bindings,
            cluster_role_bindings,
            job: None,
        })
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.job = Some(job);
        self
    }
}

fn ensure_unique<'a>(
    kind: ResourceKind,
    metas: impl Iterator<Item = &'a ObjectMeta>,
) -> Result<(), ProvisionError> {
    let mut seen = BTreeSet::new();
    for name in metas.filter_map(|meta| meta.name.as_deref()) {
        if !seen.insert(name) {
            return Err(ProvisionError::NameClash {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Keys of the objects that were actually created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workspace {
    pub namespace: String,
    pub service_account: Option<ObjectKey>,
    pub result_record: Option<ObjectKey>,
    pub roles: Vec<ObjectKey>,
    pub role_bindings: Vec<ObjectKey>,
    pub cluster_role_bindings: Vec<ObjectKey>,
    pub job: Option<ObjectKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProvisionError {
    #[error("failed to create {kind} {key:?}: {source}")]
    Create {
        kind: ResourceKind,
        key: String,
        source: StoreError,
    },

    #[error("more than one workspace {kind} would be named {name:?}")]
    NameClash { kind: ResourceKind, name: String },

    #[error("{cause}, clean up failed: {}", .rollback.join(", "))]
    RolledBack {
        cause: Box<ProvisionError>,
        rollback: Vec<String>,
    },
}

impl ProvisionError {
    /// Kind of the object whose creation failed
    pub fn failed_kind(&self) -> ResourceKind {
        match self {
            ProvisionError::Create { kind, .. } | ProvisionError::NameClash { kind, .. } => {
                *kind
            }
            ProvisionError::RolledBack { cause, .. } => cause.failed_kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to teardown checkup: {}", .errors.join(", "))]
pub struct TeardownError {
    pub errors: Vec<String>,
}

/// Creates and destroys checkup workspaces
pub struct Provisioner {
    store: Arc<dyn ResourceStore>,
    settings: PollSettings,
}

impl Provisioner {
    /// `settings` bounds every disposal wait done by rollback and teardown
    pub fn new(store: Arc<dyn ResourceStore>, settings: PollSettings) -> Self {
        Self { store, settings }
    }

    /// Create every object of `plan`, unwinding on the first failure
    pub async fn setup(&self, plan: WorkspacePlan) -> Result<Workspace, ProvisionError> {
        let mut rollback = Rollback::new();
        let mut workspace = Workspace::default();

        match self.create_all(plan, &mut rollback, &mut workspace).await {
            Ok(()) => {
                info!(namespace = %workspace.namespace, "workspace provisioned");
                Ok(workspace)
            }
            Err(cause) if rollback.is_empty() => Err(cause),
            Err(cause) => {
                warn!(error = %cause, "workspace setup failed");
                match rollback.unwind(self.store.as_ref(), self.settings).await {
                    Ok(()) => Err(cause),
                    Err(rollback) => Err(ProvisionError::RolledBack {
                        cause: Box::new(cause),
                        rollback,
                    }),
                }
            }
        }
    }

    async fn create_all(
        &self,
        plan: WorkspacePlan,
        rollback: &mut Rollback,
        workspace: &mut Workspace,
    ) -> Result<(), ProvisionError> {
        let ns = self.create(Resource::Namespace(plan.namespace)).await?;
        workspace.namespace = ns.name.clone();
        rollback.push(Compensation::Namespace(ns.name));

        let service_account = Resource::ServiceAccount(plan.service_account);
        workspace.service_account = Some(self.create(service_account).await?);
        workspace.result_record = Some(self.create(Resource::ConfigMap(plan.result_record)).await?);

        for role in plan.roles {
            workspace.roles.push(self.create(Resource::Role(role)).await?);
        }
        for binding in plan.role_bindings {
            workspace.role_bindings.push(self.create(Resource::RoleBinding(binding)).await?);
        }
        for binding in plan.cluster_role_bindings {
            let key = self.create(Resource::ClusterRoleBinding(binding)).await?;
            rollback.push(Compensation::ClusterRoleBinding(key.name.clone()));
            workspace.cluster_role_bindings.push(key);
        }

        if let Some(job) = plan.job {
            workspace.job = Some(self.create(Resource::from(job)).await?);
        }
        Ok(())
    }

    async fn create(&self, resource: Resource) -> Result<ObjectKey, ProvisionError> {
        let kind = resource.kind();
        let key = resource.key();
        match self.store.create(resource).await {
            Ok(created) => {
                info!(kind = %kind, key = %key, "created");
                Ok(created.key())
            }
            Err(source) => Err(ProvisionError::Create {
                kind,
                key: key.to_string(),
                source,
            }),
        }
    }

    /// Delete the cluster role bindings and the namespace and wait for both
    ///
    /// Every failure is collected; the namespace is deleted even when
    /// binding removal fails.
    pub async fn teardown(&self, workspace: &Workspace) -> Result<(), TeardownError> {
        let shutdown = Shutdown::never();
        let store = self.store.as_ref();
        let mut errors = Vec::new();

        if let Err(e) = delete_and_wait_all(
            store,
            ResourceKind::ClusterRoleBinding,
            &workspace.cluster_role_bindings,
            self.settings,
            &shutdown,
        )
        .await
        {
            errors.push(e.to_string());
        }

        if !workspace.namespace.is_empty() {
            let ns_key = ObjectKey::cluster(workspace.namespace.as_str());
            match store.delete(ResourceKind::Namespace, &ns_key).await {
                Ok(()) => {
                    let waited = wait_for_deletion(
                        store,
                        ResourceKind::Namespace,
                        &ns_key,
                        self.settings,
                        &shutdown,
                    )
                    .await;
                    if let Err(e) = waited {
                        errors.push(e.to_string());
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => errors.push(format!(
                    "failed to delete Namespace {:?}: {}",
                    workspace.namespace, e
                )),
            }
        }

        if errors.is_empty() {
            info!(namespace = %workspace.namespace, "workspace torn down");
            Ok(())
        } else {
            warn!(
                namespace = %workspace.namespace,
                errors = errors.len(),
                "workspace teardown incomplete"
            );
            Err(TeardownError { errors })
        }
    }
}
