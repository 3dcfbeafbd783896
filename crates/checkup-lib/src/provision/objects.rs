//! Builders for the objects that make up a checkup workspace

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use k8s_openapi::api::rbac::v1::{
    ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Label put on every object the launcher creates
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "checkup-launcher";

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            MANAGED_BY_VALUE.to_string(),
        )])),
        ..Default::default()
    }
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(name, None),
        ..Default::default()
    }
}

pub fn service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(name, Some(namespace)),
        ..Default::default()
    }
}

/// Empty record the checkup writes its results into
pub fn result_record(name: &str, namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: meta(name, Some(namespace)),
        data: Some(BTreeMap::new()),
        ..Default::default()
    }
}

/// Role allowed to read and write exactly one ConfigMap
pub fn record_writer_role(name: &str, namespace: &str, record_name: &str) -> Role {
    Role {
        metadata: meta(name, Some(namespace)),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["configmaps".to_string()]),
            resource_names: Some(vec![record_name.to_string()]),
            verbs: vec!["get".to_string(), "update".to_string(), "patch".to_string()],
            ..Default::default()
        }]),
    }
}

/// Name of the workspace-local copy of `namespace/name`
pub fn role_copy_name(source_namespace: &str, source_name: &str) -> String {
    format!("{}-{}", source_namespace, source_name)
}

/// Copy the rules of an existing Role into the workspace namespace
pub fn role_copy(source: &Role, namespace: &str) -> Role {
    let source_namespace = source.metadata.namespace.as_deref().unwrap_or_default();
    let source_name = source.metadata.name.as_deref().unwrap_or_default();
    Role {
        metadata: meta(&role_copy_name(source_namespace, source_name), Some(namespace)),
        rules: source.rules.clone(),
    }
}

pub fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Bind a workspace Role to `subject`; the binding takes the role's name
pub fn role_binding(role_name: &str, namespace: &str, subject: Subject) -> RoleBinding {
    RoleBinding {
        metadata: meta(role_name, Some(namespace)),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role_name.to_string(),
        },
        subjects: Some(vec![subject]),
    }
}

pub fn cluster_role_binding_name(workspace_namespace: &str, cluster_role: &str) -> String {
    format!("{}-{}", workspace_namespace, cluster_role)
}

pub fn cluster_role_binding(
    workspace_namespace: &str,
    cluster_role: &str,
    subject: Subject,
) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: meta(
            &cluster_role_binding_name(workspace_namespace, cluster_role),
            None,
        ),
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![subject]),
    }
}
