//! Core data models for the checkup launcher

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Reserved keys of the checkup record
pub mod keys {
    pub const IMAGE: &str = "spec.image";
    pub const TIMEOUT: &str = "spec.timeout";
    pub const SERVICE_ACCOUNT_NAME: &str = "spec.serviceAccountName";
    pub const CLUSTER_ROLES: &str = "spec.clusterRoles";
    pub const ROLES: &str = "spec.roles";
    pub const PARAM_PREFIX: &str = "spec.param.";

    pub const START_TIMESTAMP: &str = "status.startTimestamp";
    pub const COMPLETION_TIMESTAMP: &str = "status.completionTimestamp";
    pub const SUCCEEDED: &str = "status.succeeded";
    pub const FAILURE_REASON: &str = "status.failureReason";
    pub const RESULT_PREFIX: &str = "status.result.";
}

/// Declarative description of a single checkup, parsed once from the record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckupSpec {
    pub image: String,
    pub timeout: Duration,
    pub service_account_name: String,
    pub params: BTreeMap<String, String>,
    pub cluster_role_names: Vec<String>,
    /// Entries in `namespace/name` form
    pub role_names: Vec<String>,
}

impl CheckupSpec {
    /// Split role names into `(namespace, name)` pairs
    pub fn role_refs(&self) -> Vec<(&str, &str)> {
        self.role_names
            .iter()
            .filter_map(|full| full.split_once('/'))
            .collect()
    }
}

/// Progress of a checkup run as persisted to the record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupStatus {
    pub start_timestamp: Option<DateTime<Utc>>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    /// Only meaningful once `completion_timestamp` is set
    pub succeeded: Option<bool>,
    pub failure_reason: Vec<String>,
    pub results: BTreeMap<String, String>,
}

impl CheckupStatus {
    pub fn started_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            start_timestamp: Some(timestamp),
            ..Default::default()
        }
    }

    /// Failure reasons joined for display and storage
    pub fn joined_failure_reason(&self) -> String {
        self.failure_reason.join(", ")
    }
}

/// Output the checkup container wrote into its result record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupResults {
    pub succeeded: Option<bool>,
    pub failure_reason: Option<String>,
    pub results: BTreeMap<String, String>,
}
