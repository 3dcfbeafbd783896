//! The batch Job that runs the checkup image

use crate::models::CheckupSpec;
use crate::provision::{objects, WorkspaceNames};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::time::Duration;

pub const RESULT_RECORD_NAME_ENV: &str = "RESULT_CONFIGMAP_NAME";
pub const RESULT_RECORD_NAMESPACE_ENV: &str = "RESULT_CONFIGMAP_NAMESPACE";

pub const CONTAINER_NAME: &str = "checkup";
pub const TERMINATION_GRACE_PERIOD_SECS: i64 = 5;

/// Terminal state of a Job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Complete,
    Failed {
        reason: Option<String>,
        message: Option<String>,
    },
}

/// Whole seconds covering `timeout`, never less than one
pub fn active_deadline_secs(timeout: Duration) -> i64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

/// Environment handed to the checkup container
///
/// Result record coordinates come first, then every param with its name
/// uppercased.
pub fn checkup_env(names: &WorkspaceNames, spec: &CheckupSpec) -> Vec<EnvVar> {
    let var = |name: String, value: String| EnvVar {
        name,
        value: Some(value),
        ..Default::default()
    };

    let mut env = vec![
        var(RESULT_RECORD_NAME_ENV.to_string(), names.result_record.clone()),
        var(RESULT_RECORD_NAMESPACE_ENV.to_string(), names.namespace.clone()),
    ];
    env.extend(
        spec.params
            .iter()
            .map(|(name, value)| var(param_env_name(name), value.clone())),
    );
    env
}

/// Environment variable a param is passed as
pub fn param_env_name(param: &str) -> String {
    param.to_uppercase()
}

pub fn checkup_job(names: &WorkspaceNames, spec: &CheckupSpec) -> Job {
    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("Always".to_string()),
        env: Some(checkup_env(names, spec)),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(names.job.clone()),
            namespace: Some(names.namespace.clone()),
            labels: Some(
                [(
                    objects::MANAGED_BY_LABEL.to_string(),
                    objects::MANAGED_BY_VALUE.to_string(),
                )]
                .into(),
            ),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(active_deadline_secs(spec.timeout)),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    service_account_name: Some(spec.service_account_name.clone()),
                    restart_policy: Some("Never".to_string()),
                    termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD_SECS),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Terminal outcome, if the Job has reached one
pub fn job_outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|c| c.status == "True")
        .find_map(|c| match c.type_.as_str() {
            "Complete" => Some(JobOutcome::Complete),
            "Failed" => Some(JobOutcome::Failed {
                reason: c.reason.clone(),
                message: c.message.clone(),
            }),
            _ => None,
        })
}
