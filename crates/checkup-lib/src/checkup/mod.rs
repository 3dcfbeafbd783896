//! Checkup execution engine
//!
//! A [`Checkup`] moves through `Created -> Provisioned -> Ran -> TornDown`,
//! or to `Failed` from any step:
//! - setup provisions the workspace and submits the Job
//! - run waits for the Job and reads the result record
//! - teardown disposes of the workspace

mod job;
mod results;

pub use job::{
    active_deadline_secs, checkup_env, checkup_job, job_outcome, param_env_name, JobOutcome,
    CONTAINER_NAME, RESULT_RECORD_NAMESPACE_ENV, RESULT_RECORD_NAME_ENV,
    TERMINATION_GRACE_PERIOD_SECS,
};
pub use results::read_results;

use crate::config::LoadedConfig;
use crate::models::CheckupResults;
use crate::provision::{Provisioner, Workspace, WorkspaceNames, WorkspacePlan};
use crate::store::{ObjectKey, ResourceKind, ResourceStore, StoreError};
use crate::wait::{
    poll_until, PollSettings, Shutdown, WaitError, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT,
};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use async_trait::async_trait;

/// Operations the launcher drives for a single checkup
#[async_trait]
pub trait Workload: Send + Sync {
    /// Provision everything the checkup needs
    async fn setup(&mut self) -> Result<()>;

    /// Execute the checkup and collect its output
    async fn run(&mut self) -> Result<()>;

    /// Emit the output of the checkup pods; a no-op before setup
    async fn logs(&self) -> Result<()>;

    /// Dispose of everything setup created
    async fn teardown(&mut self) -> Result<()>;

    /// Output collected by run; empty until run succeeds
    fn results(&self) -> CheckupResults;

    fn phase(&self) -> CheckupPhase;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckupPhase {
    Created,
    Provisioned,
    Ran,
    TornDown,
    Failed(String),
}

impl fmt::Display for CheckupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckupPhase::Created => f.write_str("created"),
            CheckupPhase::Provisioned => f.write_str("provisioned"),
            CheckupPhase::Ran => f.write_str("ran"),
            CheckupPhase::TornDown => f.write_str("torn-down"),
            CheckupPhase::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("checkup workspace is not provisioned")]
    NotProvisioned,

    #[error("failed to wait for Job {job:?} to finish: {source}")]
    Wait { job: String, source: WaitError },

    #[error("Job {job:?} failed: {}", describe_failure(.reason, .message))]
    JobFailed {
        job: String,
        reason: Option<String>,
        message: Option<String>,
    },

    #[error("results: ConfigMap data is nil")]
    ResultsDataIsNil,

    #[error("results: succeeded field is illegal: {0:?}")]
    SucceededIllegal(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_failure(reason: &Option<String>, message: &Option<String>) -> String {
    match (reason, message) {
        (Some(reason), Some(message)) => format!("{}: {}", reason, message),
        (Some(text), None) | (None, Some(text)) => text.clone(),
        (None, None) => "unknown reason".to_string(),
    }
}

/// Timing knobs of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckupSettings {
    /// Interval between Job and disposal lookups
    pub poll_interval: Duration,
    /// Bound for every disposal wait during rollback and teardown
    pub teardown_timeout: Duration,
    /// Added to the checkup timeout when waiting for the Job
    pub job_deadline_grace: Duration,
}

impl Default for CheckupSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            teardown_timeout: DEFAULT_WAIT_TIMEOUT,
            job_deadline_grace: Duration::from_secs(10),
        }
    }
}

/// Runs one checkup image as a Job inside a dedicated workspace
pub struct Checkup {
    store: Arc<dyn ResourceStore>,
    provisioner: Provisioner,
    config: LoadedConfig,
    names: WorkspaceNames,
    settings: CheckupSettings,
    shutdown: Shutdown,
    workspace: Option<Workspace>,
    results: CheckupResults,
    phase: CheckupPhase,
}

impl Checkup {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: LoadedConfig,
        names: WorkspaceNames,
        settings: CheckupSettings,
    ) -> Self {
        let disposal = PollSettings::new(settings.poll_interval, settings.teardown_timeout);
        Self {
            provisioner: Provisioner::new(store.clone(), disposal),
            store,
            config,
            names,
            settings,
            shutdown: Shutdown::never(),
            workspace: None,
            results: CheckupResults::default(),
            phase: CheckupPhase::Created,
        }
    }

    /// Let `shutdown` interrupt the wait for the Job
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    fn fail(&mut self, reason: String) {
        warn!(phase = %self.phase, reason = %reason, "checkup failed");
        self.phase = CheckupPhase::Failed(reason);
    }

    async fn wait_for_job(&self, key: &ObjectKey) -> Result<(), RunError> {
        let spec = &self.config.spec;
        let settings = PollSettings::new(
            self.settings.poll_interval,
            spec.timeout + self.settings.job_deadline_grace,
        );
        let store = self.store.as_ref();

        info!(
            job = %key,
            timeout_secs = spec.timeout.as_secs(),
            "waiting for checkup Job to finish"
        );
        let outcome = poll_until(
            move || async move {
                match store.get(ResourceKind::Job, key).await.and_then(|r| r.into_job()) {
                    Ok(job) => job_outcome(&job),
                    Err(e) => {
                        warn!(job = %key, error = %e, "failed to fetch Job while waiting");
                        None
                    }
                }
            },
            settings,
            &self.shutdown,
        )
        .await
        .map_err(|source| RunError::Wait {
            job: key.to_string(),
            source,
        })?;

        match outcome {
            JobOutcome::Complete => {
                info!(job = %key, "checkup Job completed");
                Ok(())
            }
            JobOutcome::Failed { reason, message } => Err(RunError::JobFailed {
                job: key.to_string(),
                reason,
                message,
            }),
        }
    }

    async fn collect_results(&self, record: &ObjectKey) -> Result<CheckupResults, RunError> {
        let config_map = self
            .store
            .get(ResourceKind::ConfigMap, record)
            .await?
            .into_config_map()?;
        let results = read_results(config_map.data.as_ref())?;
        debug!(record = %record, results = results.results.len(), "checkup results read");
        Ok(results)
    }

    async fn execute(&self) -> Result<CheckupResults, RunError> {
        let workspace = self.workspace.as_ref().ok_or(RunError::NotProvisioned)?;
        let (Some(job), Some(record)) = (&workspace.job, &workspace.result_record) else {
            return Err(RunError::NotProvisioned);
        };

        self.wait_for_job(job).await?;
        self.collect_results(record).await
    }
}

#[async_trait]
impl Workload for Checkup {
    async fn setup(&mut self) -> Result<()> {
        let planned = WorkspacePlan::new(
            &self.names,
            &self.config.spec.service_account_name,
            &self.config.cluster_roles,
            &self.config.roles,
        );
        let outcome = match planned {
            Ok(plan) => {
                let plan = plan.with_job(checkup_job(&self.names, &self.config.spec));
                self.provisioner.setup(plan).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(workspace) => {
                self.workspace = Some(workspace);
                self.phase = CheckupPhase::Provisioned;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    async fn run(&mut self) -> Result<()> {
        match self.execute().await {
            Ok(results) => {
                self.results = results;
                self.phase = CheckupPhase::Ran;
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    async fn logs(&self) -> Result<()> {
        let Some(job) = self.workspace.as_ref().and_then(|ws| ws.job.as_ref()) else {
            debug!("no checkup Job to collect logs from");
            return Ok(());
        };

        for log in self.store.job_logs(job).await? {
            info!(job = %job, pod = %log.pod, logs = %log.text, "checkup pod logs");
        }
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        let Some(workspace) = self.workspace.as_ref() else {
            debug!("nothing to tear down");
            return Ok(());
        };

        match self.provisioner.teardown(workspace).await {
            Ok(()) => {
                self.workspace = None;
                if !matches!(self.phase, CheckupPhase::Failed(_)) {
                    self.phase = CheckupPhase::TornDown;
                }
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    fn results(&self) -> CheckupResults {
        self.results.clone()
    }

    fn phase(&self) -> CheckupPhase {
        self.phase.clone()
    }
}
