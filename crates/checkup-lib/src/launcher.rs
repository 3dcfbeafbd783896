//! Top-level checkup lifecycle
//!
//! Sequences setup, run, teardown and a single final report. Every failure
//! along the way is kept, prefixed with the phase it came from, and they
//! all end up both in the record and in the returned error.

use crate::checkup::Workload;
use crate::models::CheckupStatus;
use crate::observability::{phases, StructuredLogger};
use crate::reporter::Reporter;
use chrono::Utc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LauncherError {
    /// Every failure reason, joined with ", "
    #[error("{0}")]
    Failed(String),
}

pub struct Launcher<W, R> {
    workload: W,
    reporter: R,
    logger: StructuredLogger,
}

/// Log a finished phase and keep its failure, if any
fn finish(
    logger: &StructuredLogger,
    phase: &str,
    started: Instant,
    outcome: anyhow::Result<()>,
    failures: &mut Vec<String>,
) -> bool {
    match outcome {
        Ok(()) => {
            logger.log_phase_finished(phase, started.elapsed(), None);
            true
        }
        Err(e) => {
            let reason = format!("{}: {}", phase, e);
            logger.log_phase_finished(phase, started.elapsed(), Some(&reason));
            failures.push(reason);
            false
        }
    }
}

impl<W: Workload, R: Reporter> Launcher<W, R> {
    pub fn new(workload: W, reporter: R) -> Self {
        Self {
            workload,
            reporter,
            logger: StructuredLogger::new("checkup"),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Run the checkup to completion and report its status exactly once
    pub async fn run(&mut self) -> Result<(), LauncherError> {
        let mut status = CheckupStatus::started_at(Utc::now());
        let mut failures = Vec::new();

        self.execute(&mut failures).await;
        debug!(phase = %self.workload.phase(), "workload finished");

        let results = self.workload.results();
        status.results = results.results;
        status.completion_timestamp = Some(Utc::now());
        status.succeeded = Some(failures.is_empty());
        status.failure_reason = failures.clone();

        self.logger.log_phase_started(phases::REPORT);
        let started = Instant::now();
        let outcome = self.reporter.report(&status).await;
        finish(&self.logger, phases::REPORT, started, outcome, &mut failures);

        let reason = failures.join(", ");
        self.logger.log_outcome(failures.is_empty(), &reason, &status.results);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(LauncherError::Failed(reason))
        }
    }

    /// Setup, then run and teardown once setup succeeded
    async fn execute(&mut self, failures: &mut Vec<String>) {
        self.logger.log_phase_started(phases::SETUP);
        let started = Instant::now();
        let outcome = self.workload.setup().await;
        if !finish(&self.logger, phases::SETUP, started, outcome, failures) {
            return;
        }

        self.logger.log_phase_started(phases::RUN);
        let started = Instant::now();
        let outcome = self.workload.run().await;
        if finish(&self.logger, phases::RUN, started, outcome, failures) {
            let results = self.workload.results();
            if results.succeeded == Some(false) {
                let reason = results
                    .failure_reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "checkup reported failure".to_string());
                failures.push(format!("checkup: {}", reason));
            }
        }

        // Log collection never decides the outcome
        if let Err(e) = self.workload.logs().await {
            warn!(error = %e, "failed to collect logs");
        }

        self.logger.log_phase_started(phases::TEARDOWN);
        let started = Instant::now();
        let outcome = self.workload.teardown().await;
        finish(&self.logger, phases::TEARDOWN, started, outcome, failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkup::{async_trait, CheckupPhase};
    use crate::models::CheckupResults;
    use anyhow::{anyhow, Result};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeWorkload {
        setup_err: Option<&'static str>,
        run_err: Option<&'static str>,
        logs_err: Option<&'static str>,
        teardown_err: Option<&'static str>,
        results: CheckupResults,
        calls: Vec<&'static str>,
        logs_calls: Mutex<usize>,
    }

    fn outcome(err: Option<&'static str>) -> Result<()> {
        match err {
            Some(msg) => Err(anyhow!(msg)),
            None => Ok(()),
        }
    }

    #[async_trait]
    impl Workload for FakeWorkload {
        async fn setup(&mut self) -> Result<()> {
            self.calls.push("setup");
            outcome(self.setup_err)
        }

        async fn run(&mut self) -> Result<()> {
            self.calls.push("run");
            outcome(self.run_err)
        }

        async fn logs(&self) -> Result<()> {
            *self.logs_calls.lock().unwrap() += 1;
            outcome(self.logs_err)
        }

        async fn teardown(&mut self) -> Result<()> {
            assert_eq!(
                *self.logs_calls.lock().unwrap(),
                1,
                "logs are collected once, before teardown"
            );
            self.calls.push("teardown");
            outcome(self.teardown_err)
        }

        fn results(&self) -> CheckupResults {
            self.results.clone()
        }

        fn phase(&self) -> CheckupPhase {
            CheckupPhase::Created
        }
    }

    #[derive(Default)]
    struct FakeReporter {
        fail: Option<&'static str>,
        reports: Mutex<Vec<CheckupStatus>>,
    }

    #[async_trait]
    impl Reporter for FakeReporter {
        async fn report(&self, status: &CheckupStatus) -> Result<()> {
            self.reports.lock().unwrap().push(status.clone());
            outcome(self.fail)
        }
    }

    fn reports(launcher: &Launcher<FakeWorkload, FakeReporter>) -> Vec<CheckupStatus> {
        launcher.reporter().reports.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_success() {
        let workload = FakeWorkload {
            results: CheckupResults {
                succeeded: Some(true),
                failure_reason: Some(String::new()),
                results: BTreeMap::from([("latency".to_string(), "7".to_string())]),
            },
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        launcher.run().await.unwrap();

        assert_eq!(launcher.workload().calls, vec!["setup", "run", "teardown"]);
        let reports = reports(&launcher);
        assert_eq!(reports.len(), 1);
        let status = &reports[0];
        assert!(status.start_timestamp.is_some());
        assert!(status.completion_timestamp.is_some());
        assert_eq!(status.succeeded, Some(true));
        assert_eq!(status.joined_failure_reason(), "");
        assert_eq!(status.results["latency"], "7");
    }

    #[tokio::test]
    async fn test_setup_failure_skips_run_and_teardown() {
        let workload = FakeWorkload {
            setup_err: Some("setup error"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        let err = launcher.run().await.unwrap_err();

        assert_eq!(err, LauncherError::Failed("setup: setup error".to_string()));
        assert_eq!(launcher.workload().calls, vec!["setup"]);
        assert_eq!(*launcher.workload().logs_calls.lock().unwrap(), 0);
        let reports = reports(&launcher);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].succeeded, Some(false));
        assert_eq!(reports[0].failure_reason, vec!["setup: setup error"]);
    }

    #[tokio::test]
    async fn test_run_and_teardown_failures_are_joined() {
        let workload = FakeWorkload {
            run_err: Some("run error"),
            teardown_err: Some("teardown error"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        let err = launcher.run().await.unwrap_err();

        assert_eq!(err.to_string(), "run: run error, teardown: teardown error");
        assert_eq!(launcher.workload().calls, vec!["setup", "run", "teardown"]);
        assert_eq!(reports(&launcher).len(), 1);
    }

    #[tokio::test]
    async fn test_report_failure_is_returned() {
        let reporter = FakeReporter {
            fail: Some("report error"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(FakeWorkload::default(), reporter);

        let err = launcher.run().await.unwrap_err();

        assert_eq!(err.to_string(), "report: report error");
        // The reporting failure cannot be part of what was reported
        assert_eq!(reports(&launcher)[0].succeeded, Some(true));
    }

    #[tokio::test]
    async fn test_every_failure_is_collected() {
        let workload = FakeWorkload {
            run_err: Some("run error"),
            teardown_err: Some("teardown error"),
            ..Default::default()
        };
        let reporter = FakeReporter {
            fail: Some("report error"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, reporter);

        let message = launcher.run().await.unwrap_err().to_string();

        for expected in ["run error", "teardown error", "report error"] {
            assert!(message.contains(expected), "{message:?} lacks {expected:?}");
        }
        assert_eq!(reports(&launcher).len(), 1);
    }

    #[tokio::test]
    async fn test_checkup_reported_failure() {
        let workload = FakeWorkload {
            results: CheckupResults {
                succeeded: Some(false),
                failure_reason: Some("latency above threshold".to_string()),
                results: BTreeMap::new(),
            },
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        let err = launcher.run().await.unwrap_err();

        assert_eq!(err.to_string(), "checkup: latency above threshold");
        let reports = reports(&launcher);
        assert_eq!(reports[0].succeeded, Some(false));
        assert_eq!(reports[0].joined_failure_reason(), "checkup: latency above threshold");
    }

    #[tokio::test]
    async fn test_logs_failure_is_not_reported() {
        let workload = FakeWorkload {
            run_err: Some("run error"),
            logs_err: Some("pods is forbidden"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        let err = launcher.run().await.unwrap_err();

        assert_eq!(err.to_string(), "run: run error");
        assert_eq!(launcher.workload().calls, vec!["setup", "run", "teardown"]);
        assert_eq!(*launcher.workload().logs_calls.lock().unwrap(), 1);
        let reports = reports(&launcher);
        assert_eq!(reports[0].joined_failure_reason(), "run: run error");
    }

    #[tokio::test]
    async fn test_logs_failure_keeps_success() {
        let workload = FakeWorkload {
            logs_err: Some("pods is forbidden"),
            ..Default::default()
        };
        let mut launcher = Launcher::new(workload, FakeReporter::default());

        launcher.run().await.unwrap();

        assert_eq!(reports(&launcher)[0].succeeded, Some(true));
    }
}
